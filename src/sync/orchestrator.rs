//! Drives a sync session against a backend
//!
//! analyze -> resolve -> submit -> refresh. The session lock is only held
//! between awaits, never across one, so `cancel` can run while a request is
//! pending; the late response is then dropped by the session's ticket check.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::conflict::OverrideAction;
use super::session::{AnalysisOutcome, SyncOutcome, SyncSession, SyncStep, Ticket};
use super::{SyncEvent, SyncPhase};
use crate::backend::SyncBackend;
use crate::error::{AgendaSyncError, Result};
use crate::types::{
    BackupInfo, ClearChoicesResult, ConflictActions, Patient, PatientDraft, RollbackResult,
    SavedChoice, SyncRequest,
};

/// Oldest events are dropped past this many
pub const MAX_SYNC_EVENTS: usize = 32;

/// What `analyze` ended with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalyzeOutcome {
    /// The user has conflicts to resolve, then calls `confirm`
    Conflicts(usize),
    /// Nothing conflicted and the sync already ran
    Synced(SyncOutcome),
}

/// One sync dialog bound to a clinic and year
pub struct SyncOrchestrator<B: SyncBackend> {
    backend: Arc<B>,
    ambulatorio: String,
    year: i32,
    session: Arc<Mutex<SyncSession>>,
    events: Arc<Mutex<VecDeque<SyncEvent>>>,
}

impl<B: SyncBackend> Clone for SyncOrchestrator<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            ambulatorio: self.ambulatorio.clone(),
            year: self.year,
            session: Arc::clone(&self.session),
            events: Arc::clone(&self.events),
        }
    }
}

impl<B: SyncBackend> SyncOrchestrator<B> {
    pub fn new(backend: Arc<B>, ambulatorio: impl Into<String>, year: i32) -> Self {
        Self {
            backend,
            ambulatorio: ambulatorio.into(),
            year,
            session: Arc::new(Mutex::new(SyncSession::new())),
            events: Arc::new(Mutex::new(VecDeque::with_capacity(MAX_SYNC_EVENTS))),
        }
    }

    pub fn ambulatorio(&self) -> &str {
        &self.ambulatorio
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn step(&self) -> SyncStep {
        self.session.lock().step()
    }

    /// Read the session
    pub fn with_session<R>(&self, f: impl FnOnce(&SyncSession) -> R) -> R {
        f(&self.session.lock())
    }

    /// Mutate the session (flags, overrides)
    pub fn update<R>(&self, f: impl FnOnce(&mut SyncSession) -> R) -> R {
        f(&mut self.session.lock())
    }

    /// The last `MAX_SYNC_EVENTS` completed and failed requests, oldest first
    pub fn events(&self) -> Vec<SyncEvent> {
        self.events.lock().iter().cloned().collect()
    }

    fn record(&self, event: SyncEvent) {
        let mut events = self.events.lock();
        if events.len() == MAX_SYNC_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// initial -> analyzing -> conflicts | syncing
    pub async fn analyze(&self) -> Result<AnalyzeOutcome> {
        let ticket = self.session.lock().begin_analyze()?;
        tracing::info!(
            ambulatorio = %self.ambulatorio,
            year = self.year,
            "Analyzing spreadsheet"
        );
        let event = SyncEvent::start(SyncPhase::Analyze);

        // Replace targets are a convenience; a failure here does not stop the sync
        match self.backend.list_patients(&self.ambulatorio).await {
            Ok(patients) => {
                if let Err(e) = self.session.lock().apply_patients(ticket, patients) {
                    self.record(event.fail(&e));
                    return Err(e);
                }
            }
            Err(e) => tracing::warn!("Could not load patients for replace targets: {}", e),
        }

        let response = match self.backend.analyze(&self.ambulatorio, self.year).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Analysis failed: {}", e);
                self.session.lock().fail_analysis(ticket, &e);
                self.record(event.fail(&e));
                return Err(e);
            }
        };

        let outcome = self.session.lock().apply_analysis(ticket, response);
        match outcome {
            Ok(AnalysisOutcome::NeedsResolution { conflicts }) => {
                tracing::info!(conflicts, "Spreadsheet has name conflicts");
                self.record(event.finish());
                Ok(AnalyzeOutcome::Conflicts(conflicts))
            }
            Ok(AnalysisOutcome::NoConflicts) => {
                tracing::info!("No conflicts, syncing directly");
                self.record(event.finish());
                let outcome = self.submit(ticket, ConflictActions::new()).await?;
                Ok(AnalyzeOutcome::Synced(outcome))
            }
            Err(e) => {
                self.record(event.fail(&e));
                Err(e)
            }
        }
    }

    /// conflicts -> syncing -> closed, or back to conflicts on failure
    pub async fn confirm(&self) -> Result<SyncOutcome> {
        let (ticket, resolution) = self.session.lock().begin_confirm()?;
        let summary = resolution.summary();
        tracing::info!(
            selected = summary.selected,
            replaced = summary.replaced,
            auto_associated = summary.auto_associated,
            create_new = summary.create_new,
            ignored = summary.not_selected,
            warnings = resolution.warnings.len(),
            "Submitting conflict actions"
        );
        self.submit(ticket, resolution.actions).await
    }

    async fn submit(&self, ticket: Ticket, conflict_actions: ConflictActions) -> Result<SyncOutcome> {
        let event = SyncEvent::start(SyncPhase::Sync);
        let request = SyncRequest {
            ambulatorio: self.ambulatorio.clone(),
            year: self.year,
            conflict_actions,
        };

        let response = match self.backend.sync(&request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!("Sync failed: {}", e);
                self.session.lock().fail_sync(ticket, &e);
                self.record(event.fail(&e));
                return Err(e);
            }
        };

        let outcome = self.session.lock().apply_sync(ticket, response);
        match outcome {
            Ok(outcome) => {
                tracing::info!(
                    created_patients = outcome.created_patients,
                    created_appointments = outcome.created_appointments,
                    "Sync completed"
                );
                self.record(event.finish());
                Ok(outcome)
            }
            Err(e) => {
                self.record(event.fail(&e));
                Err(e)
            }
        }
    }

    /// Create a patient from the popup and point the option's override at it
    ///
    /// Validation happens before the backend is called.
    pub async fn create_patient_and_attach(
        &self,
        conflict_id: &str,
        option_name: &str,
        draft: &PatientDraft,
    ) -> Result<Patient> {
        let (ticket, key, draft) = self
            .session
            .lock()
            .begin_create_patient(conflict_id, option_name, draft)?;

        let new_patient = draft.into_new_patient(self.ambulatorio.clone());
        let patient = self.backend.create_patient(&new_patient).await?;
        tracing::info!(patient = %patient.id, name = %patient.display_name(), "Patient created during sync");

        self.session
            .lock()
            .apply_created_patient(ticket, &key, patient.clone())?;
        Ok(patient)
    }

    /// Replace-target candidates matching `query`
    pub fn search_patients(&self, query: &str) -> Vec<Patient> {
        self.with_session(|s| s.patients().search(query).into_iter().cloned().collect())
    }

    pub fn toggle(&self, conflict_id: &str, option_name: &str) -> Result<bool> {
        self.update(|s| s.toggle(conflict_id, option_name))
    }

    pub fn open_override(&self, conflict_id: &str, option_name: &str) -> Result<bool> {
        self.update(|s| s.open_override(conflict_id, option_name))
    }

    pub fn set_override_action(&self, key: &str, action: OverrideAction) -> Result<()> {
        self.update(|s| s.set_override_action(key, action))
    }

    /// Close the dialog; a pending response is ignored when it lands
    pub fn cancel(&self) {
        tracing::info!(ambulatorio = %self.ambulatorio, "Sync cancelled");
        self.session.lock().cancel();
    }

    pub fn reopen(&self) -> Result<()> {
        self.session.lock().reopen()
    }

    // ---------------------------------------------------------------------
    // Backup and remembered choices
    // ---------------------------------------------------------------------

    pub async fn backup_info(&self) -> Result<BackupInfo> {
        self.backend.backup_info(&self.ambulatorio).await
    }

    /// Undo the last sync; refused while a sync session is active
    pub async fn rollback(&self) -> Result<RollbackResult> {
        let step = self.step();
        if step != SyncStep::Initial && step != SyncStep::Closed {
            return Err(AgendaSyncError::InvalidState {
                expected: SyncStep::Initial.as_str(),
                actual: step.as_str(),
            });
        }
        let result = self.backend.rollback(&self.ambulatorio).await?;
        tracing::info!(
            restored_patients = result.restored_patients,
            restored_appointments = result.restored_appointments,
            "Last sync rolled back"
        );
        Ok(result)
    }

    pub async fn saved_choices(&self) -> Result<Vec<SavedChoice>> {
        self.backend.list_choices(&self.ambulatorio).await
    }

    pub async fn restore_choice(&self, choice_id: &str) -> Result<()> {
        self.backend.delete_choice(choice_id).await
    }

    pub async fn clear_choices(&self) -> Result<ClearChoicesResult> {
        let result = self.backend.clear_choices(&self.ambulatorio).await?;
        tracing::info!(deleted = result.deleted_choices, "Saved sync choices cleared");
        Ok(result)
    }
}
