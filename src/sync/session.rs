//! Sync session state and its transitions
//!
//! All state of one open sync dialog lives in a single `SyncSession`. Every
//! transition is a plain method without I/O, so the whole workflow can be
//! driven and tested without a backend. Requests are tagged with a `Ticket`;
//! results carrying a ticket from an older session generation are dropped.

use uuid::Uuid;

use super::conflict::{
    override_key, validate_conflicts, ActionPreview, ActionResolver, ChoiceStore, Conflict,
    OverrideAction, OverrideStore, SyncResolution,
};
use super::patients::PatientDirectory;
use crate::error::{AgendaSyncError, Result};
use crate::types::{AnalyzeResponse, Patient, PatientDraft, SyncResponse};

/// Where the dialog is in the workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStep {
    #[default]
    Initial,
    Analyzing,
    Conflicts,
    Syncing,
    Closed,
}

impl SyncStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStep::Initial => "initial",
            SyncStep::Analyzing => "analyzing",
            SyncStep::Conflicts => "conflicts",
            SyncStep::Syncing => "syncing",
            SyncStep::Closed => "closed",
        }
    }

    /// A backend request is pending in this step
    pub fn is_in_flight(&self) -> bool {
        matches!(self, SyncStep::Analyzing | SyncStep::Syncing)
    }
}

/// Proof that a request was started by a given session generation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ticket {
    generation: u64,
}

/// What the analysis step led to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisOutcome {
    /// Conflicts are waiting for the user
    NeedsResolution { conflicts: usize },
    /// Nothing to resolve, the session moved straight to syncing
    NoConflicts,
}

/// Result of a completed sync
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub created_patients: u64,
    pub created_appointments: u64,
    /// The calling page should reload its data
    pub refresh_required: bool,
}

/// State of one sync dialog
#[derive(Debug)]
pub struct SyncSession {
    id: Uuid,
    generation: u64,
    step: SyncStep,
    conflicts: Vec<Conflict>,
    choices: ChoiceStore,
    overrides: OverrideStore,
    patients: PatientDirectory,
    last_error: Option<String>,
}

impl Default for SyncSession {
    fn default() -> Self {
        Self::new()
    }
}

impl SyncSession {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            generation: 0,
            step: SyncStep::Initial,
            conflicts: Vec::new(),
            choices: ChoiceStore::new(),
            overrides: OverrideStore::new(),
            patients: PatientDirectory::new(),
            last_error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn step(&self) -> SyncStep {
        self.step
    }

    pub fn conflicts(&self) -> &[Conflict] {
        &self.conflicts
    }

    pub fn conflict(&self, conflict_id: &str) -> Option<&Conflict> {
        self.conflicts.iter().find(|c| c.id == conflict_id)
    }

    pub fn choices(&self) -> &ChoiceStore {
        &self.choices
    }

    pub fn overrides(&self) -> &OverrideStore {
        &self.overrides
    }

    pub fn patients(&self) -> &PatientDirectory {
        &self.patients
    }

    /// Message of the last failure, cleared on the next successful step
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    fn ticket(&self) -> Ticket {
        Ticket {
            generation: self.generation,
        }
    }

    fn is_current(&self, ticket: Ticket) -> bool {
        ticket.generation == self.generation
    }

    fn check_current(&self, ticket: Ticket) -> Result<()> {
        if self.is_current(ticket) {
            Ok(())
        } else {
            tracing::debug!(
                session = %self.id,
                ticket = ticket.generation,
                current = self.generation,
                "Dropping response for a stale session"
            );
            Err(AgendaSyncError::StaleResponse)
        }
    }

    fn expect_step(&self, expected: SyncStep) -> Result<()> {
        if self.step == expected {
            Ok(())
        } else if self.step.is_in_flight() {
            Err(AgendaSyncError::Busy)
        } else {
            Err(AgendaSyncError::InvalidState {
                expected: expected.as_str(),
                actual: self.step.as_str(),
            })
        }
    }

    fn transition(&mut self, to: SyncStep) {
        tracing::info!(
            session = %self.id,
            from = self.step.as_str(),
            to = to.as_str(),
            "Sync step changed"
        );
        self.step = to;
    }

    /// Drop all session data and invalidate outstanding tickets
    fn reset(&mut self, to: SyncStep) {
        self.generation += 1;
        self.id = Uuid::new_v4();
        self.conflicts.clear();
        self.choices.clear();
        self.overrides.clear();
        self.patients.clear();
        self.transition(to);
    }

    // ---------------------------------------------------------------------
    // Analysis
    // ---------------------------------------------------------------------

    /// initial -> analyzing
    pub fn begin_analyze(&mut self) -> Result<Ticket> {
        self.expect_step(SyncStep::Initial)?;
        self.last_error = None;
        self.transition(SyncStep::Analyzing);
        Ok(self.ticket())
    }

    /// Store the patient list used for replace targets
    pub fn apply_patients(&mut self, ticket: Ticket, patients: Vec<Patient>) -> Result<()> {
        self.check_current(ticket)?;
        self.patients.set_loaded(patients);
        Ok(())
    }

    /// analyzing -> conflicts, or analyzing -> syncing when nothing conflicts
    pub fn apply_analysis(
        &mut self,
        ticket: Ticket,
        response: AnalyzeResponse,
    ) -> Result<AnalysisOutcome> {
        self.check_current(ticket)?;
        self.expect_step(SyncStep::Analyzing).map_err(|_| AgendaSyncError::StaleResponse)?;

        if !response.success {
            let err = AgendaSyncError::SyncRejected("Analysis was not successful".to_string());
            self.fail_analysis(ticket, &err);
            return Err(err);
        }

        if !response.has_conflicts || response.conflicts.is_empty() {
            self.transition(SyncStep::Syncing);
            return Ok(AnalysisOutcome::NoConflicts);
        }

        if let Err(err) = validate_conflicts(&response.conflicts) {
            self.fail_analysis(ticket, &err);
            return Err(err);
        }

        self.choices = ChoiceStore::initialize(&response.conflicts);
        self.overrides.clear();
        self.conflicts = response.conflicts;
        self.transition(SyncStep::Conflicts);
        Ok(AnalysisOutcome::NeedsResolution {
            conflicts: self.conflicts.len(),
        })
    }

    /// analyzing -> initial
    pub fn fail_analysis(&mut self, ticket: Ticket, err: &AgendaSyncError) {
        if !self.is_current(ticket) || self.step != SyncStep::Analyzing {
            return;
        }
        self.last_error = Some(err.user_message());
        self.transition(SyncStep::Initial);
    }

    // ---------------------------------------------------------------------
    // Resolution
    // ---------------------------------------------------------------------

    /// Flip a flag; returns whether the option is flagged afterwards
    pub fn toggle(&mut self, conflict_id: &str, option_name: &str) -> Result<bool> {
        self.expect_step(SyncStep::Conflicts)?;
        let conflict = find_conflict(&self.conflicts, conflict_id)?;
        self.choices.toggle(conflict, option_name)
    }

    pub fn select_all(&mut self, conflict_id: &str) -> Result<()> {
        self.expect_step(SyncStep::Conflicts)?;
        let conflict = find_conflict(&self.conflicts, conflict_id)?;
        self.choices.select_all(conflict);
        Ok(())
    }

    pub fn deselect_all(&mut self, conflict_id: &str) -> Result<()> {
        self.expect_step(SyncStep::Conflicts)?;
        find_conflict(&self.conflicts, conflict_id)?;
        self.choices.deselect_all(conflict_id);
        Ok(())
    }

    pub fn select_recommended(&mut self, conflict_id: &str) -> Result<()> {
        self.expect_step(SyncStep::Conflicts)?;
        let conflict = find_conflict(&self.conflicts, conflict_id)?;
        self.choices.select_recommended(conflict);
        Ok(())
    }

    /// Toggle the "Gestisci" panel of an option; returns whether it is open
    pub fn open_override(&mut self, conflict_id: &str, option_name: &str) -> Result<bool> {
        self.expect_step(SyncStep::Conflicts)?;
        let conflict = find_conflict(&self.conflicts, conflict_id)?;
        self.overrides.open(conflict, option_name)
    }

    pub fn set_override_action(&mut self, key: &str, action: OverrideAction) -> Result<()> {
        self.expect_step(SyncStep::Conflicts)?;
        self.overrides.set_action(key, action)
    }

    pub fn set_replace_target(&mut self, key: &str, patient_id: &str) -> Result<()> {
        self.expect_step(SyncStep::Conflicts)?;
        let name = self
            .patients
            .find(patient_id)
            .map(Patient::display_name)
            .ok_or_else(|| AgendaSyncError::InvalidInput(format!("Unknown patient: {}", patient_id)))?;
        self.overrides.set_replace_target(key, patient_id, name)
    }

    pub fn set_override_expanded(&mut self, key: &str, expanded: bool) -> Result<()> {
        self.expect_step(SyncStep::Conflicts)?;
        self.overrides.set_expanded(key, expanded)
    }

    /// Validate a create-patient popup for one option
    ///
    /// Returns the key the created patient will be attached to.
    pub fn begin_create_patient(
        &mut self,
        conflict_id: &str,
        option_name: &str,
        draft: &PatientDraft,
    ) -> Result<(Ticket, String, PatientDraft)> {
        self.expect_step(SyncStep::Conflicts)?;
        let conflict = find_conflict(&self.conflicts, conflict_id)?;
        if !conflict.has_option(option_name) {
            return Err(AgendaSyncError::InvalidInput(format!(
                "'{}' is not an option of conflict {}",
                option_name, conflict_id
            )));
        }
        let draft = draft.validate()?;
        Ok((self.ticket(), override_key(conflict_id, option_name), draft))
    }

    /// Make the created patient selectable and point the override at it
    pub fn apply_created_patient(&mut self, ticket: Ticket, key: &str, patient: Patient) -> Result<()> {
        self.check_current(ticket)?;
        self.overrides.attach_created_patient(key, &patient);
        tracing::info!(
            session = %self.id,
            key,
            patient = %patient.id,
            "Created patient attached to override"
        );
        self.patients.add_created(patient);
        Ok(())
    }

    /// Actions that would be submitted right now
    pub fn resolve(&self) -> SyncResolution {
        ActionResolver::new().resolve(&self.conflicts, &self.choices, &self.overrides)
    }

    pub fn preview(&self, conflict_id: &str, option_name: &str) -> Option<ActionPreview> {
        let conflict = self.conflict(conflict_id)?;
        ActionResolver::new().preview(conflict, option_name, &self.choices, &self.overrides)
    }

    // ---------------------------------------------------------------------
    // Submission
    // ---------------------------------------------------------------------

    /// conflicts -> syncing
    pub fn begin_confirm(&mut self) -> Result<(Ticket, SyncResolution)> {
        self.expect_step(SyncStep::Conflicts)?;
        let resolution = self.resolve();
        self.last_error = None;
        self.transition(SyncStep::Syncing);
        Ok((self.ticket(), resolution))
    }

    /// syncing -> closed, wiping the session
    pub fn apply_sync(&mut self, ticket: Ticket, response: SyncResponse) -> Result<SyncOutcome> {
        self.check_current(ticket)?;
        self.expect_step(SyncStep::Syncing).map_err(|_| AgendaSyncError::StaleResponse)?;

        if !response.success {
            let err = AgendaSyncError::SyncRejected("Sync was not successful".to_string());
            self.fail_sync(ticket, &err);
            return Err(err);
        }

        self.last_error = None;
        self.reset(SyncStep::Closed);
        Ok(SyncOutcome {
            created_patients: response.created_patients,
            created_appointments: response.created_appointments,
            refresh_required: true,
        })
    }

    /// syncing -> conflicts with choices kept, or -> initial on the fast path
    pub fn fail_sync(&mut self, ticket: Ticket, err: &AgendaSyncError) {
        if !self.is_current(ticket) || self.step != SyncStep::Syncing {
            return;
        }
        self.last_error = Some(err.user_message());
        if self.conflicts.is_empty() {
            self.transition(SyncStep::Initial);
        } else {
            self.transition(SyncStep::Conflicts);
        }
    }

    // ---------------------------------------------------------------------
    // Dialog lifecycle
    // ---------------------------------------------------------------------

    /// any -> initial, discarding choices and overrides
    pub fn cancel(&mut self) {
        self.last_error = None;
        self.reset(SyncStep::Initial);
    }

    /// closed -> initial
    pub fn reopen(&mut self) -> Result<()> {
        self.expect_step(SyncStep::Closed)?;
        self.transition(SyncStep::Initial);
        Ok(())
    }
}

fn find_conflict<'a>(conflicts: &'a [Conflict], conflict_id: &str) -> Result<&'a Conflict> {
    conflicts
        .iter()
        .find(|c| c.id == conflict_id)
        .ok_or_else(|| AgendaSyncError::InvalidInput(format!("Unknown conflict: {}", conflict_id)))
}
