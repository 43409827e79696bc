//! Spreadsheet sync workflow
//!
//! Analysis, conflict resolution and submission of one sync run. The
//! conflict resolution logic has no I/O; the orchestrator wires it to a
//! `SyncBackend`.

pub mod conflict;
mod decisions;
mod orchestrator;
mod patients;
mod session;

pub use conflict::{
    draft_for_option, override_key, ActionKind, ActionPreview, ActionResolver, ChoiceStore,
    Conflict, ConflictOption, OptionSource, Override, OverrideAction, OverrideStore,
    ResolutionSummary, ResolutionWarning, ResolvedAction, SyncResolution,
};
pub use decisions::{CreateDecision, Decisions, OptionRef, OverrideDecision};
pub use orchestrator::{AnalyzeOutcome, SyncOrchestrator, MAX_SYNC_EVENTS};
pub use patients::{PatientDirectory, MAX_SEARCH_RESULTS};
pub use session::{AnalysisOutcome, SyncOutcome, SyncSession, SyncStep, Ticket};

use chrono::{DateTime, Utc};

use crate::error::AgendaSyncError;

/// Backend round-trip a sync event refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Analyze,
    Sync,
}

/// Sync event for logging/notifications
#[derive(Debug, Clone)]
pub struct SyncEvent {
    pub phase: SyncPhase,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub success: bool,
    pub error: Option<String>,
}

impl SyncEvent {
    pub fn start(phase: SyncPhase) -> Self {
        Self {
            phase,
            started_at: Utc::now(),
            completed_at: None,
            success: false,
            error: None,
        }
    }

    pub fn finish(mut self) -> Self {
        self.completed_at = Some(Utc::now());
        self.success = true;
        self
    }

    pub fn fail(mut self, err: &AgendaSyncError) -> Self {
        self.completed_at = Some(Utc::now());
        self.success = false;
        self.error = Some(err.to_string());
        self
    }
}
