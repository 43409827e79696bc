//! Backend capability contract
//!
//! The sync workflow only depends on this trait. `HttpBackend` talks to the
//! agenda REST API; tests plug in scripted implementations.

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use http::{BackendConfig, HttpBackend};

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{
    AnalyzeResponse, BackupInfo, ClearChoicesResult, NewPatient, Patient, RollbackResult,
    SavedChoice, SyncRequest, SyncResponse,
};

/// Operations the agenda backend offers around spreadsheet sync
#[async_trait]
pub trait SyncBackend: Send + Sync {
    /// Parse the spreadsheet and report name conflicts
    async fn analyze(&self, ambulatorio: &str, year: i32) -> Result<AnalyzeResponse>;

    /// Import the spreadsheet applying the resolved actions
    async fn sync(&self, request: &SyncRequest) -> Result<SyncResponse>;

    async fn create_patient(&self, patient: &NewPatient) -> Result<Patient>;

    async fn list_patients(&self, ambulatorio: &str) -> Result<Vec<Patient>>;

    /// Snapshot taken before the last sync, if any
    async fn backup_info(&self, ambulatorio: &str) -> Result<BackupInfo>;

    /// Restore the snapshot taken before the last sync
    async fn rollback(&self, ambulatorio: &str) -> Result<RollbackResult>;

    /// Decisions remembered from earlier syncs
    async fn list_choices(&self, ambulatorio: &str) -> Result<Vec<SavedChoice>>;

    /// Forget one remembered decision so the name is asked again
    async fn delete_choice(&self, choice_id: &str) -> Result<()>;

    async fn clear_choices(&self, ambulatorio: &str) -> Result<ClearChoicesResult>;
}
