//! Core types for agenda sync

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::AgendaSyncError;
use crate::sync::conflict::{Conflict, ResolvedAction};

/// Patient identifier as issued by the backend
pub type PatientId = String;

/// Conflict identifier as issued by the analysis step
pub type ConflictId = String;

/// Final per-name actions submitted with a sync request
pub type ConflictActions = BTreeMap<String, ResolvedAction>;

/// Which clinical pathway a patient follows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PatientTipo {
    /// Catheter (PICC) management
    #[default]
    #[serde(rename = "PICC")]
    Picc,
    /// Wound care
    #[serde(rename = "MED")]
    Med,
    /// Both pathways
    #[serde(rename = "PICC_MED")]
    PiccMed,
}

impl PatientTipo {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatientTipo::Picc => "PICC",
            PatientTipo::Med => "MED",
            PatientTipo::PiccMed => "PICC_MED",
        }
    }
}

impl FromStr for PatientTipo {
    type Err = AgendaSyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "PICC" => Ok(PatientTipo::Picc),
            "MED" => Ok(PatientTipo::Med),
            "PICC_MED" | "PICC-MED" => Ok(PatientTipo::PiccMed),
            other => Err(AgendaSyncError::InvalidInput(format!(
                "Unknown patient tipo: {}",
                other
            ))),
        }
    }
}

/// A patient record as returned by the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patient {
    pub id: PatientId,
    pub cognome: String,
    #[serde(default)]
    pub nome: String,
    #[serde(default)]
    pub tipo: PatientTipo,
}

impl Patient {
    /// "Cognome Nome", trimmed when the first name is missing
    pub fn display_name(&self) -> String {
        format!("{} {}", self.cognome, self.nome).trim().to_string()
    }
}

/// Fields the user fills in the "create patient" popup
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PatientDraft {
    pub cognome: String,
    #[serde(default)]
    pub nome: String,
    #[serde(default)]
    pub tipo: PatientTipo,
}

impl PatientDraft {
    /// Trim fields and reject a draft without a surname
    pub fn validate(&self) -> crate::Result<PatientDraft> {
        let cognome = self.cognome.trim();
        if cognome.is_empty() {
            return Err(AgendaSyncError::InvalidInput(
                "Inserisci il cognome del paziente".to_string(),
            ));
        }
        Ok(PatientDraft {
            cognome: cognome.to_string(),
            nome: self.nome.trim().to_string(),
            tipo: self.tipo,
        })
    }

    /// Attach the clinic the patient belongs to
    pub fn into_new_patient(self, ambulatorio: impl Into<String>) -> NewPatient {
        NewPatient {
            cognome: self.cognome,
            nome: self.nome,
            tipo: self.tipo,
            ambulatorio: ambulatorio.into(),
        }
    }
}

/// Body of a patient-create request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPatient {
    pub cognome: String,
    pub nome: String,
    pub tipo: PatientTipo,
    pub ambulatorio: String,
}

/// Result of the analysis step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalyzeResponse {
    pub success: bool,
    #[serde(default)]
    pub has_conflicts: bool,
    #[serde(default)]
    pub conflicts: Vec<Conflict>,
}

/// Body of the sync submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRequest {
    pub ambulatorio: String,
    pub year: i32,
    pub conflict_actions: ConflictActions,
}

/// Result of the sync submission
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResponse {
    pub success: bool,
    #[serde(default)]
    pub created_patients: u64,
    #[serde(default)]
    pub created_appointments: u64,
}

/// Snapshot kept by the backend before the last sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupInfo {
    #[serde(default)]
    pub has_backup: bool,
    /// ISO-8601 timestamp as sent by the backend
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub patients_count: u64,
    #[serde(default)]
    pub appointments_count: u64,
}

/// Result of restoring the pre-sync snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackResult {
    #[serde(default)]
    pub restored_patients: u64,
    #[serde(default)]
    pub restored_appointments: u64,
}

/// A decision remembered by the backend from an earlier sync
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedChoice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub replace_with: Option<String>,
    /// Sheet dates the decision was taken on
    #[serde(default)]
    pub dates: Vec<String>,
    /// Operator who took the decision
    #[serde(default)]
    pub created_by: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// Result of wiping remembered decisions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClearChoicesResult {
    #[serde(default)]
    pub deleted_choices: u64,
}
