//! Name-conflict resolution for spreadsheet sync
//!
//! Provides:
//! - The conflict model returned by the analysis step
//! - Per-conflict flag selection (`ChoiceStore`)
//! - Per-option manual overrides, the "Gestisci" panel (`OverrideStore`)
//! - The resolver that turns both into the final per-name actions

mod choices;
mod overrides;
mod resolver;

pub use choices::ChoiceStore;
pub use overrides::{draft_for_option, override_key, Override, OverrideAction, OverrideStore};
pub use resolver::{
    ActionKind, ActionPreview, ActionResolver, OptionContext, ResolutionRule, ResolutionSummary,
    ResolutionWarning, ResolvedAction, SyncResolution,
};

use crate::error::{AgendaSyncError, Result};
use crate::types::{ConflictId, PatientId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Where a candidate name was found
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OptionSource {
    /// Read from the spreadsheet
    #[default]
    Foglio,
    /// Already a patient record
    Database,
    #[serde(other)]
    Other,
}

/// One candidate name inside a conflict, with its spreadsheet evidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictOption {
    pub name: String,
    /// Similarity to the cluster head, in percent
    #[serde(default)]
    pub similarity: f64,
    #[serde(default)]
    pub exists_in_db: bool,
    #[serde(default)]
    pub patient_id: Option<PatientId>,
    /// Appointments in the sheet that use this spelling
    #[serde(default)]
    pub occurrences: u32,
    #[serde(default)]
    pub dates: Vec<String>,
    #[serde(default)]
    pub tipos: Vec<String>,
    #[serde(default)]
    pub source: OptionSource,
}

impl ConflictOption {
    /// Minimal option, mostly useful for building fixtures
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            similarity: 100.0,
            exists_in_db: false,
            patient_id: None,
            occurrences: 0,
            dates: Vec::new(),
            tipos: Vec::new(),
            source: OptionSource::Foglio,
        }
    }

    /// Mark this option as an existing patient record
    pub fn existing(mut self, patient_id: impl Into<PatientId>) -> Self {
        self.exists_in_db = true;
        self.patient_id = Some(patient_id.into());
        self.source = OptionSource::Database;
        self
    }

    pub fn with_dates<I, S>(mut self, dates: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dates = dates.into_iter().map(Into::into).collect();
        self.occurrences = self.dates.len() as u32;
        self
    }
}

/// A cluster of similar names found while parsing the sheet
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conflict {
    pub id: ConflictId,
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub suggested: Option<String>,
    #[serde(default)]
    pub has_existing_patient: bool,
    pub options: Vec<ConflictOption>,
}

impl Conflict {
    /// Create a conflict; `has_existing_patient` is derived from the options
    pub fn new(
        id: impl Into<ConflictId>,
        reason: impl Into<String>,
        options: Vec<ConflictOption>,
    ) -> Self {
        let has_existing_patient = options.iter().any(|o| o.exists_in_db);
        Self {
            id: id.into(),
            reason: reason.into(),
            suggested: None,
            has_existing_patient,
            options,
        }
    }

    pub fn with_suggested(mut self, name: impl Into<String>) -> Self {
        self.suggested = Some(name.into());
        self
    }

    /// Look up an option by name
    pub fn option(&self, name: &str) -> Option<&ConflictOption> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn has_option(&self, name: &str) -> bool {
        self.option(name).is_some()
    }

    /// Options already linked to a patient record, in sheet order
    pub fn existing_options(&self) -> impl Iterator<Item = &ConflictOption> {
        self.options.iter().filter(|o| o.exists_in_db)
    }

    /// `suggested`, else the first existing patient, else the first option
    pub fn recommended(&self) -> Option<&str> {
        if let Some(suggested) = self.suggested.as_deref() {
            return Some(suggested);
        }
        self.existing_options()
            .next()
            .or_else(|| self.options.first())
            .map(|o| o.name.as_str())
    }

    /// Check the shape the analysis step promises
    pub fn validate(&self) -> Result<()> {
        if self.options.is_empty() {
            return Err(AgendaSyncError::InvalidInput(format!(
                "Conflict {} has no options",
                self.id
            )));
        }
        if let Some(suggested) = &self.suggested {
            if !self.has_option(suggested) {
                return Err(AgendaSyncError::InvalidInput(format!(
                    "Conflict {} suggests '{}' which is not one of its options",
                    self.id, suggested
                )));
            }
        }
        Ok(())
    }
}

/// Validate a whole analysis result, including id uniqueness
pub fn validate_conflicts(conflicts: &[Conflict]) -> Result<()> {
    let mut seen = HashSet::new();
    for conflict in conflicts {
        conflict.validate()?;
        if !seen.insert(conflict.id.as_str()) {
            return Err(AgendaSyncError::InvalidInput(format!(
                "Duplicate conflict id: {}",
                conflict.id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mario() -> Conflict {
        Conflict::new(
            "c1",
            "Nomi simili",
            vec![
                ConflictOption::new("Mario Rosi"),
                ConflictOption::new("Mario Rossi").existing("p1"),
            ],
        )
    }

    #[test]
    fn test_recommended_prefers_suggested() {
        let conflict = mario().with_suggested("Mario Rosi");
        assert_eq!(conflict.recommended(), Some("Mario Rosi"));
    }

    #[test]
    fn test_recommended_falls_back_to_existing_then_first() {
        assert_eq!(mario().recommended(), Some("Mario Rossi"));

        let fresh = Conflict::new(
            "c2",
            "",
            vec![ConflictOption::new("Anna Verdi"), ConflictOption::new("Ana Verdi")],
        );
        assert_eq!(fresh.recommended(), Some("Anna Verdi"));
    }

    #[test]
    fn test_validate_rejects_foreign_suggestion() {
        let conflict = mario().with_suggested("Luigi Bianchi");
        assert!(conflict.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_options() {
        let conflict = Conflict::new("c3", "", vec![]);
        assert!(conflict.validate().is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        assert!(validate_conflicts(&[mario(), mario()]).is_err());
        assert!(validate_conflicts(&[mario()]).is_ok());
    }

    #[test]
    fn test_deserialize_backend_payload() {
        let json = r#"{
            "id": "c7",
            "reason": "Nomi simili trovati",
            "suggested": "Mario Rossi",
            "has_existing_patient": true,
            "options": [
                {"name": "Mario Rossi", "similarity": 100, "exists_in_db": true,
                 "patient_id": "p1", "occurrences": 3, "dates": ["2025-01-10"],
                 "tipos": ["PICC"], "source": "database"},
                {"name": "Mario Rosi", "similarity": 91.5, "exists_in_db": false,
                 "occurrences": 1, "dates": ["2025-01-17"], "source": "foglio"}
            ]
        }"#;
        let conflict: Conflict = serde_json::from_str(json).unwrap();
        assert_eq!(conflict.options.len(), 2);
        assert_eq!(conflict.options[1].patient_id, None);
        assert!(conflict.options[1].tipos.is_empty());
        assert_eq!(conflict.options[0].source, OptionSource::Database);
    }
}
