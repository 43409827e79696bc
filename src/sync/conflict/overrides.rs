//! Per-option manual overrides ("Gestisci")

use super::{Conflict, ConflictOption};
use crate::error::{AgendaSyncError, Result};
use crate::types::{Patient, PatientDraft, PatientId, PatientTipo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Key of an override entry: `<conflict id>_<option name>`
pub fn override_key(conflict_id: &str, option_name: &str) -> String {
    format!("{}_{}", conflict_id, option_name)
}

/// What the user asked to do with one name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideAction {
    /// Keep the name as a patient of its own
    Keep,
    /// Create a fresh patient from the name text
    New,
    /// Link the name to another patient record
    Replace,
}

/// An open "Gestisci" panel for one option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Override {
    pub action: OverrideAction,
    #[serde(default, rename = "replaceWith")]
    pub replace_with: Option<PatientId>,
    #[serde(default, rename = "replaceWithName")]
    pub replace_with_name: Option<String>,
    #[serde(default)]
    pub expanded: bool,
}

impl Default for Override {
    fn default() -> Self {
        Self {
            action: OverrideAction::Keep,
            replace_with: None,
            replace_with_name: None,
            expanded: true,
        }
    }
}

impl Override {
    /// Replace target name, only when the action is `replace`
    pub fn replace_target(&self) -> Option<&str> {
        match self.action {
            OverrideAction::Replace => self.replace_with_name.as_deref(),
            _ => None,
        }
    }
}

/// All overrides of a sync session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverrideStore {
    entries: HashMap<String, Override>,
}

impl OverrideStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Override> {
        self.entries.get(key)
    }

    /// Override for one option of a conflict
    pub fn for_option(&self, conflict_id: &str, option_name: &str) -> Option<&Override> {
        self.entries.get(&override_key(conflict_id, option_name))
    }

    /// Toggle the panel for an option; returns whether it is open afterwards
    ///
    /// Closing the panel drops the override entirely.
    pub fn open(&mut self, conflict: &Conflict, option_name: &str) -> Result<bool> {
        if !conflict.has_option(option_name) {
            return Err(AgendaSyncError::InvalidInput(format!(
                "'{}' is not an option of conflict {}",
                option_name, conflict.id
            )));
        }
        let key = override_key(&conflict.id, option_name);
        if self.entries.remove(&key).is_some() {
            Ok(false)
        } else {
            self.entries.insert(key, Override::default());
            Ok(true)
        }
    }

    pub fn set_action(&mut self, key: &str, action: OverrideAction) -> Result<()> {
        self.entry_mut(key)?.action = action;
        Ok(())
    }

    /// Record the patient a `replace` override points at
    pub fn set_replace_target(
        &mut self,
        key: &str,
        patient_id: impl Into<PatientId>,
        patient_name: impl Into<String>,
    ) -> Result<()> {
        let entry = self.entry_mut(key)?;
        if entry.action != OverrideAction::Replace {
            return Err(AgendaSyncError::InvalidInput(format!(
                "Override {} is not a replace action",
                key
            )));
        }
        entry.replace_with = Some(patient_id.into());
        entry.replace_with_name = Some(patient_name.into());
        Ok(())
    }

    pub fn set_expanded(&mut self, key: &str, expanded: bool) -> Result<()> {
        self.entry_mut(key)?.expanded = expanded;
        Ok(())
    }

    /// Point an override at a patient created during this session
    ///
    /// Creating a patient is always funnelled into a replace, so the
    /// resolver only ever sees "keep as is" or "replace with id".
    pub fn attach_created_patient(&mut self, key: &str, patient: &Patient) {
        self.entries.insert(
            key.to_string(),
            Override {
                action: OverrideAction::Replace,
                replace_with: Some(patient.id.clone()),
                replace_with_name: Some(patient.display_name()),
                expanded: false,
            },
        );
    }

    pub fn remove(&mut self, key: &str) -> Option<Override> {
        self.entries.remove(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn entry_mut(&mut self, key: &str) -> Result<&mut Override> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| AgendaSyncError::InvalidInput(format!("No open override for {}", key)))
    }
}

/// Prefill the "create patient" popup from a sheet name
///
/// The first word is taken as surname, the rest as first name.
pub fn draft_for_option(option: &ConflictOption) -> PatientDraft {
    let mut parts = option.name.split_whitespace();
    let cognome = parts.next().unwrap_or_default().to_string();
    let nome = parts.collect::<Vec<_>>().join(" ");
    let tipo = option
        .tipos
        .first()
        .and_then(|t| t.parse::<PatientTipo>().ok())
        .unwrap_or_default();
    PatientDraft { cognome, nome, tipo }
}
