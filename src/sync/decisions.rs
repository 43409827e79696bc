//! Scripted user decisions
//!
//! Lets a non-interactive caller replay what a user would click in the
//! conflict dialog: flag toggles, bulk selections and overrides.

use serde::{Deserialize, Serialize};

use super::conflict::{override_key, OverrideAction};
use super::session::SyncSession;
use crate::error::Result;
use crate::types::PatientDraft;

/// One conflict option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRef {
    pub conflict: String,
    pub name: String,
}

/// Override to open on an option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverrideDecision {
    pub conflict: String,
    pub name: String,
    pub action: OverrideAction,
    /// Replace target, required for `replace`
    #[serde(default)]
    pub patient_id: Option<String>,
}

/// Patient to create and attach to an option
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateDecision {
    pub conflict: String,
    pub name: String,
    #[serde(flatten)]
    pub draft: PatientDraft,
}

/// Decisions applied on top of the pre-seeded choices, in field order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decisions {
    #[serde(default)]
    pub select_recommended: Vec<String>,
    #[serde(default)]
    pub select_all: Vec<String>,
    #[serde(default)]
    pub deselect_all: Vec<String>,
    #[serde(default)]
    pub toggle: Vec<OptionRef>,
    #[serde(default)]
    pub overrides: Vec<OverrideDecision>,
    /// Needs the backend, so it is applied by the caller
    #[serde(default)]
    pub create: Vec<CreateDecision>,
}

impl Decisions {
    /// Apply everything except patient creation
    pub fn apply(&self, session: &mut SyncSession) -> Result<()> {
        for conflict_id in &self.select_recommended {
            session.select_recommended(conflict_id)?;
        }
        for conflict_id in &self.select_all {
            session.select_all(conflict_id)?;
        }
        for conflict_id in &self.deselect_all {
            session.deselect_all(conflict_id)?;
        }
        for option in &self.toggle {
            session.toggle(&option.conflict, &option.name)?;
        }
        for decision in &self.overrides {
            let key = override_key(&decision.conflict, &decision.name);
            if session.overrides().get(&key).is_none() {
                session.open_override(&decision.conflict, &decision.name)?;
            }
            session.set_override_action(&key, decision.action)?;
            if let Some(patient_id) = &decision.patient_id {
                session.set_replace_target(&key, patient_id)?;
            }
        }
        Ok(())
    }
}
