//! Flag selection per conflict

use super::Conflict;
use crate::error::{AgendaSyncError, Result};
use crate::types::ConflictId;
use std::collections::HashMap;

/// Names the user flagged in each conflict, in the order they were flagged
///
/// The first flagged name is the target every unflagged option is
/// auto-associated with, so insertion order matters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChoiceStore {
    choices: HashMap<ConflictId, Vec<String>>,
}

impl ChoiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from an analysis result
    ///
    /// Existing patients are pre-flagged. When a conflict has none, only the
    /// suggested name (or the first option) is flagged.
    pub fn initialize(conflicts: &[Conflict]) -> Self {
        let choices = conflicts
            .iter()
            .map(|conflict| (conflict.id.clone(), initial_selection(conflict)))
            .collect();
        Self { choices }
    }

    /// Flagged names for a conflict; empty when nothing is flagged
    pub fn selected(&self, conflict_id: &str) -> &[String] {
        self.choices
            .get(conflict_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_selected(&self, conflict_id: &str, name: &str) -> bool {
        self.selected(conflict_id).iter().any(|n| n == name)
    }

    pub fn first_flagged(&self, conflict_id: &str) -> Option<&str> {
        self.selected(conflict_id).first().map(String::as_str)
    }

    /// Flip one option; returns whether it is flagged afterwards
    pub fn toggle(&mut self, conflict: &Conflict, name: &str) -> Result<bool> {
        ensure_option(conflict, name)?;
        let current = self.choices.entry(conflict.id.clone()).or_default();
        if let Some(pos) = current.iter().position(|n| n == name) {
            current.remove(pos);
            Ok(false)
        } else {
            current.push(name.to_string());
            Ok(true)
        }
    }

    /// Flag every option, keeping the already flagged ones first
    pub fn select_all(&mut self, conflict: &Conflict) {
        let current = self.choices.entry(conflict.id.clone()).or_default();
        for option in &conflict.options {
            if !current.contains(&option.name) {
                current.push(option.name.clone());
            }
        }
    }

    pub fn deselect_all(&mut self, conflict_id: &str) {
        self.choices.insert(conflict_id.to_string(), Vec::new());
    }

    /// Replace the selection with the recommended name only
    pub fn select_recommended(&mut self, conflict: &Conflict) {
        let selection = conflict
            .recommended()
            .map(|name| vec![name.to_string()])
            .unwrap_or_default();
        self.choices.insert(conflict.id.clone(), selection);
    }

    pub fn clear(&mut self) {
        self.choices.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.choices.is_empty()
    }
}

fn initial_selection(conflict: &Conflict) -> Vec<String> {
    let existing: Vec<String> = conflict
        .existing_options()
        .map(|o| o.name.clone())
        .collect();
    if !existing.is_empty() {
        return existing;
    }
    conflict
        .suggested
        .as_deref()
        .or_else(|| conflict.options.first().map(|o| o.name.as_str()))
        .map(|name| vec![name.to_string()])
        .unwrap_or_default()
}

fn ensure_option(conflict: &Conflict, name: &str) -> Result<()> {
    if conflict.has_option(name) {
        Ok(())
    } else {
        Err(AgendaSyncError::InvalidInput(format!(
            "'{}' is not an option of conflict {}",
            name, conflict.id
        )))
    }
}
