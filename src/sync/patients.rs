//! Replace-target lookup over loaded and session-created patients

use crate::types::Patient;

/// Maximum number of search hits shown in the replace picker
pub const MAX_SEARCH_RESULTS: usize = 15;

/// Patients available as "replace with" targets during a sync session
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PatientDirectory {
    loaded: Vec<Patient>,
    created: Vec<Patient>,
}

impl PatientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the list fetched from the backend
    pub fn set_loaded(&mut self, patients: Vec<Patient>) {
        self.loaded = patients;
    }

    /// Remember a patient created mid-sync
    pub fn add_created(&mut self, patient: Patient) {
        self.created.push(patient);
    }

    /// Patients created during this session, oldest first
    pub fn created(&self) -> &[Patient] {
        &self.created
    }

    pub fn find(&self, id: &str) -> Option<&Patient> {
        self.iter().find(|p| p.id == id)
    }

    /// Loaded patients followed by the ones created in this session
    pub fn iter(&self) -> impl Iterator<Item = &Patient> {
        self.loaded.iter().chain(self.created.iter())
    }

    /// Case-insensitive substring match on "cognome nome"
    ///
    /// An empty query lists everything, capped like any other search.
    pub fn search(&self, query: &str) -> Vec<&Patient> {
        let needle = query.trim().to_lowercase();
        self.iter()
            .filter(|p| {
                needle.is_empty()
                    || format!("{} {}", p.cognome, p.nome)
                        .to_lowercase()
                        .contains(&needle)
            })
            .take(MAX_SEARCH_RESULTS)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.loaded.len() + self.created.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.loaded.clear();
        self.created.clear();
    }
}
