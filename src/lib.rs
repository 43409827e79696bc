//! Agenda sync - spreadsheet import for outpatient clinic agendas
//!
//! Resolves the name conflicts found while importing appointments from an
//! external spreadsheet and submits the user's decisions to the agenda
//! backend.

pub mod backend;
pub mod error;
pub mod sync;
pub mod types;

pub use error::{AgendaSyncError, Result};
pub use types::*;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
