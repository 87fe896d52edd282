//! Local persistence layer for Been There
//!
//! Two independent stores back the offline experience: the selection store
//! (visited countries, keyed by code) and the settings store (a single
//! record holding the homeland and preferences). Both live in one libSQL
//! database and survive across sessions without any account.

mod connection;
mod migrations;
mod selection_repository;
mod settings_repository;

pub use connection::Database;
pub use selection_repository::{LibSqlSelectionStore, SelectionStore};
pub use settings_repository::{LibSqlSettingsStore, SettingsStore};
