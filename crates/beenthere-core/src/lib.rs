//! beenthere-core - Core library for Been There
//!
//! This crate contains the country catalog, local stores, remote adapter,
//! and the reconciliation engine shared by every Been There frontend.

pub mod auth;
pub mod catalog;
pub mod db;
pub mod error;
pub mod models;
pub mod remote;
pub mod sync;
pub mod util;

pub use auth::{AuthChannel, AuthSession, AuthState, AuthUser};
pub use error::{Error, Result};
pub use models::{CountryCode, Homeland, LocalSettings, Preferences, Profile, SelectionRecord};
pub use sync::{MirrorStatus, ReconcileSummary, SelectionView, SyncEngine};
