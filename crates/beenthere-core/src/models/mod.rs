//! Data models for Been There

mod country;
mod profile;
mod settings;

pub use country::{CountryCode, SelectionRecord};
pub use profile::Profile;
pub use settings::{Homeland, LocalSettings, Preferences};
