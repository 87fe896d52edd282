//! Local settings model

use serde::{Deserialize, Serialize};

use super::CountryCode;

/// The single country designated as "home".
///
/// Mutually exclusive with a visited selection for the same code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Homeland {
    /// Country code
    pub code: CountryCode,
    /// Display name at the time of setting
    pub name: String,
    /// When the homeland was set (Unix ms)
    pub set_at: i64,
}

/// Display toggles persisted alongside the homeland
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    /// Show country names on the map
    pub show_labels: bool,
    /// Show the visited-country counter
    pub show_visited_count: bool,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            show_labels: true,
            show_visited_count: true,
        }
    }
}

/// The device-local settings record.
///
/// A single logical row; concurrent writes from the same client are
/// serialized by the store, last write wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct LocalSettings {
    /// Homeland selection, if any
    pub homeland: Option<Homeland>,
    /// First-run flag: the welcome screen has been dismissed
    pub has_seen_welcome: bool,
    /// Display toggles
    pub preferences: Preferences,
    /// Last write timestamp (Unix ms)
    pub updated_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preferences_default_everything_on() {
        let prefs = Preferences::default();
        assert!(prefs.show_labels);
        assert!(prefs.show_visited_count);
    }

    #[test]
    fn preferences_deserialize_fills_missing_fields() {
        let prefs: Preferences = serde_json::from_str("{}").unwrap();
        assert_eq!(prefs, Preferences::default());
    }

    #[test]
    fn settings_default_has_no_homeland() {
        let settings = LocalSettings::default();
        assert!(settings.homeland.is_none());
        assert!(!settings.has_seen_welcome);
    }
}
