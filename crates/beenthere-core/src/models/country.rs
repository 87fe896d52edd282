//! Country code and selection record models

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;

/// An ISO-3166 alpha-3 country code: three uppercase ASCII letters.
///
/// Parsing accepts any letter case and normalizes to uppercase. Whether a
/// syntactically valid code denotes a real country is a separate question
/// answered by the catalog (`catalog::is_valid`).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CountryCode([u8; 3]);

impl CountryCode {
    /// Get the code as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        // Always uppercase ASCII by construction
        std::str::from_utf8(&self.0).unwrap_or("???")
    }
}

impl FromStr for CountryCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let bytes = trimmed.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(u8::is_ascii_alphabetic) {
            return Err(ValidationError::UnknownCode(trimmed.to_string()));
        }
        let mut code = [0u8; 3];
        for (slot, byte) in code.iter_mut().zip(bytes) {
            *slot = byte.to_ascii_uppercase();
        }
        Ok(Self(code))
    }
}

impl TryFrom<String> for CountryCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<CountryCode> for String {
    fn from(code: CountryCode) -> Self {
        code.as_str().to_string()
    }
}

impl fmt::Display for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for CountryCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CountryCode({})", self.as_str())
    }
}

/// A country marked as visited.
///
/// One record per code per owner. Records are present or absent; there is
/// no update-in-place. `name` is denormalized display metadata so the UI
/// can render without a catalog lookup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectionRecord {
    /// Country code, the record key
    pub code: CountryCode,
    /// Display name at the time of selection
    pub name: String,
    /// When the country was marked visited (Unix ms)
    pub selected_at: i64,
}

impl SelectionRecord {
    /// Create a record stamped with the current time
    #[must_use]
    pub fn new(code: CountryCode, name: impl Into<String>) -> Self {
        Self {
            code,
            name: name.into(),
            selected_at: crate::util::unix_timestamp_millis(),
        }
    }
}
