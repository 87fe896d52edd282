//! Remote profile model

use serde::{Deserialize, Serialize};

use super::CountryCode;

/// The account-scoped remote record: one per authenticated user.
///
/// Created lazily by `ensure_profile` on the first authenticated action.
/// `shared` gates public read access to the profile's selection set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    /// Server-assigned record id
    pub id: String,
    /// Owning user id, unique per profile at the storage layer
    pub user_id: String,
    /// Whether the selection set is publicly readable via share link
    pub shared: bool,
    /// Homeland country, mirrored from the local settings store
    pub homeland: Option<CountryCode>,
    /// Display name shown on the shared page
    pub display_name: String,
}
