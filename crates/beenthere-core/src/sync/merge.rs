//! Pure merge rules for reconciliation.
//!
//! No I/O happens here: given both selection sets (and both homeland
//! values), these functions compute what the merged view is and which
//! writes each side still needs. The orchestration in `sync` applies the
//! plan through the store interfaces.
//!
//! The rule is union-with-preference: existence is a set union (a
//! selection made offline is never dropped by a merge; only an explicit
//! deselect removes it), while the remote side wins on display metadata
//! for codes both sides hold, since it may have been edited from another
//! device more recently.

use std::collections::{HashMap, HashSet};

use crate::models::{CountryCode, SelectionRecord};

/// The computed reconciliation plan for the selection sets
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergePlan {
    /// The merged view, keyed by code
    pub merged: HashMap<CountryCode, SelectionRecord>,
    /// Remote-only records the local store is missing
    pub store_locally: Vec<SelectionRecord>,
    /// Local-only records the remote store is missing
    pub push_remote: Vec<SelectionRecord>,
}

impl MergePlan {
    /// True when neither side needs any write
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.store_locally.is_empty() && self.push_remote.is_empty()
    }
}

/// Merge the local and remote selection sets.
///
/// Existence is unioned; remote metadata wins on key collision.
#[must_use]
pub fn merge_selections(local: &[SelectionRecord], remote: &[SelectionRecord]) -> MergePlan {
    let mut merged: HashMap<CountryCode, SelectionRecord> = local
        .iter()
        .map(|record| (record.code, record.clone()))
        .collect();

    let mut store_locally = Vec::new();
    for record in remote {
        if !merged.contains_key(&record.code) {
            store_locally.push(record.clone());
        }
        // Remote wins for display metadata either way
        merged.insert(record.code, record.clone());
    }

    let remote_codes: HashSet<CountryCode> = remote.iter().map(|record| record.code).collect();
    let push_remote = local
        .iter()
        .filter(|record| !remote_codes.contains(&record.code))
        .cloned()
        .collect();

    MergePlan {
        merged,
        store_locally,
        push_remote,
    }
}

/// What reconciliation should do about the homeland value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HomelandPlan {
    /// Remote has a value local lacks or contradicts: overwrite local
    AdoptRemote(CountryCode),
    /// Only local has a value: push it up
    PushLocal(CountryCode),
    /// Both sides already agree (possibly on "none")
    Keep,
}

/// Single-value variant of the merge rule: remote wins if present, else
/// the local value is pushed up.
#[must_use]
pub fn merge_homeland(
    local: Option<CountryCode>,
    remote: Option<CountryCode>,
) -> HomelandPlan {
    match (local, remote) {
        (_, Some(remote_code)) if local != Some(remote_code) => {
            HomelandPlan::AdoptRemote(remote_code)
        }
        (Some(local_code), None) => HomelandPlan::PushLocal(local_code),
        _ => HomelandPlan::Keep,
    }
}
