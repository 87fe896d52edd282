//! Reconciliation engine.
//!
//! On the signed-out → signed-in transition (or app init while already
//! signed in) the engine reads both selection stores, computes the merged
//! set with the pure rules in [`merge`], and writes the resolution back to
//! both sides: remote-only records are upserted locally, local-only
//! records are pushed up. The pass is best-effort per record and
//! idempotent as a whole — running it twice with no intervening mutation
//! produces zero additional remote writes.
//!
//! Stores are injected, not global: any [`SelectionStore`] /
//! [`SettingsStore`] / [`RemoteStore`] implementation works, which is how
//! the tests substitute in-memory fakes.

pub mod merge;
mod mutations;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::watch;

use crate::auth::{AuthSession, AuthState};
use crate::catalog;
use crate::db::{SelectionStore, SettingsStore};
use crate::error::{Error, Result};
use crate::models::{CountryCode, Homeland, Profile, SelectionRecord};
use crate::remote::RemoteStore;
use crate::util::unix_timestamp_millis;

pub use merge::{merge_homeland, merge_selections, HomelandPlan, MergePlan};
pub use mutations::MirrorStatus;

/// Snapshot of the in-memory UI state
#[derive(Debug, Clone, Default)]
pub struct SelectionView {
    /// Visited countries, keyed by code
    pub selections: HashMap<CountryCode, SelectionRecord>,
    /// Homeland, if set
    pub homeland: Option<Homeland>,
}

impl SelectionView {
    /// Whether a code is currently marked visited
    #[must_use]
    pub fn is_selected(&self, code: CountryCode) -> bool {
        self.selections.contains_key(&code)
    }

    /// Number of visited countries
    #[must_use]
    pub fn visited_count(&self) -> usize {
        self.selections.len()
    }
}

/// What a reconciliation pass did
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileSummary {
    /// Another pass was already in flight; this call collapsed into it
    Skipped,
    /// The pass ran to completion
    Completed(ReconcileReport),
}

/// Counters and the homeland decision from a completed pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReconcileReport {
    /// Size of the merged selection set
    pub merged: usize,
    /// Remote-only records upserted into the local store
    pub stored_locally: usize,
    /// Local-only records pushed to the remote store
    pub pushed: usize,
    /// Per-code pushes that failed (logged and skipped)
    pub push_failures: usize,
    /// How the homeland value was reconciled
    pub homeland: HomelandOutcome,
}

/// Result of homeland reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HomelandOutcome {
    /// Remote value overwrote the local one
    AdoptedRemote(CountryCode),
    /// Local value was pushed to the remote profile
    PushedLocal(CountryCode),
    /// The push was attempted and failed (non-fatal)
    PushFailed(CountryCode),
    /// Both sides already agreed
    #[default]
    Unchanged,
}

/// The reconciliation engine and mutation entry point.
///
/// Owns no data of its own: all state lives behind the injected store
/// interfaces, plus a small in-memory view for the UI.
pub struct SyncEngine<Sel, Set, Rem> {
    selections: Sel,
    settings: Set,
    remote: Rem,
    session: Mutex<Option<AuthSession>>,
    profile: Mutex<Option<Profile>>,
    reconciling: AtomicBool,
    view: Mutex<SelectionView>,
}

impl<Sel, Set, Rem> SyncEngine<Sel, Set, Rem>
where
    Sel: SelectionStore,
    Set: SettingsStore,
    Rem: RemoteStore,
{
    /// Create an engine over the given stores
    pub fn new(selections: Sel, settings: Set, remote: Rem) -> Self {
        Self {
            selections,
            settings,
            remote,
            session: Mutex::new(None),
            profile: Mutex::new(None),
            reconciling: AtomicBool::new(false),
            view: Mutex::new(SelectionView::default()),
        }
    }

    /// Current UI state snapshot
    pub fn view(&self) -> SelectionView {
        self.view.lock().map(|v| v.clone()).unwrap_or_default()
    }

    /// Rebuild the in-memory view from the local stores.
    ///
    /// Called on app init and after sign-out; the local stores are the
    /// offline fallback and are never cleared by the engine.
    pub async fn refresh_from_local(&self) -> Result<()> {
        let records = self.selections.list().await.map_err(Error::Storage)?;
        let homeland = self.settings.homeland().await.map_err(Error::Storage)?;

        if let Ok(mut view) = self.view.lock() {
            view.selections = records.into_iter().map(|r| (r.code, r)).collect();
            view.homeland = homeland;
        }
        Ok(())
    }

    /// React to a sign-in: install the session and reconcile
    pub async fn sign_in(&self, session: AuthSession) -> Result<ReconcileSummary> {
        self.remote.set_session(Some(session.clone()));
        if let Ok(mut guard) = self.session.lock() {
            *guard = Some(session);
        }
        self.reconcile().await
    }

    /// React to a sign-out: drop session-scoped state.
    ///
    /// The in-memory view is rebuilt from the local stores, which remain
    /// intact as the offline fallback.
    pub async fn sign_out(&self) -> Result<()> {
        self.remote.set_session(None);
        if let Ok(mut guard) = self.session.lock() {
            *guard = None;
        }
        if let Ok(mut guard) = self.profile.lock() {
            *guard = None;
        }
        self.refresh_from_local().await
    }

    /// Consume auth-state transitions until the channel closes.
    ///
    /// Runs the initial reconciliation if the app starts already signed
    /// in. Dropping the sender ends the loop (the unsubscribe path).
    pub async fn drive(&self, mut rx: watch::Receiver<AuthState>) {
        let initial = rx.borrow_and_update().clone();
        self.apply_auth_state(initial).await;

        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            self.apply_auth_state(state).await;
        }
        tracing::debug!("auth channel closed, sync engine loop ending");
    }

    async fn apply_auth_state(&self, state: AuthState) {
        match state {
            AuthState::SignedIn(session) => {
                if let Err(error) = self.sign_in(session).await {
                    tracing::warn!("reconciliation on sign-in failed: {error}");
                }
            }
            AuthState::SignedOut => {
                if let Err(error) = self.sign_out().await {
                    tracing::warn!("local refresh on sign-out failed: {error}");
                }
            }
        }
    }

    /// Run one reconciliation pass.
    ///
    /// Re-entrant calls collapse: only one pass is in flight at a time,
    /// so racing triggers cannot duplicate remote writes. A failure to
    /// fetch the remote set aborts the pass with local state untouched.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let session = self.session_snapshot().ok_or(Error::AuthRequired)?;

        if self.reconciling.swap(true, Ordering::AcqRel) {
            tracing::debug!("reconciliation already in flight, skipping");
            return Ok(ReconcileSummary::Skipped);
        }
        let guard = InFlight(&self.reconciling);

        let report = self.reconcile_inner(&session).await;
        drop(guard);
        report.map(ReconcileSummary::Completed)
    }

    async fn reconcile_inner(&self, session: &AuthSession) -> Result<ReconcileReport> {
        let profile = self.profile_for(session).await?;

        // A hard failure here aborts the whole pass: merging against an
        // incomplete remote view could push spurious records.
        let remote_records = self.remote.list_selections(&profile).await?;
        let local_records = self.selections.list().await.map_err(Error::Storage)?;

        let mut plan = merge::merge_selections(&local_records, &remote_records);

        let mut stored_locally = 0usize;
        for record in &plan.store_locally {
            match self.selections.upsert(record).await {
                Ok(()) => stored_locally += 1,
                Err(error) => {
                    tracing::warn!("failed to store {} locally: {error}", record.code);
                }
            }
        }

        let mut pushed = 0usize;
        let mut push_failures = 0usize;
        for record in &plan.push_remote {
            // The local state may have changed under this pass; only
            // push codes that are still selected.
            match self.selections.has(record.code).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(error) => {
                    tracing::warn!("could not re-check {}: {error}", record.code);
                    continue;
                }
            }
            match self.remote.save_selection(&profile, record).await {
                Ok(()) => pushed += 1,
                Err(error) => {
                    tracing::warn!("failed to push {}: {error}", record.code);
                    push_failures += 1;
                }
            }
        }

        let local_homeland = self.settings.homeland().await.map_err(Error::Storage)?;
        let homeland_outcome = self
            .reconcile_homeland(&profile, local_homeland.as_ref(), &mut plan)
            .await;

        let homeland_view = match homeland_outcome {
            HomelandOutcome::AdoptedRemote(_) => {
                self.settings.homeland().await.map_err(Error::Storage)?
            }
            _ => local_homeland,
        };
        if let Ok(mut view) = self.view.lock() {
            view.selections = plan.merged.clone();
            view.homeland = homeland_view;
        }

        let report = ReconcileReport {
            merged: plan.merged.len(),
            stored_locally,
            pushed,
            push_failures,
            homeland: homeland_outcome,
        };
        tracing::info!(
            "reconciled {} selections ({} stored locally, {} pushed, {} push failures)",
            report.merged,
            report.stored_locally,
            report.pushed,
            report.push_failures
        );
        Ok(report)
    }

    /// Apply the single-value merge rule to the homeland.
    ///
    /// Adopting a remote homeland follows the same mutual-exclusion rule
    /// as setting one: a clashing visited-selection is evicted locally.
    async fn reconcile_homeland(
        &self,
        profile: &Profile,
        local: Option<&Homeland>,
        plan: &mut MergePlan,
    ) -> HomelandOutcome {
        match merge::merge_homeland(local.map(|h| h.code), profile.homeland) {
            HomelandPlan::AdoptRemote(code) => {
                if plan.merged.remove(&code).is_some() {
                    tracing::warn!("remote homeland {code} clashed with a selection, evicting");
                    if let Err(error) = self.selections.remove(code).await {
                        tracing::warn!("failed to evict {code} locally: {error}");
                    }
                }
                let homeland = Homeland {
                    code,
                    name: catalog::name_of(code).unwrap_or_default().to_string(),
                    set_at: unix_timestamp_millis(),
                };
                if let Err(error) = self.settings.set_homeland(&homeland).await {
                    tracing::warn!("failed to adopt remote homeland {code}: {error}");
                    return HomelandOutcome::Unchanged;
                }
                HomelandOutcome::AdoptedRemote(code)
            }
            HomelandPlan::PushLocal(code) => match self.remote.set_homeland(profile, code).await {
                Ok(updated) => {
                    self.cache_profile(updated);
                    HomelandOutcome::PushedLocal(code)
                }
                Err(error) => {
                    tracing::warn!("failed to push homeland {code}: {error}");
                    HomelandOutcome::PushFailed(code)
                }
            },
            HomelandPlan::Keep => HomelandOutcome::Unchanged,
        }
    }

    /// The profile for the active session, fetched-or-created lazily and
    /// cached until sign-out
    async fn profile_for(&self, session: &AuthSession) -> Result<Profile> {
        if let Some(profile) = self.profile_snapshot() {
            return Ok(profile);
        }
        let profile = self.remote.ensure_profile(&session.user.id).await?;
        self.cache_profile(profile.clone());
        Ok(profile)
    }

    pub(crate) fn session_snapshot(&self) -> Option<AuthSession> {
        self.session.lock().ok().and_then(|guard| guard.clone())
    }

    pub(crate) fn profile_snapshot(&self) -> Option<Profile> {
        self.profile.lock().ok().and_then(|guard| guard.clone())
    }

    pub(crate) fn cache_profile(&self, profile: Profile) {
        if let Ok(mut guard) = self.profile.lock() {
            *guard = Some(profile);
        }
    }

    pub(crate) fn with_view(&self, f: impl FnOnce(&mut SelectionView)) {
        if let Ok(mut view) = self.view.lock() {
            f(&mut view);
        }
    }
}

/// Resets the in-flight flag when a pass ends, on every exit path
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
pub(crate) mod testutil {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::auth::{AuthSession, AuthUser};
    use crate::db::{SelectionStore, SettingsStore};
    use crate::error::{Error, RemoteError, Result, StorageError};
    use crate::models::{
        CountryCode, Homeland, LocalSettings, Preferences, Profile, SelectionRecord,
    };
    use crate::remote::{RemoteStore, SharedProfile};

    pub fn session(user_id: &str) -> AuthSession {
        AuthSession {
            access_token: "token".to_string(),
            user: AuthUser {
                id: user_id.to_string(),
                email: None,
                display_name: None,
            },
        }
    }

    pub fn record(code: &str, name: &str) -> SelectionRecord {
        SelectionRecord {
            code: code.parse().unwrap(),
            name: name.into(),
            selected_at: 1_000,
        }
    }

    /// In-memory [`SelectionStore`] fake
    #[derive(Default)]
    pub struct MemorySelectionStore {
        rows: Mutex<HashMap<CountryCode, SelectionRecord>>,
    }

    impl MemorySelectionStore {
        pub fn codes(&self) -> Vec<String> {
            let mut codes: Vec<_> = self
                .rows
                .lock()
                .unwrap()
                .keys()
                .map(|c| c.as_str().to_string())
                .collect();
            codes.sort();
            codes
        }
    }

    impl SelectionStore for MemorySelectionStore {
        async fn upsert(&self, record: &SelectionRecord) -> Result<(), StorageError> {
            self.rows
                .lock()
                .unwrap()
                .insert(record.code, record.clone());
            Ok(())
        }

        async fn remove(&self, code: CountryCode) -> Result<(), StorageError> {
            self.rows.lock().unwrap().remove(&code);
            Ok(())
        }

        async fn list(&self) -> Result<Vec<SelectionRecord>, StorageError> {
            Ok(self.rows.lock().unwrap().values().cloned().collect())
        }

        async fn has(&self, code: CountryCode) -> Result<bool, StorageError> {
            Ok(self.rows.lock().unwrap().contains_key(&code))
        }

        async fn clear(&self) -> Result<(), StorageError> {
            self.rows.lock().unwrap().clear();
            Ok(())
        }
    }

    /// In-memory [`SettingsStore`] fake
    #[derive(Default)]
    pub struct MemorySettingsStore {
        settings: Mutex<LocalSettings>,
    }

    impl SettingsStore for MemorySettingsStore {
        async fn load(&self) -> Result<LocalSettings, StorageError> {
            Ok(self.settings.lock().unwrap().clone())
        }

        async fn homeland(&self) -> Result<Option<Homeland>, StorageError> {
            Ok(self.settings.lock().unwrap().homeland.clone())
        }

        async fn set_homeland(&self, homeland: &Homeland) -> Result<(), StorageError> {
            self.settings.lock().unwrap().homeland = Some(homeland.clone());
            Ok(())
        }

        async fn clear_homeland(&self) -> Result<(), StorageError> {
            self.settings.lock().unwrap().homeland = None;
            Ok(())
        }

        async fn has_seen_welcome(&self) -> Result<bool, StorageError> {
            Ok(self.settings.lock().unwrap().has_seen_welcome)
        }

        async fn mark_welcome_seen(&self) -> Result<(), StorageError> {
            self.settings.lock().unwrap().has_seen_welcome = true;
            Ok(())
        }

        async fn preferences(&self) -> Result<Preferences, StorageError> {
            Ok(self.settings.lock().unwrap().preferences)
        }

        async fn set_preferences(&self, prefs: &Preferences) -> Result<(), StorageError> {
            self.settings.lock().unwrap().preferences = *prefs;
            Ok(())
        }
    }

    /// In-memory [`RemoteStore`] fake.
    ///
    /// Profiles are keyed by user id, which models the storage-layer
    /// uniqueness constraint. Failure toggles simulate network faults.
    #[derive(Default)]
    pub struct MemoryRemoteStore {
        authed: AtomicBool,
        profiles: Mutex<HashMap<String, Profile>>,
        selections: Mutex<Vec<(String, SelectionRecord)>>,
        pub save_calls: AtomicUsize,
        pub fail_saves: AtomicBool,
        pub fail_lists: AtomicBool,
        pub fail_delete_code: Mutex<Option<CountryCode>>,
    }

    impl MemoryRemoteStore {
        pub fn authed() -> Self {
            let store = Self::default();
            store.authed.store(true, Ordering::SeqCst);
            store
        }

        fn require_auth(&self) -> Result<()> {
            if self.authed.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(Error::AuthRequired)
            }
        }

        pub fn seed_selection(&self, profile_id: &str, record: SelectionRecord) {
            self.selections
                .lock()
                .unwrap()
                .push((profile_id.to_string(), record));
        }

        pub fn selection_codes(&self, profile_id: &str) -> Vec<String> {
            let mut codes: Vec<_> = self
                .selections
                .lock()
                .unwrap()
                .iter()
                .filter(|(pid, _)| pid == profile_id)
                .map(|(_, r)| r.code.as_str().to_string())
                .collect();
            codes.sort();
            codes
        }

        pub fn profile_count(&self) -> usize {
            self.profiles.lock().unwrap().len()
        }

        pub fn homeland_of(&self, user_id: &str) -> Option<CountryCode> {
            self.profiles
                .lock()
                .unwrap()
                .get(user_id)
                .and_then(|p| p.homeland)
        }

        pub fn set_remote_homeland(&self, user_id: &str, code: &str) {
            if let Some(profile) = self.profiles.lock().unwrap().get_mut(user_id) {
                profile.homeland = Some(code.parse().unwrap());
            }
        }
    }

    impl RemoteStore for MemoryRemoteStore {
        fn set_session(&self, session: Option<AuthSession>) {
            self.authed.store(session.is_some(), Ordering::SeqCst);
        }

        async fn ensure_profile(&self, user_id: &str) -> Result<Profile> {
            self.require_auth()?;
            let mut profiles = self.profiles.lock().unwrap();
            let profile = profiles
                .entry(user_id.to_string())
                .or_insert_with(|| Profile {
                    id: format!("profile-{user_id}"),
                    user_id: user_id.to_string(),
                    shared: false,
                    homeland: None,
                    display_name: String::new(),
                });
            Ok(profile.clone())
        }

        async fn save_selection(&self, profile: &Profile, record: &SelectionRecord) -> Result<()> {
            self.require_auth()?;
            self.save_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_saves.load(Ordering::SeqCst) {
                return Err(RemoteError::Api("simulated outage (503)".into()).into());
            }
            let mut selections = self.selections.lock().unwrap();
            let exists = selections
                .iter()
                .any(|(pid, r)| *pid == profile.id && r.code == record.code);
            if !exists {
                selections.push((profile.id.clone(), record.clone()));
            }
            Ok(())
        }

        async fn remove_selection(&self, profile: &Profile, code: CountryCode) -> Result<()> {
            self.require_auth()?;
            self.selections
                .lock()
                .unwrap()
                .retain(|(pid, r)| !(*pid == profile.id && r.code == code));
            Ok(())
        }

        async fn list_selections(&self, profile: &Profile) -> Result<Vec<SelectionRecord>> {
            self.require_auth()?;
            if self.fail_lists.load(Ordering::SeqCst) {
                return Err(RemoteError::Api("simulated outage (503)".into()).into());
            }
            Ok(self
                .selections
                .lock()
                .unwrap()
                .iter()
                .filter(|(pid, _)| *pid == profile.id)
                .map(|(_, r)| r.clone())
                .collect())
        }

        async fn clear_all(&self, profile: &Profile) -> Result<()> {
            self.require_auth()?;
            let rows: Vec<SelectionRecord> = self.list_selections(profile).await?;
            let poisoned = *self.fail_delete_code.lock().unwrap();
            let total = rows.len();
            let mut failed = 0usize;
            for row in rows {
                if poisoned == Some(row.code) {
                    failed += 1;
                    continue;
                }
                self.selections
                    .lock()
                    .unwrap()
                    .retain(|(pid, r)| !(*pid == profile.id && r.code == row.code));
            }
            if failed > 0 {
                return Err(RemoteError::Api(format!(
                    "cleared {} of {total} selections; re-invoke to finish",
                    total - failed
                ))
                .into());
            }
            Ok(())
        }

        async fn set_homeland(&self, profile: &Profile, code: CountryCode) -> Result<Profile> {
            self.require_auth()?;
            let mut profiles = self.profiles.lock().unwrap();
            let stored = profiles
                .get_mut(&profile.user_id)
                .ok_or_else(|| RemoteError::NotFound(profile.id.clone()))?;
            stored.homeland = Some(code);
            Ok(stored.clone())
        }

        async fn clear_homeland(&self, profile: &Profile) -> Result<Profile> {
            self.require_auth()?;
            let mut profiles = self.profiles.lock().unwrap();
            let stored = profiles
                .get_mut(&profile.user_id)
                .ok_or_else(|| RemoteError::NotFound(profile.id.clone()))?;
            stored.homeland = None;
            Ok(stored.clone())
        }

        async fn toggle_sharing(&self, profile: &Profile) -> Result<bool> {
            self.require_auth()?;
            let mut profiles = self.profiles.lock().unwrap();
            let stored = profiles
                .get_mut(&profile.user_id)
                .ok_or_else(|| RemoteError::NotFound(profile.id.clone()))?;
            stored.shared = !stored.shared;
            Ok(stored.shared)
        }

        async fn get_shared_profile(&self, profile_id: &str) -> Result<Option<SharedProfile>> {
            let profiles = self.profiles.lock().unwrap();
            let Some(profile) = profiles.values().find(|p| p.id == profile_id) else {
                return Ok(None);
            };
            if !profile.shared {
                return Ok(None);
            }
            let selections = self
                .selections
                .lock()
                .unwrap()
                .iter()
                .filter(|(pid, _)| pid == profile_id)
                .map(|(_, r)| r.clone())
                .collect();
            Ok(Some(SharedProfile {
                profile: profile.clone(),
                selections,
            }))
        }
    }
}
