//! Mutation handlers.
//!
//! Every mutation validates first, writes the local store second, and
//! mirrors to the remote store last. The local write is the commit: a
//! remote failure is reported in the returned [`MirrorStatus`] but never
//! rolls the local write back. Failed mirrors are not queued; the next
//! reconciliation pass converges the two sides.

use crate::catalog;
use crate::db::{SelectionStore, SettingsStore};
use crate::error::{Error, Result, ValidationError};
use crate::models::{CountryCode, Homeland, Preferences, Profile, SelectionRecord};
use crate::remote::RemoteStore;
use crate::sync::SyncEngine;
use crate::util::unix_timestamp_millis;

/// How the remote mirror of a local mutation went
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorStatus {
    /// No session; the mutation was local-only
    Offline,
    /// The remote store reflects the mutation
    Synced,
    /// The remote write failed; local state is committed regardless
    Failed(String),
}

impl MirrorStatus {
    fn from_result(result: Result<()>) -> Self {
        match result {
            Ok(()) => Self::Synced,
            Err(error) => {
                tracing::warn!("remote mirror failed: {error}");
                Self::Failed(error.to_string())
            }
        }
    }
}

impl<Sel, Set, Rem> SyncEngine<Sel, Set, Rem>
where
    Sel: SelectionStore,
    Set: SettingsStore,
    Rem: RemoteStore,
{
    /// Mark a country as visited.
    ///
    /// Rejects unknown codes and the current homeland before any write.
    /// Re-selecting an already-visited code is a harmless upsert.
    pub async fn select(&self, code: CountryCode) -> Result<MirrorStatus> {
        let name = catalog::name_of(code)
            .ok_or_else(|| ValidationError::UnknownCode(code.as_str().to_string()))?;

        let homeland = self.settings.homeland().await.map_err(Error::Storage)?;
        if homeland.is_some_and(|h| h.code == code) {
            return Err(ValidationError::HomelandConflict(code).into());
        }

        let record = SelectionRecord::new(code, name);
        self.selections
            .upsert(&record)
            .await
            .map_err(Error::Storage)?;
        self.with_view(|view| {
            view.selections.insert(code, record.clone());
        });

        Ok(match self.mirror_profile().await {
            Ok(None) => MirrorStatus::Offline,
            Ok(Some(profile)) => {
                MirrorStatus::from_result(self.remote.save_selection(&profile, &record).await)
            }
            Err(error) => {
                tracing::warn!("could not resolve profile for mirror: {error}");
                MirrorStatus::Failed(error.to_string())
            }
        })
    }

    /// Unmark a visited country; a no-op if it was not selected
    pub async fn deselect(&self, code: CountryCode) -> Result<MirrorStatus> {
        if !catalog::is_valid(code) {
            return Err(ValidationError::UnknownCode(code.as_str().to_string()).into());
        }

        self.selections
            .remove(code)
            .await
            .map_err(Error::Storage)?;
        self.with_view(|view| {
            view.selections.remove(&code);
        });

        Ok(match self.mirror_profile().await {
            Ok(None) => MirrorStatus::Offline,
            Ok(Some(profile)) => {
                MirrorStatus::from_result(self.remote.remove_selection(&profile, code).await)
            }
            Err(error) => MirrorStatus::Failed(error.to_string()),
        })
    }

    /// Remove every visited country
    pub async fn clear_selections(&self) -> Result<MirrorStatus> {
        self.selections.clear().await.map_err(Error::Storage)?;
        self.with_view(|view| view.selections.clear());

        Ok(match self.mirror_profile().await {
            Ok(None) => MirrorStatus::Offline,
            Ok(Some(profile)) => {
                MirrorStatus::from_result(self.remote.clear_all(&profile).await)
            }
            Err(error) => MirrorStatus::Failed(error.to_string()),
        })
    }

    /// Set the homeland, evicting a clashing visited-selection.
    ///
    /// The eviction and the homeland write are one logical operation:
    /// a country is never both homeland and visited.
    pub async fn set_homeland(&self, code: CountryCode) -> Result<MirrorStatus> {
        let name = catalog::name_of(code)
            .ok_or_else(|| ValidationError::UnknownCode(code.as_str().to_string()))?;

        let evicted = self.selections.has(code).await.map_err(Error::Storage)?;
        if evicted {
            self.selections
                .remove(code)
                .await
                .map_err(Error::Storage)?;
            self.with_view(|view| {
                view.selections.remove(&code);
            });
        }

        let homeland = Homeland {
            code,
            name: name.to_string(),
            set_at: unix_timestamp_millis(),
        };
        self.settings
            .set_homeland(&homeland)
            .await
            .map_err(Error::Storage)?;
        self.with_view(|view| view.homeland = Some(homeland.clone()));

        Ok(match self.mirror_profile().await {
            Ok(None) => MirrorStatus::Offline,
            Ok(Some(profile)) => {
                let mirrored = self.mirror_homeland(&profile, code, evicted).await;
                MirrorStatus::from_result(mirrored)
            }
            Err(error) => MirrorStatus::Failed(error.to_string()),
        })
    }

    async fn mirror_homeland(
        &self,
        profile: &Profile,
        code: CountryCode,
        evicted: bool,
    ) -> Result<()> {
        if evicted {
            self.remote.remove_selection(profile, code).await?;
        }
        let updated = self.remote.set_homeland(profile, code).await?;
        self.cache_profile(updated);
        Ok(())
    }

    /// Clear the homeland; a no-op if unset
    pub async fn clear_homeland(&self) -> Result<MirrorStatus> {
        self.settings
            .clear_homeland()
            .await
            .map_err(Error::Storage)?;
        self.with_view(|view| view.homeland = None);

        Ok(match self.mirror_profile().await {
            Ok(None) => MirrorStatus::Offline,
            Ok(Some(profile)) => {
                let result = match self.remote.clear_homeland(&profile).await {
                    Ok(updated) => {
                        self.cache_profile(updated);
                        Ok(())
                    }
                    Err(error) => Err(error),
                };
                MirrorStatus::from_result(result)
            }
            Err(error) => MirrorStatus::Failed(error.to_string()),
        })
    }

    /// Flip the profile's public-sharing flag, returning the new value.
    ///
    /// Sharing is a remote-only concept, so this is the one mutation that
    /// requires a session.
    pub async fn toggle_sharing(&self) -> Result<bool> {
        let profile = self.mirror_profile().await?.ok_or(Error::AuthRequired)?;
        let shared = self.remote.toggle_sharing(&profile).await?;
        self.cache_profile(Profile { shared, ..profile });
        Ok(shared)
    }

    /// Record that the welcome screen was dismissed (local-only)
    pub async fn mark_welcome_seen(&self) -> Result<()> {
        self.settings
            .mark_welcome_seen()
            .await
            .map_err(Error::Storage)
    }

    /// Overwrite the display preferences (local-only)
    pub async fn set_preferences(&self, prefs: &Preferences) -> Result<()> {
        self.settings
            .set_preferences(prefs)
            .await
            .map_err(Error::Storage)
    }

    /// The profile to mirror against: `None` when signed out, resolved
    /// lazily (and cached) on the first authenticated mutation
    async fn mirror_profile(&self) -> Result<Option<Profile>> {
        let Some(session) = self.session_snapshot() else {
            return Ok(None);
        };
        if let Some(profile) = self.profile_snapshot() {
            return Ok(Some(profile));
        }
        let profile = self.remote.ensure_profile(&session.user.id).await?;
        self.cache_profile(profile.clone());
        Ok(Some(profile))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::sync::testutil::{
        session, MemoryRemoteStore, MemorySelectionStore, MemorySettingsStore,
    };
    use std::sync::atomic::Ordering;

    type TestEngine = SyncEngine<MemorySelectionStore, MemorySettingsStore, MemoryRemoteStore>;

    fn engine() -> TestEngine {
        SyncEngine::new(
            MemorySelectionStore::default(),
            MemorySettingsStore::default(),
            MemoryRemoteStore::default(),
        )
    }

    async fn signed_in_engine() -> TestEngine {
        let engine = engine();
        engine.sign_in(session("u1")).await.unwrap();
        engine
    }

    fn code(value: &str) -> CountryCode {
        value.parse().unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn select_offline_is_local_only() {
        let engine = engine();

        let status = engine.select(code("FRA")).await.unwrap();
        assert_eq!(status, MirrorStatus::Offline);
        assert_eq!(engine.selections.codes(), vec!["FRA"]);
        assert!(engine.view().is_selected(code("FRA")));
        assert_eq!(
            engine.remote.save_calls.load(Ordering::SeqCst),
            0
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn select_mirrors_when_signed_in() {
        let engine = signed_in_engine().await;

        let status = engine.select(code("FRA")).await.unwrap();
        assert_eq!(status, MirrorStatus::Synced);
        assert_eq!(engine.remote.selection_codes("profile-u1"), vec!["FRA"]);

        // Name comes from the catalog, not the caller
        let view = engine.view();
        assert_eq!(view.selections[&code("FRA")].name, "France");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn select_rejects_unknown_code() {
        let engine = engine();

        let result = engine.select(code("ZZZ")).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::UnknownCode(_)))
        ));
        assert!(engine.selections.codes().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn select_rejects_current_homeland() {
        let engine = engine();
        engine.set_homeland(code("POL")).await.unwrap();

        let result = engine.select(code("POL")).await;
        assert!(matches!(
            result,
            Err(Error::Validation(ValidationError::HomelandConflict(_)))
        ));
        assert!(engine.selections.codes().is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn select_survives_remote_outage() {
        let engine = signed_in_engine().await;
        engine.remote.fail_saves.store(true, Ordering::SeqCst);

        let status = engine.select(code("FRA")).await.unwrap();
        assert!(matches!(status, MirrorStatus::Failed(_)));

        // The local write is the commit
        assert_eq!(engine.selections.codes(), vec!["FRA"]);
        assert!(engine.view().is_selected(code("FRA")));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn deselect_removes_both_sides() {
        let engine = signed_in_engine().await;
        engine.select(code("FRA")).await.unwrap();

        let status = engine.deselect(code("FRA")).await.unwrap();
        assert_eq!(status, MirrorStatus::Synced);
        assert!(engine.selections.codes().is_empty());
        assert!(engine.remote.selection_codes("profile-u1").is_empty());

        // Deselecting an absent code is a clean no-op
        let status = engine.deselect(code("FRA")).await.unwrap();
        assert_eq!(status, MirrorStatus::Synced);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn set_homeland_evicts_clashing_selection() {
        let engine = signed_in_engine().await;
        engine.select(code("ITA")).await.unwrap();

        let status = engine.set_homeland(code("ITA")).await.unwrap();
        assert_eq!(status, MirrorStatus::Synced);

        assert!(engine.selections.codes().is_empty());
        assert!(engine.remote.selection_codes("profile-u1").is_empty());
        assert_eq!(engine.remote.homeland_of("u1"), Some(code("ITA")));

        let view = engine.view();
        assert!(!view.is_selected(code("ITA")));
        assert_eq!(view.homeland.unwrap().name, "Italy");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_homeland_round_trip() {
        let engine = signed_in_engine().await;
        engine.set_homeland(code("POL")).await.unwrap();

        let status = engine.clear_homeland().await.unwrap();
        assert_eq!(status, MirrorStatus::Synced);
        assert!(engine.view().homeland.is_none());
        assert_eq!(engine.remote.homeland_of("u1"), None);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn clear_selections_partial_failure_converges_on_retry() {
        let engine = signed_in_engine().await;
        engine.select(code("FRA")).await.unwrap();
        engine.select(code("DEU")).await.unwrap();
        engine.select(code("ESP")).await.unwrap();

        // One remote row refuses to die this round
        *engine.remote.fail_delete_code.lock().unwrap() = Some(code("DEU"));

        let status = engine.clear_selections().await.unwrap();
        assert!(matches!(status, MirrorStatus::Failed(_)));
        // Local cleared fully; remote is partially cleared
        assert!(engine.selections.codes().is_empty());
        assert_eq!(engine.remote.selection_codes("profile-u1"), vec!["DEU"]);

        // A fresh selection is not blocked by the leftover
        engine.select(code("PRT")).await.unwrap();

        *engine.remote.fail_delete_code.lock().unwrap() = None;
        let status = engine.clear_selections().await.unwrap();
        assert_eq!(status, MirrorStatus::Synced);
        assert!(engine.remote.selection_codes("profile-u1").is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn toggle_sharing_requires_session() {
        let engine = engine();
        assert!(matches!(
            engine.toggle_sharing().await,
            Err(Error::AuthRequired)
        ));

        let engine = signed_in_engine().await;
        assert!(engine.toggle_sharing().await.unwrap());
        assert!(!engine.toggle_sharing().await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failed_mirror_is_not_queued_but_reconciliation_converges() {
        let engine = signed_in_engine().await;
        engine.remote.fail_saves.store(true, Ordering::SeqCst);
        engine.select(code("FRA")).await.unwrap();
        assert!(engine.remote.selection_codes("profile-u1").is_empty());

        // Connectivity returns; the next pass pushes the local-only record
        engine.remote.fail_saves.store(false, Ordering::SeqCst);
        engine.reconcile().await.unwrap();
        assert_eq!(engine.remote.selection_codes("profile-u1"), vec!["FRA"]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn welcome_and_preferences_are_local_only() {
        let engine = engine();

        engine.mark_welcome_seen().await.unwrap();
        assert!(engine.settings.has_seen_welcome().await.unwrap());

        let prefs = Preferences {
            show_labels: false,
            show_visited_count: true,
        };
        engine.set_preferences(&prefs).await.unwrap();
        assert_eq!(engine.settings.preferences().await.unwrap(), prefs);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn remote_error_message_surfaces_in_status() {
        let result: Result<()> = Err(RemoteError::Api("simulated outage (503)".into()).into());
        match MirrorStatus::from_result(result) {
            MirrorStatus::Failed(message) => assert!(message.contains("503")),
            other => panic!("unexpected status: {other:?}"),
        }
    }
}
