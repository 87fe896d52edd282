//! Remote profile store adapter.
//!
//! Talks to the account-scoped record API: one `profiles` collection (one
//! record per user, unique on `user` at the storage layer) and one
//! `selections` collection linked to it. The engine only needs
//! collection-scoped CRUD, equality filters, and single-field updates;
//! everything else about the backend is opaque.
//!
//! Every write requires a session and fails fast with
//! [`Error::AuthRequired`] without one. Network and server faults
//! propagate as [`RemoteError`] with no implicit retry — callers decide.

use std::sync::RwLock;

use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::AuthSession;
use crate::error::{Error, RemoteError, Result, ValidationError};
use crate::models::{CountryCode, Profile, SelectionRecord};
use crate::util::{compact_text, is_http_url, normalize_text_option};

const PROFILES: &str = "profiles";
const SELECTIONS: &str = "selections";
const PAGE_SIZE: usize = 200;

/// A profile together with its selections, as served by the public
/// share-link read path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharedProfile {
    pub profile: Profile,
    pub selections: Vec<SelectionRecord>,
}

/// Trait for the authenticated remote store (async)
///
/// Implemented by [`HttpRemoteStore`] in production and by in-memory
/// fakes in engine tests.
#[allow(async_fn_in_trait)]
pub trait RemoteStore {
    /// Install or clear the session used for authenticated calls
    fn set_session(&self, session: Option<AuthSession>);

    /// Fetch-or-create the profile for a user; idempotent.
    ///
    /// Duplicate creation under racing calls is prevented by the storage
    /// layer's uniqueness constraint on the user id, not by client
    /// locking: a conflicting create is answered by re-querying.
    async fn ensure_profile(&self, user_id: &str) -> Result<Profile>;

    /// Record a selection; checks for an existing `(profile, code)` row
    /// first so repeated saves never duplicate
    async fn save_selection(&self, profile: &Profile, record: &SelectionRecord) -> Result<()>;

    /// Delete the matching selection row(s); no-op if absent
    async fn remove_selection(&self, profile: &Profile, code: CountryCode) -> Result<()>;

    /// All selections for a profile, newest first
    async fn list_selections(&self, profile: &Profile) -> Result<Vec<SelectionRecord>>;

    /// Delete every selection for a profile, one row at a time.
    ///
    /// Not atomic: a failure partway leaves a partially-cleared set. Each
    /// delete is independently idempotent, so re-invoking finishes the
    /// job. Reports failure without aborting the remaining deletes.
    async fn clear_all(&self, profile: &Profile) -> Result<()>;

    /// Set the profile's homeland field
    async fn set_homeland(&self, profile: &Profile, code: CountryCode) -> Result<Profile>;

    /// Clear the profile's homeland field
    async fn clear_homeland(&self, profile: &Profile) -> Result<Profile>;

    /// Flip the sharing flag, returning the new value
    async fn toggle_sharing(&self, profile: &Profile) -> Result<bool>;

    /// Public read path for share links.
    ///
    /// Returns `Ok(None)` both when the profile does not exist and when
    /// it is not shared — deliberately indistinguishable, so private
    /// profiles do not leak their existence.
    async fn get_shared_profile(&self, profile_id: &str) -> Result<Option<SharedProfile>>;
}

/// HTTP implementation of [`RemoteStore`] over the record API
pub struct HttpRemoteStore {
    base_url: String,
    client: Client,
    token: RwLock<Option<String>>,
}

impl HttpRemoteStore {
    /// Create a store for the given API base URL
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            base_url,
            client: Client::builder()
                .build()
                .map_err(RemoteError::Http)?,
            token: RwLock::new(None),
        })
    }

    fn records_url(&self, collection: &str) -> String {
        format!("{}/api/collections/{collection}/records", self.base_url)
    }

    fn record_url(&self, collection: &str, id: &str) -> String {
        format!(
            "{}/api/collections/{collection}/records/{}",
            self.base_url,
            urlencoding::encode(id)
        )
    }

    fn bearer(&self) -> Result<String> {
        self.token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .ok_or(Error::AuthRequired)
    }

    fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        Ok(request.bearer_auth(self.bearer()?))
    }

    async fn send_json<T: DeserializeOwned>(request: RequestBuilder) -> Result<T> {
        let response = request.send().await.map_err(RemoteError::Http)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body).into());
        }
        Ok(response
            .json::<T>()
            .await
            .map_err(RemoteError::Http)?)
    }

    async fn send_unit(request: RequestBuilder) -> Result<()> {
        let response = request.send().await.map_err(RemoteError::Http)?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status, &body).into());
        }
        Ok(())
    }

    async fn find_profile(&self, user_id: &str) -> Result<Option<Profile>> {
        let filter = filter_expr(&[("user", user_id)]);
        let request = self
            .authed(self.client.get(self.records_url(PROFILES)))?
            .query(&[("filter", filter.as_str()), ("perPage", "1")]);
        let page: ListPage<ProfileRow> = Self::send_json(request).await?;
        Ok(page.items.into_iter().next().map(ProfileRow::into_profile))
    }

    async fn find_selection_rows(
        &self,
        profile: &Profile,
        code: Option<CountryCode>,
    ) -> Result<Vec<SelectionRow>> {
        let mut pairs = vec![("profile", profile.id.clone())];
        if let Some(code) = code {
            pairs.push(("code", code.as_str().to_string()));
        }
        let borrowed: Vec<(&str, &str)> =
            pairs.iter().map(|(k, v)| (*k, v.as_str())).collect();
        let filter = filter_expr(&borrowed);

        let mut rows = Vec::new();
        let mut page = 1usize;
        loop {
            let request = self
                .authed(self.client.get(self.records_url(SELECTIONS)))?
                .query(&[
                    ("filter", filter.as_str()),
                    ("sort", "-created"),
                    ("page", &page.to_string()),
                    ("perPage", &PAGE_SIZE.to_string()),
                ]);
            let response: ListPage<SelectionRow> = Self::send_json(request).await?;
            let total_pages = response.total_pages;
            rows.extend(response.items);
            if page >= total_pages.max(1) {
                break;
            }
            page += 1;
        }
        Ok(rows)
    }

    async fn patch_profile(&self, profile_id: &str, body: serde_json::Value) -> Result<Profile> {
        let request = self
            .authed(self.client.patch(self.record_url(PROFILES, profile_id)))?
            .json(&body);
        let row: ProfileRow = Self::send_json(request).await?;
        Ok(row.into_profile())
    }
}

impl RemoteStore for HttpRemoteStore {
    fn set_session(&self, session: Option<AuthSession>) {
        if let Ok(mut guard) = self.token.write() {
            *guard = session.map(|s| s.access_token);
        }
    }

    async fn ensure_profile(&self, user_id: &str) -> Result<Profile> {
        let user_id = user_id.trim();
        if user_id.is_empty() {
            return Err(ValidationError::InvalidInput("empty user id".into()).into());
        }

        if let Some(profile) = self.find_profile(user_id).await? {
            return Ok(profile);
        }

        let body = serde_json::json!({
            "user": user_id,
            "shared": false,
        });
        let request = self
            .authed(self.client.post(self.records_url(PROFILES)))?
            .json(&body);
        match Self::send_json::<ProfileRow>(request).await {
            Ok(row) => Ok(row.into_profile()),
            Err(create_err) => {
                // A racing ensure-call may have won against the unique
                // index on `user`; the re-query resolves that case.
                if let Some(profile) = self.find_profile(user_id).await? {
                    tracing::debug!("profile create raced, using existing record");
                    Ok(profile)
                } else {
                    Err(create_err)
                }
            }
        }
    }

    async fn save_selection(&self, profile: &Profile, record: &SelectionRecord) -> Result<()> {
        let existing = self.find_selection_rows(profile, Some(record.code)).await?;
        if !existing.is_empty() {
            return Ok(());
        }

        let body = serde_json::json!({
            "profile": profile.id,
            "code": record.code,
            "name": record.name,
            "selected_at": record.selected_at,
        });
        let request = self
            .authed(self.client.post(self.records_url(SELECTIONS)))?
            .json(&body);
        Self::send_unit(request).await
    }

    async fn remove_selection(&self, profile: &Profile, code: CountryCode) -> Result<()> {
        let rows = self.find_selection_rows(profile, Some(code)).await?;
        for row in rows {
            let request = self.authed(self.client.delete(self.record_url(SELECTIONS, &row.id)))?;
            Self::send_unit(request).await?;
        }
        Ok(())
    }

    async fn list_selections(&self, profile: &Profile) -> Result<Vec<SelectionRecord>> {
        let rows = self.find_selection_rows(profile, None).await?;
        Ok(rows.into_iter().filter_map(SelectionRow::into_record).collect())
    }

    async fn clear_all(&self, profile: &Profile) -> Result<()> {
        let rows = self.find_selection_rows(profile, None).await?;
        let total = rows.len();
        let mut failed = 0usize;
        for row in rows {
            let request = self.authed(self.client.delete(self.record_url(SELECTIONS, &row.id)))?;
            if let Err(error) = Self::send_unit(request).await {
                tracing::warn!("failed to delete selection {}: {error}", row.id);
                failed += 1;
            }
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
        self.patch_profile(
            &profile.id,
            serde_json::json!({ "homeland_code": code }),
        )
        .await
    }

    async fn clear_homeland(&self, profile: &Profile) -> Result<Profile> {
        self.patch_profile(
            &profile.id,
            serde_json::json!({ "homeland_code": serde_json::Value::Null }),
        )
        .await
    }

    async fn toggle_sharing(&self, profile: &Profile) -> Result<bool> {
        let updated = self
            .patch_profile(
                &profile.id,
                serde_json::json!({ "shared": !profile.shared }),
            )
            .await?;
        Ok(updated.shared)
    }

    async fn get_shared_profile(&self, profile_id: &str) -> Result<Option<SharedProfile>> {
        // Public path: no bearer token. The API's access rules answer
        // not-found and not-shared with the same denial.
        let response = self
            .client
            .get(self.record_url(PROFILES, profile_id))
            .send()
            .await
            .map_err(RemoteError::Http)?;

        if is_denial(response.status()) {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)).into());
        }

        let row: ProfileRow = response.json().await.map_err(RemoteError::Http)?;
        let profile = row.into_profile();
        if !profile.shared {
            return Ok(None);
        }

        let filter = filter_expr(&[("profile", &profile.id)]);
        let response = self
            .client
            .get(self.records_url(SELECTIONS))
            .query(&[
                ("filter", filter.as_str()),
                ("sort", "-created"),
                ("perPage", &PAGE_SIZE.to_string()),
            ])
            .send()
            .await
            .map_err(RemoteError::Http)?;

        if is_denial(response.status()) {
            return Ok(None);
        }
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Api(parse_api_error(status, &body)).into());
        }

        let page: ListPage<SelectionRow> = response.json().await.map_err(RemoteError::Http)?;
        Ok(Some(SharedProfile {
            profile,
            selections: page
                .items
                .into_iter()
                .filter_map(SelectionRow::into_record)
                .collect(),
        }))
    }
}

/// Build the public share URL for a profile
#[must_use]
pub fn share_url(app_base_url: &str, profile_id: &str) -> String {
    format!(
        "{}/shared/{}",
        app_base_url.trim_end_matches('/'),
        urlencoding::encode(profile_id)
    )
}

/// Build an equality-filter expression: `a="1" && b="2"`
fn filter_expr(pairs: &[(&str, &str)]) -> String {
    pairs
        .iter()
        .map(|(field, value)| format!("{field}=\"{}\"", value.replace('"', "\\\"")))
        .collect::<Vec<_>>()
        .join(" && ")
}

fn normalize_base_url(raw: String) -> Result<String> {
    let trimmed = raw.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ValidationError::InvalidInput("remote base URL must not be empty".into()).into());
    }
    if !is_http_url(trimmed) {
        return Err(ValidationError::InvalidInput(
            "remote base URL must include http:// or https://".into(),
        )
        .into());
    }
    Ok(trimmed.to_string())
}

/// Denials on the public read path that must stay indistinguishable
const fn is_denial(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::NOT_FOUND | StatusCode::FORBIDDEN | StatusCode::BAD_REQUEST
    )
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: Option<String>,
    message: Option<String>,
}

/// Classify a non-success status on an authenticated record path
fn api_error(status: StatusCode, body: &str) -> RemoteError {
    if status == StatusCode::NOT_FOUND {
        return RemoteError::NotFound(parse_api_error(status, body));
    }
    RemoteError::Api(parse_api_error(status, body))
}

fn parse_api_error(status: StatusCode, body: &str) -> String {
    if let Ok(payload) = serde_json::from_str::<ApiErrorBody>(body) {
        if let Some(message) = payload.message.or(payload.error) {
            return format!("{} ({})", message.trim(), status.as_u16());
        }
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        format!("HTTP {}", status.as_u16())
    } else {
        format!("{} ({})", compact_text(trimmed), status.as_u16())
    }
}

#[derive(Debug, Deserialize)]
struct ListPage<T> {
    items: Vec<T>,
    #[serde(rename = "totalPages", default)]
    total_pages: usize,
}

#[derive(Debug, Deserialize)]
struct ProfileRow {
    id: String,
    user: String,
    #[serde(default)]
    shared: bool,
    #[serde(default)]
    homeland_code: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
}

impl ProfileRow {
    fn into_profile(self) -> Profile {
        let homeland = self.homeland_code.as_deref().and_then(|code| {
            code.parse::<CountryCode>()
                .map_err(|_| tracing::warn!("ignoring bad homeland code on profile: {code}"))
                .ok()
        });
        Profile {
            id: self.id,
            user_id: self.user,
            shared: self.shared,
            homeland,
            display_name: normalize_text_option(self.display_name).unwrap_or_default(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct SelectionRow {
    id: String,
    code: String,
    name: String,
    #[serde(default)]
    selected_at: i64,
}

impl SelectionRow {
    fn into_record(self) -> Option<SelectionRecord> {
        let code = self
            .code
            .parse::<CountryCode>()
            .map_err(|_| tracing::warn!("ignoring bad country code on selection: {}", self.code))
            .ok()?;
        Some(SelectionRecord {
            code,
            name: self.name,
            selected_at: self.selected_at,
        })
    }
}
