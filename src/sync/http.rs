//! HttpTransport — reqwest implementation of [`SyncTransport`].
//!
//! Speaks the backend's sync API: batch push, cursor pull, and the sidebar
//! snapshot used for seeding. Auth material comes from an injected
//! [`TokenProvider`]; the transport attaches whatever the provider returns
//! and leaves token lifecycle to the host app.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::warn;

use crate::types::{campaign_slug, RemoteChange};

use super::types::{
    ChangeUpload, PullBatch, PushOutcome, SyncErrorKind, SyncTransport, SyncTransportError,
};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

// ============================================================================
// TokenProvider
// ============================================================================

/// Supplies auth material per request.
///
/// `None` from either method means the request goes out without that
/// header; the backend's 401 then surfaces as an `Auth`-kind error.
pub trait TokenProvider: Send + Sync {
    fn token(&self) -> Option<String>;
    fn user_id(&self) -> Option<String>;
}

/// Fixed token/user pair — for tools and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: Option<String>,
    user_id: Option<String>,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            token: Some(token.into()),
            user_id: Some(user_id.into()),
        }
    }

    /// Provider that sends no auth headers at all.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

impl TokenProvider for StaticTokenProvider {
    fn token(&self) -> Option<String> {
        self.token.clone()
    }

    fn user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}

// ============================================================================
// HttpTransport
// ============================================================================

pub struct HttpTransportOptions {
    /// Backend base URL, e.g. `https://api.example.com` (trailing slash ok).
    pub base_url: String,
    /// Per-request timeout in seconds (default: 30).
    pub timeout_secs: Option<u64>,
    pub provider: Arc<dyn TokenProvider>,
}

pub struct HttpTransport {
    base_url: String,
    client: reqwest::Client,
    provider: Arc<dyn TokenProvider>,
}

impl HttpTransport {
    pub fn new(options: HttpTransportOptions) -> Self {
        let timeout = Duration::from_secs(options.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();

        Self {
            base_url: options.base_url.trim_end_matches('/').to_string(),
            client,
            provider: options.provider,
        }
    }

    fn apply_auth(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        let mut builder = builder;
        if let Some(token) = self.provider.token() {
            builder = builder.bearer_auth(token);
        }
        if let Some(user_id) = self.provider.user_id() {
            builder = builder.header("X-User-Id", user_id);
        }
        builder
    }
}

#[async_trait]
impl SyncTransport for HttpTransport {
    async fn push_changes(
        &self,
        campaign: Option<&str>,
        changes: &[ChangeUpload],
    ) -> Result<PushOutcome, SyncTransportError> {
        let url = format!("{}/sync/{}", self.base_url, campaign_slug(campaign));

        let response = self
            .apply_auth(self.client.post(&url))
            .json(changes)
            .send()
            .await
            .map_err(|e| network_error("push", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("push", status));
        }

        let body: PushResponse = response
            .json()
            .await
            .map_err(|e| SyncTransportError::new(format!("push: invalid response: {e}")))?;

        // A 2xx without an explicit ack list acknowledges the whole batch.
        let acked = body
            .acked
            .unwrap_or_else(|| changes.iter().map(|c| c.id).collect());

        Ok(PushOutcome { acked })
    }

    async fn pull_changes(
        &self,
        campaign: Option<&str>,
        since: i64,
    ) -> Result<PullBatch, SyncTransportError> {
        let url = format!(
            "{}/sync/{}/since/{}",
            self.base_url,
            campaign_slug(campaign),
            since
        );

        let response = self
            .apply_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| network_error("pull", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("pull", status));
        }

        let body: PullResponse = response
            .json()
            .await
            .map_err(|e| SyncTransportError::new(format!("pull: invalid response: {e}")))?;

        let mut changes = Vec::with_capacity(body.changes.len());
        for mut raw in body.changes {
            if raw.get("entity").and_then(Value::as_str) == Some("edge") {
                if let Some(payload) = raw.get_mut("payload") {
                    normalize_edge_payload(payload);
                }
            }
            match serde_json::from_value::<RemoteChange>(raw) {
                Ok(change) => changes.push(change),
                // Records that aren't even change-shaped can never apply;
                // dropping them here keeps the cursor moving.
                Err(e) => warn!(error = %e, "dropping unparseable remote change"),
            }
        }

        Ok(PullBatch {
            changes,
            cursor: body.cursor,
        })
    }

    async fn fetch_snapshot(
        &self,
        campaign: Option<&str>,
    ) -> Result<Vec<Value>, SyncTransportError> {
        let url = format!(
            "{}/sync/{}/sidebar",
            self.base_url,
            campaign_slug(campaign)
        );

        let response = self
            .apply_auth(self.client.get(&url))
            .send()
            .await
            .map_err(|e| network_error("snapshot", &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(status_error("snapshot", status));
        }

        response
            .json()
            .await
            .map_err(|e| SyncTransportError::new(format!("snapshot: invalid response: {e}")))
    }
}

// ============================================================================
// Wire Shapes
// ============================================================================

#[derive(Debug, Deserialize)]
struct PushResponse {
    #[serde(default)]
    acked: Option<Vec<i64>>,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    #[serde(default)]
    changes: Vec<Value>,
    #[serde(default)]
    cursor: Option<i64>,
}

// ============================================================================
// Helpers
// ============================================================================

fn kind_for_status(status: reqwest::StatusCode) -> SyncErrorKind {
    match status.as_u16() {
        401 | 403 => SyncErrorKind::Auth,
        429 => SyncErrorKind::Capacity,
        s if (400..500).contains(&s) => SyncErrorKind::Permanent,
        _ => SyncErrorKind::Transient,
    }
}

fn status_error(context: &str, status: reqwest::StatusCode) -> SyncTransportError {
    SyncTransportError::with_kind(format!("{context}: HTTP {status}"), kind_for_status(status))
}

fn network_error(context: &str, e: &reqwest::Error) -> SyncTransportError {
    // Connect failures and timeouts; all retriable.
    SyncTransportError::with_kind(format!("{context}: {e}"), SyncErrorKind::Transient)
}

/// The backend's graph store emits edge payloads snake_cased; map them to
/// the camelCase keys the entity parsers expect. Existing camelCase keys
/// win over their snake twins.
fn normalize_edge_payload(payload: &mut Value) {
    const KEYS: [(&str, &str); 9] = [
        ("from_id", "fromId"),
        ("to_id", "toId"),
        ("rel_type", "relType"),
        ("from_title", "fromTitle"),
        ("to_title", "toTitle"),
        ("campaign_id", "campaignId"),
        ("campaign_ids", "campaignIds"),
        ("created_at", "createdAt"),
        ("updated_at", "updatedAt"),
    ];

    if let Some(map) = payload.as_object_mut() {
        for (snake, camel) in KEYS {
            if map.contains_key(camel) {
                map.remove(snake);
            } else if let Some(value) = map.remove(snake) {
                map.insert(camel.to_string(), value);
            }
        }
    }
}
