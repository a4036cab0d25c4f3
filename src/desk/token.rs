//! Access-token cache shared by every job that uses a profile.
//!
//! Each profile gets its own async mutex; whoever holds it refreshes while the
//! others wait and then reuse the fresh token.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use reqwest::{Client, Url};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::model::TokenResponse;
use super::DeskError;
use crate::config::Profile;

/// Tokens are considered stale this long before their reported expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;
const DEFAULT_LIFETIME_SECS: i64 = 3600;
/// Upper bound on the lifetime reported by the accounts server.
const MAX_LIFETIME_SECS: i64 = 86_400;

#[derive(Debug, Clone)]
struct CachedToken {
    value: String,
    expires_at: DateTime<Utc>,
}

impl CachedToken {
    fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now + ChronoDuration::seconds(EXPIRY_MARGIN_SECS) < self.expires_at
    }
}

fn expires_at(now: DateTime<Utc>, expires_in: Option<i64>) -> DateTime<Utc> {
    let lifetime = expires_in
        .unwrap_or(DEFAULT_LIFETIME_SECS)
        .clamp(0, MAX_LIFETIME_SECS);
    now + ChronoDuration::seconds(lifetime)
}

type Slot = Arc<Mutex<Option<CachedToken>>>;

pub struct TokenCache {
    http: Client,
    accounts_url: Url,
    slots: Mutex<HashMap<String, Slot>>,
}

impl TokenCache {
    pub fn new(http: Client, accounts_url: Url) -> Self {
        Self {
            http,
            accounts_url,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, profile_name: &str) -> Slot {
        let mut slots = self.slots.lock().await;
        slots.entry(profile_name.to_string()).or_default().clone()
    }

    /// Return a valid access token for `profile`, refreshing it at most once
    /// even when several jobs ask at the same time.
    pub async fn access_token(&self, profile: &Profile) -> Result<String, DeskError> {
        let slot = self.slot(&profile.name).await;
        let mut guard = slot.lock().await;
        if let Some(token) = guard.as_ref().filter(|t| t.is_fresh(Utc::now())) {
            return Ok(token.value.clone());
        }
        let fresh = self
            .refresh(profile)
            .await
            .map_err(|e| DeskError::Token(Box::new(e)))?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    /// Drop the cached token so the next call refreshes.
    pub async fn invalidate(&self, profile_name: &str) {
        let slot = self.slot(profile_name).await;
        slot.lock().await.take();
        debug!(profile = profile_name, "access token invalidated");
    }

    pub fn build_refresh_request(&self, profile: &Profile) -> Result<reqwest::Request, DeskError> {
        let endpoint = self
            .accounts_url
            .join("oauth/v2/token")
            .map_err(|e| DeskError::Invalid(format!("invalid accounts URL: {e}")))?;
        self.http
            .post(endpoint)
            .query(&[
                ("refresh_token", profile.refresh_token.as_str()),
                ("client_id", profile.client_id.as_str()),
                ("client_secret", profile.client_secret.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .build()
            .map_err(DeskError::from)
    }

    async fn refresh(&self, profile: &Profile) -> Result<CachedToken, DeskError> {
        let request = self.build_refresh_request(profile)?;
        let res = self.http.execute(request).await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(DeskError::from_response(status, &body));
        }
        let payload: TokenResponse = serde_json::from_str(&body)
            .map_err(|e| DeskError::Decode(format!("token response: {e}")))?;
        // The accounts server reports some failures with a 200 and an `error` field.
        if let Some(error) = payload.error {
            return Err(DeskError::from_response(
                status,
                &serde_json::json!({ "error": error }).to_string(),
            ));
        }
        let value = payload
            .access_token
            .ok_or_else(|| DeskError::Decode("token response is missing `access_token`".into()))?;
        let expires_at = expires_at(Utc::now(), payload.expires_in);
        info!(profile = %profile.name, %expires_at, "refreshed access token");
        Ok(CachedToken { value, expires_at })
    }
}
