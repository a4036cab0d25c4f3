use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde_json::{json, Value};
use std::fmt;
use tracing::{debug, info, warn};

use crate::config::{Desk, Profile};

pub mod error;
pub mod model;
pub mod token;

pub use error::{DeskError, ErrorSummary};
pub use model::{CreatedTicket, FailureAlert, HistoryFilter, MailReplyAddress};
use token::TokenCache;

/// Operations the relay performs against the helpdesk.
#[async_trait]
pub trait DeskService: Send + Sync {
    async fn create_ticket(
        &self,
        profile: &Profile,
        email: &str,
        subject: &str,
        description: &str,
    ) -> Result<CreatedTicket, DeskError>;

    /// Returns the raw upstream payload of the sent reply.
    async fn send_reply(
        &self,
        profile: &Profile,
        ticket_id: &str,
        to: &str,
        content: &str,
    ) -> Result<Value, DeskError>;

    async fn ticket_history(
        &self,
        profile: &Profile,
        ticket_id: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<Value>, DeskError>;

    async fn failure_alerts(&self, profile: &Profile) -> Result<Vec<FailureAlert>, DeskError>;

    async fn clear_failure_alerts(&self, profile: &Profile) -> Result<(), DeskError>;

    async fn mail_reply_address(&self, profile: &Profile) -> Result<MailReplyAddress, DeskError>;

    async fn update_mail_reply_address(
        &self,
        profile: &Profile,
        display_name: &str,
    ) -> Result<MailReplyAddress, DeskError>;
}

pub struct DeskClient {
    http: Client,
    base_url: Url,
    tokens: TokenCache,
}

impl fmt::Debug for DeskClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeskClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl DeskClient {
    pub fn from_config(cfg: &Desk) -> Result<Self, DeskError> {
        let base_url = Url::parse(&cfg.api_base)
            .map_err(|e| DeskError::Invalid(format!("invalid desk.api_base: {e}")))?;
        let accounts_url = Url::parse(&cfg.accounts_base)
            .map_err(|e| DeskError::Invalid(format!("invalid desk.accounts_base: {e}")))?;
        let http = Client::builder()
            .user_agent(&cfg.user_agent)
            .timeout(cfg.request_timeout())
            .build()?;
        Ok(Self::with_urls(http, base_url, accounts_url))
    }

    pub fn with_urls(http: Client, base_url: Url, accounts_url: Url) -> Self {
        Self {
            tokens: TokenCache::new(http.clone(), accounts_url),
            http,
            base_url,
        }
    }

    /// Build an authenticated, organization-scoped request.
    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        token: &str,
        profile: &Profile,
        body: Option<&Value>,
    ) -> Result<reqwest::Request, DeskError> {
        let endpoint = self
            .base_url
            .join(path)
            .map_err(|e| DeskError::Invalid(format!("invalid desk URL: {e}")))?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Authorization", format!("Zoho-oauthtoken {token}"))
            .header("orgId", &profile.org_id);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        builder.build().map_err(DeskError::from)
    }

    /// Send a request and return the parsed JSON body, if any. A 401 drops the
    /// cached token so the next call refreshes it.
    async fn call(
        &self,
        profile: &Profile,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Option<Value>, DeskError> {
        let token = self.tokens.access_token(profile).await?;
        let request = self.build_request(method, path, &token, profile, body)?;
        debug!(method = %request.method(), url = %request.url(), profile = %profile.name, "desk request");

        let res = self.http.execute(request).await?;
        let status = res.status();
        let text = res.text().await?;

        if status == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate(&profile.name).await;
        }
        if !status.is_success() {
            warn!(%status, path, profile = %profile.name, "desk API error");
            return Err(DeskError::from_response(status, &text));
        }
        if text.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|e| DeskError::Decode(format!("{path}: {e}")))
    }

    fn reply_address_path(profile: &Profile) -> Result<String, DeskError> {
        let id = profile.mail_reply_address_id.as_deref().ok_or_else(|| {
            DeskError::Invalid(format!(
                "profile '{}' has no mail_reply_address_id",
                profile.name
            ))
        })?;
        Ok(format!("api/v1/mailReplyAddress/{id}"))
    }
}

#[async_trait]
impl DeskService for DeskClient {
    async fn create_ticket(
        &self,
        profile: &Profile,
        email: &str,
        subject: &str,
        description: &str,
    ) -> Result<CreatedTicket, DeskError> {
        let body = build_ticket_request(profile, email, subject, description);
        let raw = self
            .call(profile, Method::POST, "api/v1/tickets", Some(&body))
            .await?
            .ok_or_else(|| DeskError::Decode("empty ticket response".into()))?;
        let ticket = CreatedTicket::from_value(raw)?;
        info!(profile = %profile.name, ticket_number = %ticket.ticket_number, "created ticket");
        Ok(ticket)
    }

    async fn send_reply(
        &self,
        profile: &Profile,
        ticket_id: &str,
        to: &str,
        content: &str,
    ) -> Result<Value, DeskError> {
        let from = profile.from_email_address.as_deref().ok_or_else(|| {
            DeskError::Invalid(format!("profile '{}' has no from_email_address", profile.name))
        })?;
        let body = build_reply_request(from, to, content);
        let path = format!("api/v1/tickets/{ticket_id}/sendReply");
        let raw = self.call(profile, Method::POST, &path, Some(&body)).await?;
        Ok(raw.unwrap_or(Value::Null))
    }

    async fn ticket_history(
        &self,
        profile: &Profile,
        ticket_id: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<Value>, DeskError> {
        let path = format!(
            "api/v1/tickets/{ticket_id}/History?eventFilter={}",
            filter.as_str()
        );
        let raw = self.call(profile, Method::GET, &path, None).await?;
        Ok(model::data_entries(raw))
    }

    async fn failure_alerts(&self, profile: &Profile) -> Result<Vec<FailureAlert>, DeskError> {
        let path = format!("api/v1/emailFailureAlerts?department={}", profile.department_id);
        let raw = self.call(profile, Method::GET, &path, None).await?;
        Ok(model::data_entries(raw)
            .into_iter()
            .map(FailureAlert::from_value)
            .collect())
    }

    async fn clear_failure_alerts(&self, profile: &Profile) -> Result<(), DeskError> {
        let path = format!("api/v1/emailFailureAlerts?department={}", profile.department_id);
        self.call(profile, Method::DELETE, &path, None).await?;
        info!(profile = %profile.name, "cleared failure alerts");
        Ok(())
    }

    async fn mail_reply_address(&self, profile: &Profile) -> Result<MailReplyAddress, DeskError> {
        let path = Self::reply_address_path(profile)?;
        let raw = self
            .call(profile, Method::GET, &path, None)
            .await?
            .ok_or_else(|| DeskError::Decode("empty reply address response".into()))?;
        MailReplyAddress::from_value(&raw)
    }

    async fn update_mail_reply_address(
        &self,
        profile: &Profile,
        display_name: &str,
    ) -> Result<MailReplyAddress, DeskError> {
        let path = Self::reply_address_path(profile)?;
        let body = json!({ "displayName": display_name });
        let raw = self
            .call(profile, Method::PATCH, &path, Some(&body))
            .await?
            .ok_or_else(|| DeskError::Decode("empty reply address response".into()))?;
        MailReplyAddress::from_value(&raw)
    }
}

pub fn build_ticket_request(profile: &Profile, email: &str, subject: &str, description: &str) -> Value {
    json!({
        "subject": subject,
        "departmentId": profile.department_id,
        "description": description,
        "channel": "Email",
        "email": email,
        "contact": {
            "email": email,
            "lastName": email.split('@').next().unwrap_or(email),
        },
    })
}

pub fn build_reply_request(from: &str, to: &str, content: &str) -> Value {
    json!({
        "channel": "EMAIL",
        "fromEmailAddress": from,
        "to": to,
        "content": content,
        "contentType": "html",
    })
}
