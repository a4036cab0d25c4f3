//! REST endpoints for profiles, the ticket log, failure alerts and the mail
//! reply address.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::errors::ApiError;
use super::AppState;
use crate::config::Profile;
use crate::db::TicketLogEntry;
use crate::desk::{FailureAlert, MailReplyAddress};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/profiles", get(list_profiles))
        .route(
            "/profiles/:name/failures",
            get(list_failures).delete(clear_failures),
        )
        .route("/profiles/:name/tickets", get(list_tickets))
        .route(
            "/profiles/:name/mail-reply-address",
            get(get_reply_address).put(update_reply_address),
        )
}

/// Public view of a profile; credentials stay server-side.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub name: String,
    pub org_id: String,
    pub department_id: String,
    pub from_email_address: Option<String>,
    pub has_mail_reply_address: bool,
}

impl From<&Profile> for ProfileSummary {
    fn from(p: &Profile) -> Self {
        Self {
            name: p.name.clone(),
            org_id: p.org_id.clone(),
            department_id: p.department_id.clone(),
            from_email_address: p.from_email_address.clone(),
            has_mail_reply_address: p.mail_reply_address_id.is_some(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateReplyAddress {
    pub display_name: String,
}

fn lookup<'a>(state: &'a AppState, name: &str) -> Result<&'a Profile, ApiError> {
    state
        .jobs
        .profiles
        .get(name)
        .ok_or_else(|| ApiError::NotFound(format!("profile '{name}' not found")))
}

async fn list_profiles(State(state): State<AppState>) -> Json<Vec<ProfileSummary>> {
    Json(state.jobs.profiles.iter().map(ProfileSummary::from).collect())
}

/// Failure alerts for the profile's department. Alerts without a recipient are
/// attributed through the ticket log.
async fn list_failures(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<FailureAlert>>, ApiError> {
    let profile = lookup(&state, &name)?;
    let mut alerts = state.jobs.desk.failure_alerts(profile).await?;
    for alert in alerts.iter_mut().filter(|a| a.email.is_none()) {
        let Some(number) = alert.ticket_number.as_deref() else {
            continue;
        };
        match state.jobs.ticket_log.email_for(&profile.name, number).await {
            Ok(email) => alert.email = email,
            Err(err) => warn!(ticket_number = number, ?err, "ticket log lookup failed"),
        }
    }
    Ok(Json(alerts))
}

/// Tickets this relay created through the profile, oldest first.
async fn list_tickets(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<TicketLogEntry>>, ApiError> {
    let profile = lookup(&state, &name)?;
    let entries = state
        .jobs
        .ticket_log
        .entries_for_profile(&profile.name)
        .await
        .map_err(|err| {
            warn!(profile = %profile.name, ?err, "ticket log read failed");
            ApiError::Internal("ticket log unavailable".into())
        })?;
    Ok(Json(entries))
}

async fn clear_failures(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let profile = lookup(&state, &name)?;
    state.jobs.desk.clear_failure_alerts(profile).await?;
    Ok(Json(serde_json::json!({ "cleared": true })))
}

async fn get_reply_address(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<MailReplyAddress>, ApiError> {
    let profile = lookup(&state, &name)?;
    Ok(Json(state.jobs.desk.mail_reply_address(profile).await?))
}

async fn update_reply_address(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(body): Json<UpdateReplyAddress>,
) -> Result<Json<MailReplyAddress>, ApiError> {
    let profile = lookup(&state, &name)?;
    let display_name = body.display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::BadRequest("displayName must be non-empty".into()));
    }
    let updated = state
        .jobs
        .desk
        .update_mail_reply_address(profile, display_name)
        .await?;
    info!(profile = %profile.name, display_name, "mail reply address renamed");
    Ok(Json(updated))
}
