use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::time::Duration;

use crate::desk::ErrorSummary;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Paused,
    Ended,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Ended => "ended",
        }
    }

    pub fn is_ended(&self) -> bool {
        matches!(self, JobStatus::Ended)
    }
}

/// Identifies a job by the connection that started it and the profile it runs under.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub connection_id: String,
    pub profile_name: String,
}

impl JobKey {
    pub fn new(connection_id: impl Into<String>, profile_name: impl Into<String>) -> Self {
        Self {
            connection_id: connection_id.into(),
            profile_name: profile_name.into(),
        }
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.connection_id, self.profile_name)
    }
}

/// Parameters of one bulk ticket-creation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkRequest {
    pub profile_name: String,
    pub emails: Vec<String>,
    pub subject: String,
    #[serde(default)]
    pub description: String,
    /// Seconds between recipients; fractional values allowed.
    #[serde(default)]
    pub delay: f64,
    #[serde(default)]
    pub send_direct_reply: bool,
    #[serde(default)]
    pub verify_email: bool,
}

impl BulkRequest {
    /// Negative, zero or non-finite delays collapse to zero.
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay).unwrap_or(Duration::ZERO)
    }
}

/// Outcome of one recipient.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TicketResult {
    pub profile_name: String,
    pub email: String,
    pub success: bool,
    pub ticket_number: Option<String>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    pub full_response: Option<Value>,
}

/// Out-of-band verification outcome, correlated by ticket number.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationUpdate {
    pub profile_name: String,
    pub ticket_number: String,
    pub success: bool,
    pub details: String,
    pub full_response: Option<Value>,
}

/// Everything a running job reports back to the connection that started it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum JobEvent {
    TicketResult(TicketResult),
    TicketUpdate(VerificationUpdate),
    #[serde(rename_all = "camelCase")]
    BulkComplete { profile_name: String },
    #[serde(rename_all = "camelCase")]
    BulkEnded { profile_name: String },
    #[serde(rename_all = "camelCase")]
    BulkError { profile_name: String, error: String },
}

impl JobEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobEvent::BulkComplete { .. } | JobEvent::BulkEnded { .. } | JobEvent::BulkError { .. }
        )
    }
}
