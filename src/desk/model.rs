use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::DeskError;

/// Ticket-history event filters the relay inspects during verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryFilter {
    Workflow,
    NotificationRule,
}

impl HistoryFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryFilter::Workflow => "WorkflowHistory",
            HistoryFilter::NotificationRule => "NotificationRuleHistory",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedTicket {
    pub id: String,
    pub ticket_number: String,
    pub raw: Value,
}

impl CreatedTicket {
    pub fn from_value(raw: Value) -> Result<Self, DeskError> {
        let id = string_field(&raw, "id")
            .ok_or_else(|| DeskError::Decode("ticket response is missing `id`".into()))?;
        let ticket_number = string_field(&raw, "ticketNumber")
            .ok_or_else(|| DeskError::Decode("ticket response is missing `ticketNumber`".into()))?;
        Ok(Self {
            id,
            ticket_number,
            raw,
        })
    }
}

/// One entry of the department's email failure alert feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FailureAlert {
    pub id: Option<String>,
    pub ticket_number: Option<String>,
    pub reason: Option<String>,
    pub error_message: Option<String>,
    pub email: Option<String>,
    pub created_time: Option<String>,
    pub raw: Value,
}

impl FailureAlert {
    pub fn from_value(raw: Value) -> Self {
        Self {
            id: string_field(&raw, "id"),
            ticket_number: string_field(&raw, "ticketNumber"),
            reason: string_field(&raw, "reason"),
            error_message: string_field(&raw, "errorMessage"),
            email: string_field(&raw, "toEmailAddress").or_else(|| string_field(&raw, "email")),
            created_time: string_field(&raw, "createdTime"),
            raw,
        }
    }

    /// Best human-readable explanation the alert carries.
    pub fn reason_text(&self) -> &str {
        self.reason
            .as_deref()
            .or(self.error_message.as_deref())
            .unwrap_or("unknown reason")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MailReplyAddress {
    pub id: String,
    pub display_name: Option<String>,
    pub address: Option<String>,
}

impl MailReplyAddress {
    pub fn from_value(raw: &Value) -> Result<Self, DeskError> {
        let id = string_field(raw, "id")
            .ok_or_else(|| DeskError::Decode("reply address response is missing `id`".into()))?;
        Ok(Self {
            id,
            display_name: string_field(raw, "displayName"),
            address: string_field(raw, "address"),
        })
    }
}

#[derive(Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: Option<String>,
    pub expires_in: Option<i64>,
    pub error: Option<String>,
}

/// Responses of list endpoints wrap their entries in `data`; an empty feed may
/// come back as an empty body.
pub(crate) fn data_entries(body: Option<Value>) -> Vec<Value> {
    match body {
        Some(Value::Object(mut map)) => match map.remove("data") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        Some(Value::Array(items)) => items,
        _ => Vec::new(),
    }
}

/// Ids and ticket numbers come back as strings or numbers depending on the endpoint.
pub(crate) fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
