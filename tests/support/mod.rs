#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::Instant;

use desk_relay::config::{Profile, ProfileStore};
use desk_relay::db::{TicketLog, TicketLogEntry};
use desk_relay::desk::{
    CreatedTicket, DeskError, DeskService, FailureAlert, HistoryFilter, MailReplyAddress,
};
use desk_relay::jobs::{JobContext, JobRegistry, VerificationTasks};
use desk_relay::model::{BulkRequest, JobEvent};

#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Create(String),
    Reply { ticket_id: String, to: String },
    History { ticket_id: String, filter: &'static str },
    Alerts,
    ClearAlerts,
    ReplyAddress,
    UpdateReplyAddress(String),
}

/// Scriptable helpdesk that records every call.
#[derive(Default)]
pub struct RecordingDesk {
    pub failing_emails: HashSet<String>,
    pub reply_error: Option<(StatusCode, String)>,
    pub workflow_history: Vec<Value>,
    pub notification_history: Vec<Value>,
    pub history_error: bool,
    pub alerts: Vec<Value>,
    pub create_latency: Duration,
    pub calls: Mutex<Vec<Call>>,
    pub created: Mutex<Vec<(String, Instant)>>,
    pub next_number: AtomicU64,
}

impl RecordingDesk {
    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn create_calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .await
            .iter()
            .filter_map(|c| match c {
                Call::Create(email) => Some(email.clone()),
                _ => None,
            })
            .collect()
    }

    /// When each ticket creation finished, in order.
    pub async fn created(&self) -> Vec<(String, Instant)> {
        self.created.lock().await.clone()
    }

    async fn record(&self, call: Call) {
        self.calls.lock().await.push(call);
    }
}

#[async_trait]
impl DeskService for RecordingDesk {
    async fn create_ticket(
        &self,
        _profile: &Profile,
        email: &str,
        _subject: &str,
        _description: &str,
    ) -> Result<CreatedTicket, DeskError> {
        self.record(Call::Create(email.to_string())).await;
        if !self.create_latency.is_zero() {
            tokio::time::sleep(self.create_latency).await;
        }
        if self.failing_emails.contains(email) {
            return Err(DeskError::from_response(
                StatusCode::UNPROCESSABLE_ENTITY,
                r#"{"errorCode":"INVALID_DATA","message":"An invalid value was provided","errors":[{"fieldName":"/contact/email","errorType":"invalid"}]}"#,
            ));
        }
        let number = 101 + self.next_number.fetch_add(1, Ordering::SeqCst);
        self.created
            .lock()
            .await
            .push((email.to_string(), Instant::now()));
        CreatedTicket::from_value(json!({
            "id": format!("id-{number}"),
            "ticketNumber": number.to_string(),
            "email": email,
        }))
    }

    async fn send_reply(
        &self,
        _profile: &Profile,
        ticket_id: &str,
        to: &str,
        _content: &str,
    ) -> Result<Value, DeskError> {
        self.record(Call::Reply {
            ticket_id: ticket_id.to_string(),
            to: to.to_string(),
        })
        .await;
        match &self.reply_error {
            Some((status, body)) => Err(DeskError::from_response(*status, body)),
            None => Ok(json!({ "status": "sent", "to": to })),
        }
    }

    async fn ticket_history(
        &self,
        _profile: &Profile,
        ticket_id: &str,
        filter: HistoryFilter,
    ) -> Result<Vec<Value>, DeskError> {
        self.record(Call::History {
            ticket_id: ticket_id.to_string(),
            filter: filter.as_str(),
        })
        .await;
        if self.history_error {
            return Err(DeskError::Network("request timed out".into()));
        }
        Ok(match filter {
            HistoryFilter::Workflow => self.workflow_history.clone(),
            HistoryFilter::NotificationRule => self.notification_history.clone(),
        })
    }

    async fn failure_alerts(&self, _profile: &Profile) -> Result<Vec<FailureAlert>, DeskError> {
        self.record(Call::Alerts).await;
        Ok(self.alerts.iter().cloned().map(FailureAlert::from_value).collect())
    }

    async fn clear_failure_alerts(&self, _profile: &Profile) -> Result<(), DeskError> {
        self.record(Call::ClearAlerts).await;
        Ok(())
    }

    async fn mail_reply_address(&self, profile: &Profile) -> Result<MailReplyAddress, DeskError> {
        self.record(Call::ReplyAddress).await;
        let id = profile
            .mail_reply_address_id
            .clone()
            .ok_or_else(|| DeskError::Invalid("no mail_reply_address_id".into()))?;
        Ok(MailReplyAddress {
            id,
            display_name: Some("Support Team".into()),
            address: Some("support@example.com".into()),
        })
    }

    async fn update_mail_reply_address(
        &self,
        profile: &Profile,
        display_name: &str,
    ) -> Result<MailReplyAddress, DeskError> {
        self.record(Call::UpdateReplyAddress(display_name.to_string()))
            .await;
        let id = profile
            .mail_reply_address_id
            .clone()
            .ok_or_else(|| DeskError::Invalid("no mail_reply_address_id".into()))?;
        Ok(MailReplyAddress {
            id,
            display_name: Some(display_name.to_string()),
            address: Some("support@example.com".into()),
        })
    }
}

/// In-memory ticket log.
#[derive(Default)]
pub struct RecordingLog {
    entries: Mutex<Vec<(String, String, String)>>,
}

impl RecordingLog {
    pub async fn entries(&self) -> Vec<(String, String, String)> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl TicketLog for RecordingLog {
    async fn record(&self, ticket_number: &str, email: &str, profile_name: &str) -> Result<()> {
        self.entries.lock().await.push((
            ticket_number.to_string(),
            email.to_string(),
            profile_name.to_string(),
        ));
        Ok(())
    }

    async fn email_for(&self, profile_name: &str, ticket_number: &str) -> Result<Option<String>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .rev()
            .find(|(n, _, p)| n == ticket_number && p == profile_name)
            .map(|(_, e, _)| e.clone()))
    }

    async fn entries_for_profile(&self, profile_name: &str) -> Result<Vec<TicketLogEntry>> {
        Ok(self
            .entries
            .lock()
            .await
            .iter()
            .filter(|(_, _, p)| p == profile_name)
            .map(|(n, e, p)| TicketLogEntry {
                ticket_number: n.clone(),
                email: e.clone(),
                profile_name: p.clone(),
                created_at: Utc::now(),
            })
            .collect())
    }
}

pub fn profile(name: &str) -> Profile {
    Profile {
        name: name.into(),
        org_id: "60001".into(),
        department_id: "dep-1".into(),
        client_id: "cid".into(),
        client_secret: "secret".into(),
        refresh_token: "rt".into(),
        from_email_address: Some("support@example.com".into()),
        mail_reply_address_id: Some("reply-1".into()),
    }
}

pub fn profiles() -> ProfileStore {
    let mut no_sender = profile("NoSender");
    no_sender.from_email_address = None;
    no_sender.mail_reply_address_id = None;
    ProfileStore::new(vec![profile("Support"), no_sender])
}

pub struct Harness {
    pub desk: Arc<RecordingDesk>,
    pub log: Arc<RecordingLog>,
    pub ctx: JobContext,
}

impl Harness {
    pub fn new(desk: RecordingDesk) -> Self {
        let desk = Arc::new(desk);
        let log = Arc::new(RecordingLog::default());
        let ctx = JobContext {
            desk: desk.clone(),
            ticket_log: log.clone(),
            profiles: Arc::new(profiles()),
            registry: JobRegistry::new(),
            verifications: VerificationTasks::new(),
            verify_delay: Duration::from_secs(10),
        };
        Self { desk, log, ctx }
    }
}

pub fn request(emails: &[&str]) -> BulkRequest {
    BulkRequest {
        profile_name: "Support".into(),
        emails: emails.iter().map(|e| e.to_string()).collect(),
        subject: "Welcome".into(),
        description: "<p>Hello</p>".into(),
        delay: 0.0,
        send_direct_reply: false,
        verify_email: false,
    }
}

/// Receive events until the terminal one.
pub async fn collect_until_terminal(rx: &mut mpsc::UnboundedReceiver<JobEvent>) -> Vec<JobEvent> {
    let mut events = Vec::new();
    while let Some(event) = rx.recv().await {
        let terminal = event.is_terminal();
        events.push(event);
        if terminal {
            break;
        }
    }
    events
}

pub fn ticket_results(events: &[JobEvent]) -> Vec<&desk_relay::model::TicketResult> {
    events
        .iter()
        .filter_map(|e| match e {
            JobEvent::TicketResult(r) => Some(r),
            _ => None,
        })
        .collect()
}
