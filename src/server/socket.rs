//! WebSocket session: job control in, job events out.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::AppState;
use crate::jobs::{self, EventSender};
use crate::model::{BulkRequest, JobEvent, JobKey};

/// Control messages accepted from the dashboard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    StartBulkCreate(BulkRequest),
    #[serde(rename_all = "camelCase")]
    PauseJob { profile_name: String },
    #[serde(rename_all = "camelCase")]
    ResumeJob { profile_name: String },
    #[serde(rename_all = "camelCase")]
    EndJob { profile_name: String },
}

pub async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| session(state, socket))
}

async fn session(state: AppState, socket: WebSocket) {
    let connection_id = Uuid::new_v4().to_string();
    info!(connection = %connection_id, "client connected");

    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<JobEvent>();

    let writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let text = match serde_json::to_string(&event) {
                Ok(text) => text,
                Err(err) => {
                    warn!(?err, "failed to encode job event");
                    continue;
                }
            };
            if sink.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(msg) => dispatch(&state, &connection_id, msg, &tx).await,
                Err(err) => warn!(connection = %connection_id, %err, "ignoring malformed message"),
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(connection = %connection_id, %err, "socket read failed");
                break;
            }
        }
    }

    // Jobs of a gone connection are removed outright; their workers read that as ended.
    let removed = state.jobs.registry.remove_connection(&connection_id).await;
    info!(connection = %connection_id, removed, "client disconnected");
    writer.abort();
}

/// Apply one control message on behalf of `connection_id`.
pub async fn dispatch(state: &AppState, connection_id: &str, msg: ClientMessage, events: &EventSender) {
    match msg {
        ClientMessage::StartBulkCreate(request) => {
            // Registered before the next message is read, so an immediate
            // pause or end finds the job.
            let started = jobs::start_bulk_job(&state.jobs, connection_id, request, events).await;
            if let Some(job) = started {
                info!(job = %job.key(), "bulk job accepted");
                tokio::spawn(job.run());
            }
        }
        ClientMessage::PauseJob { profile_name } => {
            let key = JobKey::new(connection_id, profile_name);
            let changed = state.jobs.registry.pause(&key).await;
            info!(job = %key, changed, "pause requested");
        }
        ClientMessage::ResumeJob { profile_name } => {
            let key = JobKey::new(connection_id, profile_name);
            let changed = state.jobs.registry.resume(&key).await;
            info!(job = %key, changed, "resume requested");
        }
        ClientMessage::EndJob { profile_name } => {
            let key = JobKey::new(connection_id, profile_name);
            let changed = state.jobs.registry.end(&key).await;
            info!(job = %key, changed, "end requested");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_start_message() {
        let msg: ClientMessage = serde_json::from_value(json!({
            "type": "startBulkCreate",
            "profileName": "Support",
            "emails": ["a@x.com", "b@x.com"],
            "subject": "Hello",
            "description": "<p>Hi</p>",
            "delay": 2,
            "sendDirectReply": true,
        }))
        .unwrap();
        match msg {
            ClientMessage::StartBulkCreate(req) => {
                assert_eq!(req.emails.len(), 2);
                assert!(req.send_direct_reply);
                assert!(!req.verify_email);
                assert_eq!(req.delay().as_secs(), 2);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_control_messages() {
        let msg: ClientMessage =
            serde_json::from_value(json!({ "type": "endJob", "profileName": "Support" })).unwrap();
        assert!(matches!(msg, ClientMessage::EndJob { ref profile_name } if profile_name == "Support"));

        assert!(serde_json::from_value::<ClientMessage>(json!({ "type": "explode" })).is_err());
    }
}
