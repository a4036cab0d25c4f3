//! Delayed delivery verification for created tickets.

use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::config::Profile;
use crate::desk::{CreatedTicket, DeskService, HistoryFilter};
use crate::model::VerificationUpdate;

/// Background verification tasks, tracked so shutdown can wait for them.
#[derive(Clone, Default)]
pub struct VerificationTasks {
    set: Arc<Mutex<JoinSet<()>>>,
}

impl VerificationTasks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut set = self.set.lock().await;
        // Reap finished tasks so the set does not grow with every ticket.
        while set.try_join_next().is_some() {}
        set.spawn(task);
    }

    pub async fn pending(&self) -> usize {
        let mut set = self.set.lock().await;
        while set.try_join_next().is_some() {}
        set.len()
    }

    /// Wait up to `grace` for pending verifications, then abort the rest.
    pub async fn shutdown(&self, grace: Duration) {
        let mut set = self.set.lock().await;
        if set.is_empty() {
            return;
        }
        info!(pending = set.len(), "waiting for pending verifications");
        let drained = tokio::time::timeout(grace, async {
            while set.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(
                abandoned = set.len(),
                "verification grace period expired; abandoning pending checks"
            );
            set.abort_all();
        }
    }
}

/// Check whether the automation email for `ticket` went out.
///
/// Either history feed having entries counts as delivered. With both empty, the
/// department's failure alerts decide: a matching alert means the email bounced.
pub async fn verify_delivery(
    desk: &dyn DeskService,
    profile: &Profile,
    ticket: &CreatedTicket,
) -> VerificationUpdate {
    let number = ticket.ticket_number.clone();
    let update = |success: bool, details: String, full_response: Value| VerificationUpdate {
        profile_name: profile.name.clone(),
        ticket_number: number.clone(),
        success,
        details,
        full_response: Some(full_response),
    };

    let workflow = desk
        .ticket_history(profile, &ticket.id, HistoryFilter::Workflow)
        .await;
    let notification = desk
        .ticket_history(profile, &ticket.id, HistoryFilter::NotificationRule)
        .await;

    let (workflow, notification) = match (workflow, notification) {
        (Ok(w), Ok(n)) => (w, n),
        (Err(e), _) | (_, Err(e)) => {
            warn!(ticket_number = %number, error = %e, "verification history lookup failed");
            return update(
                false,
                format!("Verification inconclusive: {}", e.message()),
                json!({ "error": e.summary() }),
            );
        }
    };

    if !workflow.is_empty() || !notification.is_empty() {
        return update(
            true,
            format!("Automation email dispatched for ticket #{number}"),
            json!({ "workflowHistory": workflow, "notificationHistory": notification }),
        );
    }

    match desk.failure_alerts(profile).await {
        Ok(alerts) => match alerts
            .iter()
            .find(|a| a.ticket_number.as_deref() == Some(number.as_str()))
        {
            Some(alert) => update(
                false,
                format!("Email delivery failed: {}", alert.reason_text()),
                json!({ "failureAlert": alert.raw }),
            ),
            None => update(
                false,
                format!("No automation history and no failure alert found for ticket #{number}"),
                json!({ "workflowHistory": [], "notificationHistory": [] }),
            ),
        },
        Err(e) => {
            warn!(ticket_number = %number, error = %e, "failure alert lookup failed");
            update(
                false,
                format!("Verification inconclusive: {}", e.message()),
                json!({ "error": e.summary() }),
            )
        }
    }
}
