//! The bulk ticket-creation loop.

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, info_span, warn, Instrument};

use super::registry::{JobHandle, JobRegistry, RegistryError};
use super::verify::{self, VerificationTasks};
use crate::config::{Profile, ProfileStore};
use crate::db::TicketLog;
use crate::desk::{CreatedTicket, DeskService};
use crate::model::{BulkRequest, JobEvent, JobKey, JobStatus, TicketResult};

pub type EventSender = UnboundedSender<JobEvent>;

/// Reasons a batch is refused before any recipient is processed.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("profile '{0}' not found")]
    UnknownProfile(String),
    #[error("no recipients provided")]
    NoRecipients,
    #[error("subject is required")]
    MissingSubject,
    #[error("profile '{0}' has no sender address; direct replies need one")]
    MissingSender(String),
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Shared collaborators handed to every worker.
#[derive(Clone)]
pub struct JobContext {
    pub desk: Arc<dyn DeskService>,
    pub ticket_log: Arc<dyn TicketLog>,
    pub profiles: Arc<ProfileStore>,
    pub registry: JobRegistry,
    pub verifications: VerificationTasks,
    pub verify_delay: Duration,
}

impl JobContext {
    fn check_request(&self, request: &BulkRequest) -> Result<Profile, SetupError> {
        let profile = self
            .profiles
            .get(&request.profile_name)
            .cloned()
            .ok_or_else(|| SetupError::UnknownProfile(request.profile_name.clone()))?;
        if request.emails.iter().all(|e| e.trim().is_empty()) {
            return Err(SetupError::NoRecipients);
        }
        if request.subject.trim().is_empty() {
            return Err(SetupError::MissingSubject);
        }
        if request.send_direct_reply
            && profile
                .from_email_address
                .as_deref()
                .map_or(true, |a| a.trim().is_empty())
        {
            return Err(SetupError::MissingSender(profile.name.clone()));
        }
        Ok(profile)
    }
}

fn emit(events: &EventSender, event: JobEvent) {
    if events.send(event).is_err() {
        debug!("event receiver dropped");
    }
}

/// Validate `request` and register its job. On failure the reason is emitted as
/// `bulkError` and `None` is returned. Once this returns, control messages for
/// the job find it in the registry.
pub async fn start_bulk_job(
    ctx: &JobContext,
    connection_id: &str,
    request: BulkRequest,
    events: &EventSender,
) -> Option<BulkJob> {
    let started = match ctx.check_request(&request) {
        Ok(profile) => ctx
            .registry
            .start(JobKey::new(connection_id, &request.profile_name))
            .await
            .map(|handle| (profile, handle))
            .map_err(SetupError::from),
        Err(err) => Err(err),
    };
    match started {
        Ok((profile, handle)) => Some(BulkJob {
            ctx: ctx.clone(),
            profile,
            request,
            handle,
            events: events.clone(),
        }),
        Err(err) => {
            warn!(
                connection = connection_id,
                profile = %request.profile_name,
                error = %err,
                "bulk job rejected"
            );
            emit(
                events,
                JobEvent::BulkError {
                    profile_name: request.profile_name,
                    error: err.to_string(),
                },
            );
            None
        }
    }
}

/// Register and run a job in one go.
pub async fn run_bulk_job(
    ctx: JobContext,
    connection_id: String,
    request: BulkRequest,
    events: EventSender,
) {
    if let Some(job) = start_bulk_job(&ctx, &connection_id, request, &events).await {
        job.run().await;
    }
}

/// A registered job, ready to process its recipients.
pub struct BulkJob {
    ctx: JobContext,
    profile: Profile,
    request: BulkRequest,
    handle: JobHandle,
    events: EventSender,
}

impl BulkJob {
    pub fn key(&self) -> &JobKey {
        self.handle.key()
    }

    /// Process every recipient in order, emitting exactly one terminal event.
    pub async fn run(self) {
        let span = info_span!("bulk_job", job = %self.handle.key());
        self.process().instrument(span).await
    }

    async fn process(self) {
        let BulkJob {
            ctx,
            profile,
            request,
            mut handle,
            events,
        } = self;

        let delay = request.delay();
        info!(
            recipients = request.emails.len(),
            delay_ms = delay.as_millis() as u64,
            reply = request.send_direct_reply,
            verify = request.verify_email,
            "bulk job started"
        );

        let mut dispatched = 0usize;
        for (index, raw) in request.emails.iter().enumerate() {
            if handle.wait_while_paused().await.is_ended() {
                break;
            }

            let email = raw.trim();
            if email.is_empty() {
                debug!(index, "skipping blank recipient");
                continue;
            }

            if dispatched > 0 && !delay.is_zero() {
                if handle.sleep(delay).await.is_ended() {
                    break;
                }
                // A pause issued during the delay holds the next recipient.
                if handle.wait_while_paused().await.is_ended() {
                    break;
                }
            }
            dispatched += 1;

            let outcome = process_recipient(&ctx, &profile, &request, email).await;
            emit(&events, JobEvent::TicketResult(outcome.result));

            if let Some(ticket) = outcome.ticket.filter(|_| request.verify_email) {
                let desk = ctx.desk.clone();
                let profile = profile.clone();
                let events = events.clone();
                let wait = ctx.verify_delay;
                ctx.verifications
                    .spawn(async move {
                        tokio::time::sleep(wait).await;
                        let update =
                            verify::verify_delivery(desk.as_ref(), &profile, &ticket).await;
                        info!(
                            ticket_number = %update.ticket_number,
                            success = update.success,
                            "verification finished"
                        );
                        emit(&events, JobEvent::TicketUpdate(update));
                    })
                    .await;
            }
        }

        let final_status = handle.status();
        ctx.registry.release(&handle).await;
        let profile_name = request.profile_name;
        let terminal = if final_status == JobStatus::Ended {
            JobEvent::BulkEnded { profile_name }
        } else {
            JobEvent::BulkComplete { profile_name }
        };
        info!(dispatched, status = final_status.as_str(), "bulk job finished");
        emit(&events, terminal);
    }
}

struct RecipientOutcome {
    result: TicketResult,
    ticket: Option<CreatedTicket>,
}

/// Create the ticket, optionally reply, and log it. Never fails: every upstream
/// error becomes part of the result.
async fn process_recipient(
    ctx: &JobContext,
    profile: &Profile,
    request: &BulkRequest,
    email: &str,
) -> RecipientOutcome {
    let ticket = match ctx
        .desk
        .create_ticket(profile, email, &request.subject, &request.description)
        .await
    {
        Ok(t) => t,
        Err(err) => {
            warn!(email, error = %err, "ticket creation failed");
            let summary = err.summary();
            return RecipientOutcome {
                result: TicketResult {
                    profile_name: profile.name.clone(),
                    email: email.to_string(),
                    success: false,
                    ticket_number: None,
                    details: format!("Ticket creation failed: {}", summary.message),
                    full_response: summary.raw_detail.clone(),
                    error: Some(summary),
                },
                ticket: None,
            };
        }
    };

    let number = ticket.ticket_number.clone();
    if let Err(err) = ctx.ticket_log.record(&number, email, &profile.name).await {
        warn!(ticket_number = %number, error = %err, "failed to append ticket log");
    }

    let mut payload = json!({ "ticketCreate": ticket.raw });
    let mut success = true;
    let mut error = None;
    let details = if request.send_direct_reply {
        match ctx
            .desk
            .send_reply(profile, &ticket.id, email, &request.description)
            .await
        {
            Ok(reply) => {
                payload["sendReply"] = reply;
                format!("Ticket #{number} created and reply sent")
            }
            Err(err) => {
                warn!(ticket_number = %number, error = %err, "reply failed");
                let summary = err.summary();
                payload["sendReplyError"] = json!(summary);
                success = false;
                let details = format!("Ticket #{number} created, but reply failed: {}", summary.message);
                error = Some(summary);
                details
            }
        }
    } else {
        format!("Ticket #{number} created")
    };

    RecipientOutcome {
        result: TicketResult {
            profile_name: profile.name.clone(),
            email: email.to_string(),
            success,
            ticket_number: Some(number),
            details,
            error,
            full_response: Some(payload),
        },
        ticket: Some(ticket),
    }
}

impl std::fmt::Debug for JobContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobContext")
            .field("verify_delay", &self.verify_delay)
            .finish_non_exhaustive()
    }
}
