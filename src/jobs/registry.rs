//! In-memory registry of running bulk jobs.
//!
//! Control signals (pause, resume, end) go through the registry; the worker owns
//! a [`JobHandle`] subscribed to its entry and wakes as soon as the status changes.
//! Removing an entry closes the channel, which the handle reports as `Ended`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::model::{JobKey, JobStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a job for profile '{0}' is already active on this connection")]
    AlreadyActive(String),
}

struct Entry {
    generation: u64,
    status: watch::Sender<JobStatus>,
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<JobKey, Entry>,
    next_generation: u64,
}

#[derive(Clone, Default)]
pub struct JobRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job. A key whose job is still running or paused is
    /// rejected; an `ended` entry that has not been released yet is replaced.
    pub async fn start(&self, key: JobKey) -> Result<JobHandle, RegistryError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.jobs.get(&key) {
            if !existing.status.borrow().is_ended() {
                return Err(RegistryError::AlreadyActive(key.profile_name.clone()));
            }
        }
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let (tx, rx) = watch::channel(JobStatus::Running);
        inner.jobs.insert(
            key.clone(),
            Entry {
                generation,
                status: tx,
            },
        );
        debug!(job = %key, generation, "job registered");
        Ok(JobHandle {
            key,
            generation,
            status: rx,
        })
    }

    pub async fn status(&self, key: &JobKey) -> Option<JobStatus> {
        let inner = self.inner.lock().await;
        inner.jobs.get(key).map(|e| *e.status.borrow())
    }

    /// `running → paused`. Returns whether the status changed.
    pub async fn pause(&self, key: &JobKey) -> bool {
        self.transition(key, |s| (s == JobStatus::Running).then_some(JobStatus::Paused))
            .await
    }

    /// `paused → running`.
    pub async fn resume(&self, key: &JobKey) -> bool {
        self.transition(key, |s| (s == JobStatus::Paused).then_some(JobStatus::Running))
            .await
    }

    /// `running | paused → ended`. Ending twice is a no-op.
    pub async fn end(&self, key: &JobKey) -> bool {
        self.transition(key, |s| (!s.is_ended()).then_some(JobStatus::Ended))
            .await
    }

    async fn transition(
        &self,
        key: &JobKey,
        next: impl FnOnce(JobStatus) -> Option<JobStatus>,
    ) -> bool {
        let inner = self.inner.lock().await;
        let Some(entry) = inner.jobs.get(key) else {
            return false;
        };
        let changed = entry.status.send_if_modified(|current| match next(*current) {
            Some(status) => {
                *current = status;
                true
            }
            None => false,
        });
        if changed {
            debug!(job = %key, status = entry.status.borrow().as_str(), "job status changed");
        }
        changed
    }

    pub async fn remove(&self, key: &JobKey) -> bool {
        self.inner.lock().await.jobs.remove(key).is_some()
    }

    /// Drop the entry owned by `handle`, leaving any newer job under the same key alone.
    pub async fn release(&self, handle: &JobHandle) {
        let mut inner = self.inner.lock().await;
        if inner
            .jobs
            .get(&handle.key)
            .is_some_and(|e| e.generation == handle.generation)
        {
            inner.jobs.remove(&handle.key);
        }
    }

    /// Remove every job started by `connection_id`. Their workers observe the
    /// removal as `ended`.
    pub async fn remove_connection(&self, connection_id: &str) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner.jobs.retain(|key, _| key.connection_id != connection_id);
        before - inner.jobs.len()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// Worker-side view of one registry entry.
pub struct JobHandle {
    key: JobKey,
    generation: u64,
    status: watch::Receiver<JobStatus>,
}

impl JobHandle {
    pub fn key(&self) -> &JobKey {
        &self.key
    }

    /// Current status; a removed entry reads as `Ended`.
    pub fn status(&self) -> JobStatus {
        match self.status.has_changed() {
            Ok(_) => *self.status.borrow(),
            Err(_) => JobStatus::Ended,
        }
    }

    /// Block while the job is paused. Returns the status that released the wait.
    pub async fn wait_while_paused(&mut self) -> JobStatus {
        let current = self.status();
        if current != JobStatus::Paused {
            return current;
        }
        match self.status.wait_for(|s| *s != JobStatus::Paused).await {
            Ok(status) => *status,
            Err(_) => JobStatus::Ended,
        }
    }

    /// Interruptible delay: resolves once `duration` elapses or the job ends or
    /// is removed, whichever comes first. Returns the status afterwards.
    pub async fn sleep(&mut self, duration: Duration) -> JobStatus {
        if duration.is_zero() || self.status().is_ended() {
            return self.status();
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.status.wait_for(JobStatus::is_ended) => {}
        }
        self.status()
    }
}
