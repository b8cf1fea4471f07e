//! Per-guild serialized task execution
//!
//! Every guild gets its own worker, created on first submission and dropped
//! after it has been idle for a while. Tasks for one guild run one at a time
//! in submission order; different guilds run concurrently. A reserved default
//! worker takes work that belongs to no guild and is never evicted.

use crate::error::EngineResult;
use dashmap::DashMap;
use derive_more::Display;
use poise::serenity_prelude::GuildId;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, error::SendError, unbounded_channel};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Identifies the worker a task is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum WorkerKey {
    #[display("default")]
    Default,
    #[display("guild {_0}")]
    Guild(GuildId),
}

impl From<GuildId> for WorkerKey {
    fn from(guild_id: GuildId) -> Self {
        Self::Guild(guild_id)
    }
}

type BoxedTask = Pin<Box<dyn Future<Output = EngineResult<()>> + Send>>;

struct Job {
    action: &'static str,
    task: BoxedTask,
}

struct Worker {
    tx: UnboundedSender<Job>,
    /// Jobs submitted but not finished yet
    pending: Arc<AtomicUsize>,
    /// Milliseconds since the sequencer's epoch
    last_used: AtomicU64,
    handle: AbortHandle,
}

pub struct TaskSequencer {
    workers: DashMap<WorkerKey, Worker>,
    idle_timeout: Duration,
    epoch: Instant,
}

impl TaskSequencer {
    #[must_use]
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            workers: DashMap::new(),
            idle_timeout,
            epoch: Instant::now(),
        }
    }

    /// Queue `task` on the worker bound to `key`.
    ///
    /// Errors returned by the task and panics inside it are logged with the
    /// worker key and `action`; the worker keeps going either way.
    pub fn submit<K, F>(&self, key: K, action: &'static str, task: F)
    where
        K: Into<WorkerKey>,
        F: Future<Output = EngineResult<()>> + Send + 'static,
    {
        let key = key.into();
        let job = Job {
            action,
            task: Box::pin(task),
        };
        let now = self.now_millis();

        // the entry guard is held until the job is queued, so eviction
        // cannot drop the worker in between
        let mut worker = self
            .workers
            .entry(key)
            .or_insert_with(|| Self::spawn_worker(key, now));
        worker.last_used.store(now, Ordering::Release);
        worker.pending.fetch_add(1, Ordering::AcqRel);

        if let Err(SendError(job)) = worker.tx.send(job) {
            warn!(worker = %key, action, "Worker was dead, recreating it");
            *worker = Self::spawn_worker(key, now);
            worker.pending.fetch_add(1, Ordering::AcqRel);
            if worker.tx.send(job).is_err() {
                error!(worker = %key, action, "Fresh worker rejected a job, dropping it");
            }
        }
    }

    fn spawn_worker(key: WorkerKey, now: u64) -> Worker {
        let (tx, rx) = unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let handle = tokio::spawn(run_worker(key, rx, Arc::clone(&pending))).abort_handle();
        debug!(worker = %key, "Started worker");

        Worker {
            tx,
            pending,
            last_used: AtomicU64::new(now),
            handle,
        }
    }

    /// Drop workers without queued work that have been idle for longer than
    /// the idle timeout. Returns how many were dropped.
    pub fn evict_idle(&self) -> usize {
        let now = self.now_millis();
        let idle = millis(self.idle_timeout);
        let before = self.workers.len();

        self.workers.retain(|key, worker| {
            let keep = *key == WorkerKey::Default
                || worker.pending.load(Ordering::Acquire) > 0
                || now.saturating_sub(worker.last_used.load(Ordering::Acquire)) < idle;
            if !keep {
                debug!(worker = %key, "Evicting idle worker");
            }
            keep
        });

        before.saturating_sub(self.workers.len())
    }

    /// Periodically evict idle workers
    pub fn spawn_reaper(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                interval.tick().await;
                let evicted = self.evict_idle();
                if evicted > 0 {
                    info!("Evicted {evicted} idle workers, {} left", self.workers.len());
                }
            }
        })
    }

    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[must_use]
    pub fn has_worker(&self, key: WorkerKey) -> bool {
        self.workers.contains_key(&key)
    }

    /// Stop every worker. Queued jobs are dropped.
    pub fn shutdown(&self) {
        for worker in self.workers.iter() {
            worker.handle.abort();
        }
        self.workers.clear();
    }

    fn now_millis(&self) -> u64 {
        millis(self.epoch.elapsed())
    }

    #[cfg(test)]
    fn kill(&self, key: WorkerKey) {
        if let Some(worker) = self.workers.get(&key) {
            worker.handle.abort();
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn run_worker(key: WorkerKey, mut rx: UnboundedReceiver<Job>, pending: Arc<AtomicUsize>) {
    while let Some(Job { action, task }) = rx.recv().await {
        // a separate task turns panics into a JoinError instead of killing
        // the worker
        match tokio::spawn(task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(worker = %key, action, error = %e, "Task failed"),
            Err(e) if e.is_panic() => error!(worker = %key, action, "Task panicked"),
            Err(e) => warn!(worker = %key, action, error = %e, "Task cancelled"),
        }
        pending.fetch_sub(1, Ordering::AcqRel);
    }
    debug!(worker = %key, "Worker stopped");
}
