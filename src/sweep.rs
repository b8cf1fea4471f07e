//! Periodic reconciliation loops
//!
//! A sweep runs a pass on a fixed period and whenever it is asked to. Passes
//! are expected to hand their per-guild work to the task sequencer instead of
//! doing it inline.

use poise::serenity_prelude::GuildId;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// How many requests may queue up before further ones are dropped
const REQUEST_BUFFER: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepRequest {
    /// Run a pass over every guild right now
    All,
    /// Run a pass over one guild right now
    Guild(GuildId),
    Shutdown,
}

/// Sending side of a sweep loop
#[derive(Debug, Clone)]
pub struct SweepHandle {
    name: &'static str,
    tx: mpsc::Sender<SweepRequest>,
}

/// Receiving side, consumed by [`spawn_sweep`]
#[derive(Debug)]
pub struct SweepReceiver {
    name: &'static str,
    rx: mpsc::Receiver<SweepRequest>,
}

#[must_use]
pub fn sweep_channel(name: &'static str) -> (SweepHandle, SweepReceiver) {
    let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
    (SweepHandle { name, tx }, SweepReceiver { name, rx })
}

#[cfg(test)]
impl SweepReceiver {
    pub fn try_next(&mut self) -> Option<SweepRequest> {
        self.rx.try_recv().ok()
    }
}

impl SweepHandle {
    /// Ask for a pass without waiting for it. A full queue drops the request,
    /// since the pending ones will cover it.
    pub fn request(&self, request: SweepRequest) {
        if let Err(e) = self.tx.try_send(request) {
            warn!(sweep = self.name, ?request, "Sweep request dropped: {e}");
        }
    }
}

/// Run `pass` every `period` and on request. `pass` gets the guild a request
/// was scoped to, or `None` for all guilds. The first periodic pass happens
/// one period after start.
pub fn spawn_sweep<F>(receiver: SweepReceiver, period: Duration, mut pass: F) -> JoinHandle<()>
where
    F: FnMut(Option<GuildId>) + Send + 'static,
{
    let SweepReceiver { name, mut rx } = receiver;
    tokio::spawn(async move {
        info!(sweep = name, "Starting sweep every {}s", period.as_secs());
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                Some(request) = rx.recv() => {
                    match request {
                        SweepRequest::All => pass(None),
                        SweepRequest::Guild(guild_id) => pass(Some(guild_id)),
                        SweepRequest::Shutdown => {
                            info!(sweep = name, "Sweep shutting down");
                            break;
                        }
                    }
                }
                _ = interval.tick() => {
                    debug!(sweep = name, "Periodic pass");
                    pass(None);
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::settle;
    use std::sync::{Arc, Mutex};

    #[tokio::test(start_paused = true)]
    async fn test_requests_and_ticks() {
        let passes = Arc::new(Mutex::new(Vec::new()));
        let (handle, receiver) = sweep_channel("test");
        let recorded = Arc::clone(&passes);
        let task = spawn_sweep(receiver, Duration::from_secs(60), move |target| {
            recorded.lock().unwrap().push(target);
        });
        settle().await;
        assert!(passes.lock().unwrap().is_empty());

        handle.request(SweepRequest::Guild(GuildId::new(3)));
        settle().await;
        assert_eq!(*passes.lock().unwrap(), vec![Some(GuildId::new(3))]);

        tokio::time::advance(Duration::from_secs(60)).await;
        settle().await;
        assert_eq!(passes.lock().unwrap().len(), 2);
        assert_eq!(passes.lock().unwrap()[1], None);

        handle.request(SweepRequest::Shutdown);
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_keeps_ticking_without_senders() {
        let count = Arc::new(Mutex::new(0));
        let (handle, receiver) = sweep_channel("test");
        drop(handle);
        let recorded = Arc::clone(&count);
        let task = spawn_sweep(receiver, Duration::from_secs(10), move |_| {
            *recorded.lock().unwrap() += 1;
        });
        // let the loop anchor its interval at t=0
        settle().await;

        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(*count.lock().unwrap(), 2);
        task.abort();
    }
}
