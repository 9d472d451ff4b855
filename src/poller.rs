//! Periodic status polling.
//!
//! A fixed-interval timer calls [`ProcessSupervisor::try_status`] on the
//! blocking pool and publishes the result into a single `watch` slot. A tick
//! is skipped (never queued) when the previous poll is still running or when
//! a start/stop/restart holds the supervisor lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::supervisor::{ProcessSupervisor, ServiceState};

#[derive(Debug, Clone)]
pub struct PollerOptions {
    pub interval: Duration,
    /// Upper bound for one status query; exceeding it publishes `Unknown`.
    pub probe_timeout: Duration,
}

impl Default for PollerOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
pub struct PollStats {
    completed: AtomicU64,
    skipped_in_flight: AtomicU64,
    skipped_busy: AtomicU64,
    timed_out: AtomicU64,
}

impl PollStats {
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    /// Ticks dropped because the previous poll had not finished.
    pub fn skipped_in_flight(&self) -> u64 {
        self.skipped_in_flight.load(Ordering::Relaxed)
    }

    /// Ticks dropped because a lifecycle transition held the lock.
    pub fn skipped_busy(&self) -> u64 {
        self.skipped_busy.load(Ordering::Relaxed)
    }

    pub fn timed_out(&self) -> u64 {
        self.timed_out.load(Ordering::Relaxed)
    }
}

/// 블로킹 작업이 실제로 끝났을 때(패닉 포함) in-flight 플래그 해제
struct InFlight(Arc<AtomicBool>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct StatusPoller {
    cancel: CancellationToken,
    handle: Option<JoinHandle<()>>,
    rx: watch::Receiver<Option<ServiceState>>,
    stats: Arc<PollStats>,
}

impl StatusPoller {
    /// Start polling on the current tokio runtime.
    pub fn spawn(supervisor: Arc<ProcessSupervisor>, options: PollerOptions) -> Self {
        let (tx, rx) = watch::channel(None);
        let cancel = CancellationToken::new();
        let stats = Arc::new(PollStats::default());

        let handle = tokio::spawn(run(supervisor, options, tx, cancel.clone(), stats.clone()));

        Self {
            cancel,
            handle: Some(handle),
            rx,
            stats,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<ServiceState>> {
        self.rx.clone()
    }

    /// `None` until the first poll completes.
    pub fn latest(&self) -> Option<ServiceState> {
        *self.rx.borrow()
    }

    pub fn stats(&self) -> &PollStats {
        &self.stats
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancel and wait for the timer task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!("Status poller task failed: {}", e);
            }
        }
    }
}

impl Drop for StatusPoller {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run(
    supervisor: Arc<ProcessSupervisor>,
    options: PollerOptions,
    tx: watch::Sender<Option<ServiceState>>,
    cancel: CancellationToken,
    stats: Arc<PollStats>,
) {
    let tx = Arc::new(tx);
    let in_flight = Arc::new(AtomicBool::new(false));
    let mut ticker = tokio::time::interval(options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!("Status poller started (interval {:?})", options.interval);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        if in_flight.swap(true, Ordering::AcqRel) {
            stats.skipped_in_flight.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("Previous status poll still in flight, skipping tick");
            continue;
        }

        let guard = InFlight(in_flight.clone());
        let sup = supervisor.clone();
        let job = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            sup.try_status()
        });

        let tx = tx.clone();
        let stats = stats.clone();
        let probe_timeout = options.probe_timeout;
        tokio::spawn(async move {
            match tokio::time::timeout(probe_timeout, job).await {
                Ok(Ok(Some(state))) => {
                    stats.completed.fetch_add(1, Ordering::Relaxed);
                    publish(&tx, state);
                }
                Ok(Ok(None)) => {
                    stats.skipped_busy.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!("Lifecycle transition in progress, skipping tick");
                }
                Ok(Err(e)) => {
                    tracing::error!("Status poll panicked: {}", e);
                    publish(&tx, ServiceState::Unknown);
                }
                Err(_) => {
                    stats.timed_out.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Status query exceeded {:?}, reporting Unknown", probe_timeout);
                    publish(&tx, ServiceState::Unknown);
                }
            }
        });
    }
    tracing::info!("Status poller stopped");
}

fn publish(tx: &watch::Sender<Option<ServiceState>>, state: ServiceState) {
    tx.send_if_modified(|slot| {
        if *slot == Some(state) {
            return false;
        }
        match slot {
            Some(prev) => tracing::info!("Service status changed: {} -> {}", prev, state),
            None => tracing::info!("Service status: {}", state),
        }
        *slot = Some(state);
        true
    });
}
