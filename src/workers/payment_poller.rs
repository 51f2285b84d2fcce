//! Payment status poller.
//!
//! After a USSD push the payer has a couple of minutes to confirm on their
//! handset. The poller checks the payment on a fixed interval until the
//! provider reports a terminal status, the attempt ceiling is reached, or the
//! flow is stopped.
//!
//! A `TimedOut` outcome is local only: the provider may still settle the
//! payment after the poller has given up.

use crate::client::ClientError;
use crate::config::PaymentConfig;
use crate::payments::types::LedgerStatus;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Anything that can report the provider status string for a reference.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch_status(&self, reference: &str) -> Result<Option<String>, ClientError>;
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Floor for the check interval; a zero period would stall the timer.
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay between checks; the first check happens one interval after start.
    pub interval: Duration,
    /// Checks made before giving up.
    pub max_attempts: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_attempts: 24,
        }
    }
}

impl From<&PaymentConfig> for PollerConfig {
    fn from(config: &PaymentConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            max_attempts: config.poll_max_attempts,
        }
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    Completed,
    Failed,
    Cancelled,
    /// Attempt ceiling reached while still pending
    TimedOut,
    /// Stopped by the caller before a terminal status was seen
    Stopped,
}

impl PollOutcome {
    pub fn is_success(self) -> bool {
        self == PollOutcome::Completed
    }

    /// Failed, cancelled and timed out payments all end the flow as unpaid.
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            PollOutcome::Failed | PollOutcome::Cancelled | PollOutcome::TimedOut
        )
    }

    fn from_provider_status(status: &str) -> Option<Self> {
        match LedgerStatus::from_provider_status(status) {
            LedgerStatus::Completed => Some(PollOutcome::Completed),
            LedgerStatus::Failed => Some(PollOutcome::Failed),
            LedgerStatus::Cancelled => Some(PollOutcome::Cancelled),
            LedgerStatus::Pending | LedgerStatus::Processing => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Polling { reference: String, attempts: u32 },
    Terminal(PollOutcome),
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

pub struct PaymentPoller<S> {
    source: Arc<S>,
    config: PollerConfig,
}

impl<S: StatusSource + 'static> PaymentPoller<S> {
    pub fn new(source: Arc<S>, mut config: PollerConfig) -> Self {
        if config.interval < MIN_INTERVAL {
            warn!(interval = ?config.interval, "poll interval too small, clamping to 1ms");
            config.interval = MIN_INTERVAL;
        }
        Self { source, config }
    }

    /// Spawn the polling loop for `reference`. Must be called inside a tokio
    /// runtime.
    pub fn start(&self, reference: impl Into<String>) -> PollHandle {
        let reference = reference.into();
        let (state_tx, state_rx) = watch::channel(PollerState::Polling {
            reference: reference.clone(),
            attempts: 0,
        });
        let (stop_tx, stop_rx) = watch::channel(false);

        let task = tokio::spawn(poll_loop(
            self.source.clone(),
            self.config.clone(),
            reference,
            state_tx,
            stop_rx,
        ));

        PollHandle {
            state_rx,
            stop_tx,
            task,
        }
    }
}

/// Handle to a running poll. Dropping it stops the loop at its next tick.
pub struct PollHandle {
    state_rx: watch::Receiver<PollerState>,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<PollOutcome>,
}

impl PollHandle {
    pub fn state(&self) -> PollerState {
        self.state_rx.borrow().clone()
    }

    /// Cooperative: a check already in flight is allowed to finish.
    pub fn stop(&self) {
        let _ = self.stop_tx.send(true);
    }

    pub async fn wait(self) -> PollOutcome {
        let PollHandle { stop_tx, task, .. } = self;
        let outcome = task.await.unwrap_or(PollOutcome::Stopped);
        drop(stop_tx);
        outcome
    }
}

async fn poll_loop<S: StatusSource>(
    source: Arc<S>,
    config: PollerConfig,
    reference: String,
    state_tx: watch::Sender<PollerState>,
    mut stop_rx: watch::Receiver<bool>,
) -> PollOutcome {
    info!(
        reference = %reference,
        interval_secs = config.interval.as_secs(),
        max_attempts = config.max_attempts,
        "payment poller started"
    );

    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut attempts = 0u32;

    let outcome = loop {
        if attempts >= config.max_attempts {
            warn!(reference = %reference, attempts, "payment still pending, giving up");
            break PollOutcome::TimedOut;
        }

        tokio::select! {
            biased;
            changed = stop_rx.changed() => {
                if changed.is_err() || *stop_rx.borrow() {
                    break PollOutcome::Stopped;
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        attempts += 1;
        state_tx.send_replace(PollerState::Polling {
            reference: reference.clone(),
            attempts,
        });

        match source.fetch_status(&reference).await {
            Ok(Some(status)) => {
                if let Some(outcome) = PollOutcome::from_provider_status(&status) {
                    break outcome;
                }
                debug!(reference = %reference, attempts, status = %status, "payment pending");
            }
            Ok(None) => debug!(reference = %reference, attempts, "no status in response"),
            // Not surfaced to the payer; the next tick retries.
            Err(e) => warn!(reference = %reference, attempts, error = %e, "status check failed"),
        }
    };

    info!(reference = %reference, attempts, outcome = ?outcome, "payment poller finished");
    state_tx.send_replace(PollerState::Terminal(outcome));
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    enum Reply {
        Status(&'static str),
        Error,
    }

    struct ScriptedSource {
        replies: Mutex<VecDeque<Reply>>,
        fallback: &'static str,
        calls: AtomicU32,
    }

    impl ScriptedSource {
        fn new(replies: Vec<Reply>, fallback: &'static str) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                fallback,
                calls: AtomicU32::new(0),
            })
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StatusSource for ScriptedSource {
        async fn fetch_status(&self, _reference: &str) -> Result<Option<String>, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.replies.lock().unwrap().pop_front() {
                Some(Reply::Status(status)) => Ok(Some(status.to_string())),
                Some(Reply::Error) => Err(ClientError::InvalidResponse("boom".to_string())),
                None => Ok(Some(self.fallback.to_string())),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn failed_on_last_tick_stops_after_it() {
        let mut replies: Vec<Reply> = (0..23).map(|_| Reply::Status("PROCESSING")).collect();
        replies.push(Reply::Status("FAILED"));
        let source = ScriptedSource::new(replies, "PROCESSING");

        let started = Instant::now();
        let handle = PaymentPoller::new(source.clone(), PollerConfig::default()).start("ORDER-1");
        let outcome = handle.wait().await;

        assert_eq!(outcome, PollOutcome::Failed);
        assert_eq!(source.calls(), 24);
        assert_eq!(started.elapsed(), Duration::from_secs(120));
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_max_attempts() {
        let source = ScriptedSource::new(Vec::new(), "PROCESSING");
        let handle = PaymentPoller::new(source.clone(), PollerConfig::default()).start("ORDER-2");

        let outcome = handle.wait().await;
        assert_eq!(outcome, PollOutcome::TimedOut);
        assert!(outcome.is_failure());
        assert_eq!(source.calls(), 24);
    }

    #[tokio::test(start_paused = true)]
    async fn errors_are_retried_on_next_tick() {
        let source = ScriptedSource::new(
            vec![Reply::Error, Reply::Error, Reply::Status("payment_received")],
            "PROCESSING",
        );
        let handle = PaymentPoller::new(source.clone(), PollerConfig::default()).start("ORDER-3");

        assert!(handle.wait().await.is_success());
        assert_eq!(source.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_interval_is_clamped() {
        let source = ScriptedSource::new(
            vec![Reply::Status("PROCESSING"), Reply::Status("COMPLETED")],
            "PROCESSING",
        );
        let config = PollerConfig {
            interval: Duration::ZERO,
            max_attempts: 5,
        };
        let handle = PaymentPoller::new(source.clone(), config).start("ORDER-6");

        assert_eq!(handle.wait().await, PollOutcome::Completed);
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_polling() {
        let source = ScriptedSource::new(Vec::new(), "PROCESSING");
        let handle = PaymentPoller::new(source.clone(), PollerConfig::default()).start("ORDER-4");

        tokio::time::advance(Duration::from_secs(11)).await;
        tokio::task::yield_now().await;
        handle.stop();

        assert_eq!(handle.wait().await, PollOutcome::Stopped);
        assert!(source.calls() <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn state_reports_terminal_outcome() {
        let source = ScriptedSource::new(vec![Reply::Status("CANCELLED")], "PROCESSING");
        let handle = PaymentPoller::new(source, PollerConfig::default()).start("ORDER-5");
        assert_eq!(
            handle.state(),
            PollerState::Polling {
                reference: "ORDER-5".to_string(),
                attempts: 0
            }
        );

        let mut state_rx = handle.state_rx.clone();
        let outcome = handle.wait().await;
        assert_eq!(outcome, PollOutcome::Cancelled);
        assert_eq!(
            *state_rx.borrow_and_update(),
            PollerState::Terminal(PollOutcome::Cancelled)
        );
    }
}
