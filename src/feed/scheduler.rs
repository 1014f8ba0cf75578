//! Broadcast Scheduler
//!
//! Owns the shared position. On every tick it computes the next position
//! once, then fans a copy out to every registered subscriber concurrently
//! and waits for all sends before the next tick may start.

use std::sync::Arc;
use std::time::Duration;
use futures_util::future::join_all;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::coord::{unix_timestamp, Coordinate, DEFAULT_STEP_DEGREES};
use crate::feed::registry::{SubscriberId, SubscriberRegistry};
use crate::{DEFAULT_DISPATCH_TIMEOUT_MS, DEFAULT_TICK_INTERVAL_MS};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Time between ticks.
    pub tick_interval: Duration,
    /// Upper bound on a single inbox send.
    pub dispatch_timeout: Duration,
    /// Degrees removed from latitude and longitude per tick.
    pub step_degrees: f64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            dispatch_timeout: Duration::from_millis(DEFAULT_DISPATCH_TIMEOUT_MS),
            step_degrees: DEFAULT_STEP_DEGREES,
        }
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Subscribers whose inbox accepted the position.
    pub delivered: usize,
    /// Subscribers that did not take the position within the timeout.
    pub dropped: usize,
    /// Subscribers whose inbox was closed; they are unregistered.
    pub closed: usize,
}

impl DispatchReport {
    /// Number of subscribers in the dispatched snapshot.
    pub fn total(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

enum SendOutcome {
    Delivered,
    Dropped,
    Closed(SubscriberId),
}

/// The periodic update-and-fan-out loop.
pub struct BroadcastScheduler {
    /// Scheduler configuration.
    config: SchedulerConfig,
    /// Registry dispatched to on each tick.
    registry: Arc<SubscriberRegistry>,
    /// Shared position. This scheduler is its only writer.
    position: Coordinate,
    /// Ticks run so far.
    ticks: u64,
}

impl BroadcastScheduler {
    /// Create a scheduler starting at `initial`.
    pub fn new(config: SchedulerConfig, registry: Arc<SubscriberRegistry>, initial: Coordinate) -> Self {
        Self {
            config,
            registry,
            position: initial,
            ticks: 0,
        }
    }

    /// Current shared position.
    pub fn position(&self) -> Coordinate {
        self.position
    }

    /// Ticks run so far.
    pub fn tick_count(&self) -> u64 {
        self.ticks
    }

    /// Move the shared position one step and stamp it with `timestamp`.
    /// Returns the value to dispatch.
    pub fn advance(&mut self, timestamp: i64) -> Coordinate {
        self.position = self.position.advanced(self.config.step_degrees, timestamp);
        self.ticks += 1;
        self.position
    }

    /// Send `position` to every subscriber in the current snapshot.
    ///
    /// All sends run concurrently; each is bounded by the dispatch timeout so
    /// a subscriber that is not draining its inbox cannot hold up the others
    /// or the next tick.
    pub async fn dispatch(&self, position: Coordinate) -> DispatchReport {
        let subscribers = self.registry.snapshot().await;
        if subscribers.is_empty() {
            return DispatchReport::default();
        }

        let timeout = self.config.dispatch_timeout;
        let sends = subscribers.iter().map(|subscriber| async move {
            match subscriber.inbox.send_timeout(position, timeout).await {
                Ok(()) => {
                    if subscriber.mark_caught_up() {
                        info!(subscriber = %subscriber.id, "subscriber caught up");
                    }
                    SendOutcome::Delivered
                }
                Err(SendTimeoutError::Timeout(_)) => {
                    // Warn once per lagging run.
                    if subscriber.mark_lagging() {
                        warn!(
                            subscriber = %subscriber.id,
                            timeout_ms = timeout.as_millis() as u64,
                            "subscriber not keeping up, dropping positions"
                        );
                    } else {
                        debug!(subscriber = %subscriber.id, "position dropped");
                    }
                    SendOutcome::Dropped
                }
                Err(SendTimeoutError::Closed(_)) => SendOutcome::Closed(subscriber.id),
            }
        });

        let mut report = DispatchReport::default();
        for outcome in join_all(sends).await {
            match outcome {
                SendOutcome::Delivered => report.delivered += 1,
                SendOutcome::Dropped => report.dropped += 1,
                SendOutcome::Closed(id) => {
                    report.closed += 1;
                    if self.registry.remove(id).await {
                        debug!(subscriber = %id, "inbox closed, subscriber removed by scheduler");
                    }
                }
            }
        }

        report
    }

    /// Run a single tick: advance, then dispatch.
    pub async fn tick(&mut self) -> DispatchReport {
        let position = self.advance(unix_timestamp());
        self.dispatch(position).await
    }

    /// Tick forever at the configured interval until `shutdown` fires.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        let mut ticker = interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_ms = self.config.tick_interval.as_millis() as u64,
            start = %self.position,
            "Broadcast scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    break;
                }
                _ = ticker.tick() => {
                    let report = self.tick().await;
                    if report.total() > 0 {
                        debug!(
                            tick = self.ticks,
                            delivered = report.delivered,
                            dropped = report.dropped,
                            closed = report.closed,
                            "dispatched"
                        );
                    }
                }
            }
        }

        info!(ticks = self.ticks, last = %self.position, "Broadcast scheduler stopped");
    }
}
