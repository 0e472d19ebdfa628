//! Event dispatcher.
//!
//! Subscribes to the ledger's event feed and routes each event by name to
//! its sync handler. Events are handled one at a time, in feed order. An
//! event that cannot be routed, decoded or applied is logged and skipped;
//! nothing short of cancellation or feed closure stops the loop.
//!
//! Opening the subscription is the one fatal failure of a single run.
//! [`EventDispatcher::run_supervised`] wraps runs in a bounded restart policy
//! for owners that want one.

pub mod fields;
mod registry;

pub use fields::{Fields, FromFields};
pub use registry::HandlerRegistry;

use std::sync::Arc;

use backon::{ExponentialBuilder, Retryable};
use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::DispatcherConfig;
use crate::error::ErrorKind;
use crate::interfaces::{EventFeed, LedgerError, LedgerEvent};
use crate::storage::ProjectionStore;

/// Errors that end a dispatcher run.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Failed to open event subscription: {0}")]
    Subscription(#[source] LedgerError),

    /// Only surfaced by supervised runs that ran out of restarts.
    #[error("Event feed closed")]
    FeedClosed,

    #[error("Dispatcher task aborted: {0}")]
    Aborted(String),
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        ErrorKind::SubscriptionFailure
    }
}

/// Why a run ended without error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StopReason {
    #[default]
    Cancelled,
    /// The feed ended. The owner decides whether to resubscribe.
    FeedClosed,
}

/// Counters for one dispatcher run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub received: u64,
    pub handled: u64,
    /// No handler registered for the event name.
    pub unhandled: u64,
    /// Excluded by the event filter.
    pub filtered: u64,
    /// Decode or handler failures.
    pub failed: u64,
    pub last_block: Option<u64>,
    pub stop_reason: StopReason,
}

/// Routes ledger events to projection handlers.
#[derive(Clone)]
pub struct EventDispatcher {
    feed: Arc<dyn EventFeed>,
    registry: Arc<HandlerRegistry>,
    store: ProjectionStore,
    config: DispatcherConfig,
}

impl EventDispatcher {
    pub fn new(
        feed: Arc<dyn EventFeed>,
        registry: HandlerRegistry,
        store: ProjectionStore,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            feed,
            registry: Arc::new(registry),
            store,
            config,
        }
    }

    /// Where the subscription should start.
    ///
    /// An explicit start block wins. Otherwise the last checkpointed block
    /// is delivered again, since handlers tolerate duplicates. With neither,
    /// the feed's live position is used.
    pub async fn resolve_start_block(&self) -> Option<u64> {
        if let Some(block) = self.config.start_block {
            return Some(block);
        }
        match self.store.load_position(&self.config.handler_name).await {
            Ok(position) => position,
            Err(e) => {
                warn!(error = %e, "Could not load sync checkpoint, starting live");
                None
            }
        }
    }

    /// Consume the feed until cancelled or the feed ends.
    #[tracing::instrument(name = "dispatcher.run", skip_all, fields(handler = %self.config.handler_name))]
    pub async fn run(
        &self,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<DispatchStats, DispatchError> {
        let mut stats = DispatchStats::default();
        if *cancel.borrow() {
            return Ok(stats);
        }

        let start_block = self.resolve_start_block().await;
        let mut events = self
            .feed
            .subscribe(start_block)
            .await
            .map_err(DispatchError::Subscription)?;
        info!(?start_block, handlers = self.registry.len(), "Event dispatcher started");

        loop {
            tokio::select! {
                biased;
                changed = cancel.changed() => {
                    // A dropped sender means the owner is gone.
                    if changed.is_err() || *cancel.borrow() {
                        stats.stop_reason = StopReason::Cancelled;
                        break;
                    }
                }
                next = events.next() => match next {
                    Some(event) => self.dispatch(&event, &mut stats).await,
                    None => {
                        warn!("Event feed closed");
                        stats.stop_reason = StopReason::FeedClosed;
                        break;
                    }
                }
            }
        }

        info!(
            received = stats.received,
            handled = stats.handled,
            failed = stats.failed,
            reason = ?stats.stop_reason,
            "Event dispatcher stopped"
        );
        Ok(stats)
    }

    /// Apply one event. Never fails; problems are logged and counted.
    pub async fn dispatch(&self, event: &LedgerEvent, stats: &mut DispatchStats) {
        stats.received += 1;
        stats.last_block = Some(event.block_number);
        let event_name = event.event_name.as_str();
        let block = event.block_number;

        if !self.accepts(event_name) {
            stats.filtered += 1;
            debug!(event_name, block, "Event filtered out");
        } else {
            match self.registry.get(event_name) {
                None => {
                    stats.unhandled += 1;
                    warn!(event_name, block, "Unhandled event, skipping");
                }
                Some(handler) => match Fields::decode(&event.payload) {
                    Err(e) => {
                        stats.failed += 1;
                        error!(event_name, block, error = %e, "Failed to decode event payload");
                    }
                    Ok(fields) => match handler.handle(&fields).await {
                        Ok(outcome) => {
                            stats.handled += 1;
                            debug!(event_name, block, handler = handler.name(), ?outcome, "Event applied");
                        }
                        Err(e) => {
                            stats.failed += 1;
                            error!(
                                event_name,
                                block,
                                handler = handler.name(),
                                kind = %e.kind(),
                                error = %e,
                                "Projection sync failed"
                            );
                        }
                    },
                },
            }
        }

        if let Err(e) = self
            .store
            .save_position(&self.config.handler_name, block)
            .await
        {
            warn!(block, error = %e, "Failed to save sync checkpoint");
        }
    }

    fn accepts(&self, event_name: &str) -> bool {
        self.config.event_filter.is_empty()
            || self.config.event_filter.iter().any(|name| name == event_name)
    }

    /// Run, resubscribing after a subscription failure or feed closure
    /// until cancelled or `backoff` is exhausted.
    ///
    /// Each restart resumes from the checkpoint. The returned stats cover
    /// the last run only.
    pub async fn run_supervised(
        &self,
        cancel: watch::Receiver<bool>,
        backoff: ExponentialBuilder,
    ) -> Result<DispatchStats, DispatchError> {
        let attempt = || {
            let cancel = cancel.clone();
            async move {
                let stats = self.run(cancel).await?;
                match stats.stop_reason {
                    StopReason::Cancelled => Ok(stats),
                    StopReason::FeedClosed => Err(DispatchError::FeedClosed),
                }
            }
        };

        attempt
            .retry(backoff)
            .sleep(tokio::time::sleep)
            .when(|_| !*cancel.borrow())
            .notify(|e, delay| {
                warn!(error = %e, kind = %e.kind(), ?delay, "Restarting event dispatcher")
            })
            .await
    }

    /// Run on a background task.
    pub fn spawn(&self) -> DispatcherHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let dispatcher = self.clone();
        let task = tokio::spawn(async move { dispatcher.run(cancel_rx).await });
        DispatcherHandle {
            cancel: cancel_tx,
            task,
        }
    }

    /// Run supervised on a background task.
    pub fn spawn_supervised(&self, backoff: ExponentialBuilder) -> DispatcherHandle {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let dispatcher = self.clone();
        let task =
            tokio::spawn(async move { dispatcher.run_supervised(cancel_rx, backoff).await });
        DispatcherHandle {
            cancel: cancel_tx,
            task,
        }
    }
}

/// Handle to a running dispatcher task.
pub struct DispatcherHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<Result<DispatchStats, DispatchError>>,
}

impl DispatcherHandle {
    /// Signal the dispatcher to stop after the event in hand.
    pub fn stop(&self) {
        let _ = self.cancel.send(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end. Must not be awaited again once it has
    /// returned.
    pub async fn stopped(&mut self) -> Result<DispatchStats, DispatchError> {
        match (&mut self.task).await {
            Ok(result) => result,
            Err(e) => Err(DispatchError::Aborted(e.to_string())),
        }
    }
}
