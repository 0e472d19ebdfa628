//! ledgersync: keeps the projection store in step with the ledger.
//!
//! Runs the event dispatcher under supervision and, when enabled, the
//! consistency reconciler on an interval. The recharge workflow is built at
//! startup so a bad signing configuration fails fast.
//!
//! ## Configuration
//! ```yaml
//! storage:
//!   type: mongodb
//!   mongodb:
//!     uri: mongodb://localhost:27017
//!     database: ledgersync
//!
//! dispatcher:
//!   handler_name: projection-sync
//!   max_restarts: 10
//!
//! recharge:
//!   package_amount: 150
//!
//! reconcile:
//!   enabled: true
//!   interval_secs: 300
//! ```

use std::sync::Arc;
use std::time::Duration;

use backon::Retryable;
use tokio::sync::watch;
use tracing::{error, info, warn};

use ledgersync::config::Config;
use ledgersync::dispatcher::{EventDispatcher, HandlerRegistry};
use ledgersync::ledger::{InMemoryLedger, LedgerClient};
use ledgersync::recharge::RechargeWorkflow;
use ledgersync::reconcile::Reconciler;
use ledgersync::storage::init_storage;
use ledgersync::utils::bootstrap::init_tracing;
use ledgersync::utils::retry::{connection_backoff, supervision_backoff};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let config_path = std::env::args().nth(1);
    let config = Config::load(config_path.as_deref())?;

    let store = (|| init_storage(&config.storage))
        .retry(connection_backoff())
        .notify(|e, delay| warn!(error = %e, ?delay, "Storage unavailable, retrying"))
        .await?;

    let ledger = Arc::new(InMemoryLedger::new());
    let client = LedgerClient::new(ledger.clone(), &config.ledger);

    // Fail fast on a bad signing configuration.
    let _ = RechargeWorkflow::from_config(client.clone(), store.clone(), &config.recharge)?;
    info!(
        package_amount = config.recharge.package_amount,
        max_age_secs = config.recharge.max_age_secs,
        "Recharge signing configuration valid"
    );

    let registry = HandlerRegistry::standard(&store);
    info!(events = ?registry.event_names(), "Sync handlers registered");
    let dispatcher = EventDispatcher::new(
        ledger.clone(),
        registry,
        store.clone(),
        config.dispatcher.clone(),
    );
    let mut handle =
        dispatcher.spawn_supervised(supervision_backoff(config.dispatcher.max_restarts));

    let (reconcile_stop, reconcile_task) = if config.reconcile.enabled {
        let reconciler = Reconciler::new(client.clone(), store.clone());
        let (stop_tx, stop_rx) = watch::channel(false);
        let period = Duration::from_secs(config.reconcile.interval_secs.max(1));
        let task = tokio::spawn(run_reconciler(reconciler, period, stop_rx));
        (Some(stop_tx), Some(task))
    } else {
        (None, None)
    };

    info!("Press Ctrl+C to exit");
    let outcome = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal?;
            info!("Shutting down...");
            handle.stop();
            handle.stopped().await
        }
        result = handle.stopped() => {
            error!("Event dispatcher exited on its own");
            result
        }
    };

    if let Some(stop) = reconcile_stop {
        let _ = stop.send(true);
    }
    if let Some(task) = reconcile_task {
        let _ = task.await;
    }

    store.close().await?;
    info!("Storage closed");

    let stats = outcome?;
    info!(
        received = stats.received,
        handled = stats.handled,
        failed = stats.failed,
        "Shutdown complete"
    );
    Ok(())
}

async fn run_reconciler(reconciler: Reconciler, period: Duration, mut stop: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(period);
    loop {
        tokio::select! {
            _ = stop.changed() => break,
            _ = ticker.tick() => match reconciler.reconcile().await {
                Ok(report) if !report.consistent => {
                    warn!(discrepancies = ?report.discrepancies, "Ledger and projection diverged");
                }
                Ok(_) => {}
                Err(e) => warn!(error = %e, "Reconciliation failed"),
            }
        }
    }
}
