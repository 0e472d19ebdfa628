//! Shared wiring for integration tests.

use std::sync::Arc;
use std::time::Duration;

use ledgersync::config::{DispatcherConfig, LedgerConfig};
use ledgersync::dispatcher::{DispatchStats, DispatcherHandle, EventDispatcher, HandlerRegistry};
use ledgersync::ledger::{InMemoryLedger, LedgerClient};
use ledgersync::models::User;
use ledgersync::recharge::{RechargeRequest, RechargeWorkflow, SignatureValidator};
use ledgersync::storage::{MemoryDocumentStore, ProjectionStore};
use tokio::sync::watch;

pub const SECRET: &str = "integration-secret";
pub const HANDLER: &str = "projection-sync";

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub client: LedgerClient,
    pub backend: Arc<MemoryDocumentStore>,
    pub store: ProjectionStore,
    handle: Option<DispatcherHandle>,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_ledger_config(LedgerConfig::default()).await
    }

    pub async fn with_ledger_config(config: LedgerConfig) -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let client = LedgerClient::new(ledger.clone(), &config);
        let backend = Arc::new(MemoryDocumentStore::new());
        let store = ProjectionStore::new(backend.clone());
        store.init().await.unwrap();
        Self {
            ledger,
            client,
            backend,
            store,
            handle: None,
        }
    }

    pub fn dispatcher(&self, start_block: Option<u64>) -> EventDispatcher {
        let config = DispatcherConfig {
            handler_name: HANDLER.to_string(),
            start_block,
            ..Default::default()
        };
        EventDispatcher::new(
            self.ledger.clone(),
            HandlerRegistry::standard(&self.store),
            self.store.clone(),
            config,
        )
    }

    /// Start syncing from the first block.
    pub fn start(&mut self) {
        self.handle = Some(self.dispatcher(Some(1)).spawn());
    }

    pub async fn stop(&mut self) -> DispatchStats {
        let mut handle = self.handle.take().expect("dispatcher not started");
        handle.stop();
        handle.stopped().await.unwrap()
    }

    /// Wait until every committed block has been dispatched.
    pub async fn settle(&self) {
        let height = self.ledger.height().await;
        if height == 0 {
            return;
        }
        for _ in 0..200 {
            if self.store.load_position(HANDLER).await.unwrap() == Some(height) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("dispatcher did not reach block {}", height);
    }

    /// Close the feed and replay the whole log through a fresh dispatcher.
    pub async fn replay_all(&self) -> DispatchStats {
        self.ledger.close_feed().await;
        let (_cancel, rx) = watch::channel(false);
        self.dispatcher(Some(1)).run(rx).await.unwrap()
    }

    pub fn workflow(&self) -> RechargeWorkflow {
        let validator = SignatureValidator::new(SECRET, 300).unwrap();
        RechargeWorkflow::new(self.client.clone(), self.store.clone(), validator, 150)
    }

    pub async fn add_user(&self, id: &str, email: &str, credit: i64) {
        self.store
            .insert(&User {
                id: id.to_string(),
                email: email.to_string(),
                username: id.to_string(),
            })
            .await
            .unwrap();
        self.client
            .create_user_credit(id, credit, 0, credit)
            .await
            .unwrap();
    }
}

pub fn signed_request(order_sn: &str, email: &str) -> RechargeRequest {
    let validator = SignatureValidator::new(SECRET, 300).unwrap();
    let mut request = RechargeRequest {
        title: "Token package".to_string(),
        order_sn: order_sn.to_string(),
        email: email.to_string(),
        actual_price: 990,
        timestamp: chrono::Utc::now().timestamp(),
        signature: String::new(),
    };
    request.signature = validator.sign(&request.signing_params());
    request
}
