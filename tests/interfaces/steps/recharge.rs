//! Recharge workflow step definitions.

use std::sync::Arc;

use cucumber::{given, then, when, World};
use ledgersync::config::LedgerConfig;
use ledgersync::ledger::{tx, InMemoryLedger, LedgerClient};
use ledgersync::models::{RechargeRecord, RechargeStatus, User, UserCredit};
use ledgersync::recharge::{
    RechargeError, RechargeReceipt, RechargeRequest, RechargeWorkflow, SignatureValidator,
};
use ledgersync::storage::{MemoryDocumentStore, ProjectionStore};

const SECRET: &str = "interface-secret";
const NOW: i64 = 1_700_000_000;

/// Test context for recharge scenarios.
#[derive(World)]
#[world(init = Self::new)]
pub struct RechargeWorld {
    ledger: Arc<InMemoryLedger>,
    client: LedgerClient,
    backend: Arc<MemoryDocumentStore>,
    store: ProjectionStore,
    workflow: RechargeWorkflow,
    last: Option<Result<RechargeReceipt, RechargeError>>,
}

impl std::fmt::Debug for RechargeWorld {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RechargeWorld")
            .field("last", &self.last)
            .finish_non_exhaustive()
    }
}

impl RechargeWorld {
    fn new() -> Self {
        let ledger = Arc::new(InMemoryLedger::new());
        let client = LedgerClient::new(ledger.clone(), &LedgerConfig::default());
        let backend = Arc::new(MemoryDocumentStore::new());
        let store = ProjectionStore::new(backend.clone());
        let validator = SignatureValidator::new(SECRET, 300).expect("valid key");
        let workflow = RechargeWorkflow::new(client.clone(), store.clone(), validator, 150);
        Self {
            ledger,
            client,
            backend,
            store,
            workflow,
            last: None,
        }
    }

    fn request(&self, order_sn: &str, email: &str, age_secs: i64) -> RechargeRequest {
        let mut request = RechargeRequest {
            title: "Token package".to_string(),
            order_sn: order_sn.to_string(),
            email: email.to_string(),
            actual_price: 990,
            timestamp: NOW - age_secs,
            signature: String::new(),
        };
        request.signature = self.workflow.validator().sign(&request.signing_params());
        request
    }

    async fn submit(&mut self, request: RechargeRequest) {
        self.last = Some(self.workflow.recharge_at(&request, NOW).await);
    }
}

// --- Background ---

#[given("a fresh ledger and projection store")]
async fn given_fresh_stores(world: &mut RechargeWorld) {
    world.store.init().await.expect("indexes created");
}

#[given(expr = "a user {string} with email {string} and {int} credits")]
async fn given_user(world: &mut RechargeWorld, user_id: String, email: String, credits: i64) {
    world
        .store
        .insert(&User {
            id: user_id.clone(),
            email,
            username: user_id.clone(),
        })
        .await
        .expect("user stored");
    world
        .client
        .create_user_credit(&user_id, credits, 0, credits)
        .await
        .expect("ledger credit created");
    world
        .store
        .insert(&UserCredit {
            user_id,
            credit: credits,
            total_recharge: credits,
            ..Default::default()
        })
        .await
        .expect("projected credit stored");
}

// --- Given steps ---

#[given(expr = "order {string} for {string} was submitted")]
async fn given_order_submitted(world: &mut RechargeWorld, order_sn: String, email: String) {
    let request = world.request(&order_sn, &email, 10);
    world.submit(request).await;
}

#[given(expr = "order {string} for user {string} is pending")]
async fn given_pending_order(world: &mut RechargeWorld, order_sn: String, user_id: String) {
    let record = RechargeRecord::new(order_sn, user_id, "", 990, RechargeStatus::Pending);
    world
        .store
        .reserve_recharge(&record)
        .await
        .expect("order reserved");
}

#[given("the ledger rejects credit updates")]
async fn given_ledger_rejects(world: &mut RechargeWorld) {
    world.ledger.reject(tx::UPDATE_USER_CREDIT).await;
}

#[given("the projection rejects credit writes")]
async fn given_projection_rejects(world: &mut RechargeWorld) {
    world.backend.set_fail_writes("user_credits", true).await;
}

// --- When steps ---

#[when(expr = "order {string} for {string} is submitted")]
async fn when_order_submitted(world: &mut RechargeWorld, order_sn: String, email: String) {
    let request = world.request(&order_sn, &email, 10);
    world.submit(request).await;
}

#[when(expr = "order {string} for {string} is submitted with a tampered price")]
async fn when_tampered_submitted(world: &mut RechargeWorld, order_sn: String, email: String) {
    let mut request = world.request(&order_sn, &email, 10);
    request.actual_price = 1;
    world.submit(request).await;
}

#[when(expr = "order {string} for {string} signed {int} seconds ago is submitted")]
async fn when_aged_submitted(world: &mut RechargeWorld, order_sn: String, email: String, age: i64) {
    let request = world.request(&order_sn, &email, age);
    world.submit(request).await;
}

#[when(expr = "order {string} for {string} signed {int} seconds ahead is submitted")]
async fn when_future_submitted(
    world: &mut RechargeWorld,
    order_sn: String,
    email: String,
    ahead: i64,
) {
    let request = world.request(&order_sn, &email, -ahead);
    world.submit(request).await;
}

// --- Then steps ---

#[then(expr = "the recharge succeeds with a balance of {int}")]
async fn then_succeeds(world: &mut RechargeWorld, balance: i64) {
    match world.last.as_ref().expect("no recharge submitted") {
        Ok(receipt) => {
            assert_eq!(receipt.new_credit, balance);
            assert_eq!(receipt.added_tokens, 150);
        }
        Err(e) => panic!("expected success, got {} ({})", e, e.kind()),
    }
}

#[then("the result is a replay")]
async fn then_replay(world: &mut RechargeWorld) {
    let receipt = world
        .last
        .as_ref()
        .and_then(|r| r.as_ref().ok())
        .expect("no successful recharge");
    assert!(receipt.replayed);
}

#[then(expr = "the recharge fails with {string}")]
async fn then_fails(world: &mut RechargeWorld, kind: String) {
    match world.last.as_ref().expect("no recharge submitted") {
        Ok(receipt) => panic!("expected {}, got {:?}", kind, receipt),
        Err(e) => assert_eq!(e.kind().as_str(), kind),
    }
}

#[then(expr = "the ledger balance of {string} is {int}")]
async fn then_ledger_balance(world: &mut RechargeWorld, user_id: String, balance: i64) {
    let credit = world
        .client
        .read_user_credit(&user_id)
        .await
        .expect("ledger credit");
    assert_eq!(credit.credit, balance);
}

#[then(expr = "the projected balance of {string} is {int}")]
async fn then_projected_balance(world: &mut RechargeWorld, user_id: String, balance: i64) {
    let credit: UserCredit = world
        .store
        .find_by_key(&user_id)
        .await
        .expect("projection readable")
        .expect("projected credit");
    assert_eq!(credit.credit, balance);
}

#[then(expr = "order {string} is {string}")]
async fn then_order_status(world: &mut RechargeWorld, order_sn: String, status: String) {
    let record = world
        .store
        .find_recharge(&order_sn)
        .await
        .expect("projection readable")
        .expect("order recorded");
    assert_eq!(record.status.as_str(), status);
}

#[then(expr = "order {string} has no record")]
async fn then_no_record(world: &mut RechargeWorld, order_sn: String) {
    let record = world
        .store
        .find_recharge(&order_sn)
        .await
        .expect("projection readable");
    assert!(record.is_none());
}
