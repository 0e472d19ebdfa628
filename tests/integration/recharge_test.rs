//! Recharge workflow alongside live sync.

use std::sync::Arc;
use std::time::Duration;

use ledgersync::config::LedgerConfig;
use ledgersync::models::{RechargeStatus, UserCredit};
use ledgersync::reconcile::Reconciler;
use ledgersync::ErrorKind;
use tokio::sync::Barrier;

use crate::harness::{signed_request, Harness};

#[tokio::test]
async fn test_recharge_reaches_ledger_and_projection() {
    let mut h = Harness::new().await;
    h.start();
    h.add_user("u1", "reader@example.com", 10).await;
    h.settle().await;

    let receipt = h
        .workflow()
        .recharge(&signed_request("ORD-1", "reader@example.com"))
        .await
        .unwrap();
    h.settle().await;

    assert_eq!((receipt.user_id.as_str(), receipt.new_credit), ("u1", 160));
    assert_eq!(h.client.read_user_credit("u1").await.unwrap().credit, 160);
    let projected: UserCredit = h.store.find_by_key("u1").await.unwrap().unwrap();
    assert_eq!(projected.credit, 160);
    assert_eq!(projected.total_recharge, 160);

    let report = Reconciler::new(h.client.clone(), h.store.clone())
        .reconcile()
        .await
        .unwrap();
    assert!(report.consistent);
    assert_eq!(report.stats.total_credit, 160);
    h.stop().await;
}

#[tokio::test]
async fn test_duplicate_orders_across_workers_charge_once() {
    let h = Harness::new().await;
    h.add_user("u1", "reader@example.com", 0).await;
    let height = h.ledger.height().await;
    let request = signed_request("ORD-1", "reader@example.com");

    let workers = 4;
    let barrier = Arc::new(Barrier::new(workers));
    let mut tasks = Vec::new();
    for _ in 0..workers {
        // Each worker stands in for a separate process sharing the store.
        let workflow = h.workflow();
        let request = request.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            workflow.recharge(&request).await
        }));
    }

    for task in tasks {
        match task.await.unwrap() {
            Ok(receipt) => assert_eq!(receipt.new_credit, 150),
            Err(e) => assert_eq!(e.kind(), ErrorKind::DuplicateOrderInProgress),
        }
    }

    assert_eq!(h.ledger.height().await, height + 1);
    assert_eq!(h.client.read_user_credit("u1").await.unwrap().credit, 150);

    let replay = h
        .workflow()
        .recharge(&request)
        .await
        .unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.new_credit, 150);
}

#[tokio::test]
async fn test_unknown_commit_is_never_retried() {
    let h = Harness::with_ledger_config(LedgerConfig {
        submit_timeout_ms: 50,
        ..Default::default()
    })
    .await;
    h.add_user("u1", "reader@example.com", 10).await;
    h.ledger.set_reply_delay(Some(Duration::from_millis(200))).await;

    let request = signed_request("ORD-1", "reader@example.com");
    let err = h.workflow().recharge(&request).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LedgerWriteFailure);

    // The write landed even though the caller gave up waiting.
    assert_eq!(h.client.read_user_credit("u1").await.unwrap().credit, 160);
    let record = h.store.find_recharge("ORD-1").await.unwrap().unwrap();
    assert_eq!(record.status, RechargeStatus::Failed);

    let retry = h.workflow().recharge(&request).await.unwrap_err();
    assert_eq!(retry.kind(), ErrorKind::OrderAlreadyFailed);
    assert_eq!(h.client.read_user_credit("u1").await.unwrap().credit, 160);
}
