//! Projection sync driven by the live event feed.

use ledgersync::models::{CreditHistory, Novel, UserCredit};
use ledgersync::reconcile::Reconciler;
use ledgersync::storage::projection::CREDIT_HISTORIES_COLLECTION;

use crate::harness::Harness;

fn novel(id: &str, outline: &str, author: &str) -> Novel {
    Novel {
        id: id.to_string(),
        author: author.to_string(),
        story_outline: outline.to_string(),
        total_scenes: "12".to_string(),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_projection_follows_ledger() {
    let mut h = Harness::new().await;
    h.start();

    h.client.create_novel(&novel("n1", "outline-1", "ann")).await.unwrap();
    h.client.create_novel(&novel("n2", "outline-2", "bob")).await.unwrap();
    h.client.update_novel(&novel("n1", "outline-1", "ann rewritten")).await.unwrap();
    h.client.create_user_credit("u1", 5, 0, 5).await.unwrap();
    h.client.consume_user_token("u1").await.unwrap();
    h.client
        .create_credit_history(&CreditHistory {
            user_id: "u1".to_string(),
            amount: -1,
            kind: "consume".to_string(),
            description: "scene generation".to_string(),
            novel_id: "n1".to_string(),
            ..Default::default()
        })
        .await
        .unwrap();
    h.settle().await;

    let projected: Novel = h.store.find_by_key("outline-1").await.unwrap().unwrap();
    assert_eq!(projected.id, "n1");
    assert_eq!(projected.author, "ann rewritten");
    assert_eq!(h.store.count::<Novel>().await.unwrap(), 2);

    let credit: UserCredit = h.store.find_by_key("u1").await.unwrap().unwrap();
    assert_eq!((credit.credit, credit.total_used), (4, 1));
    assert_eq!(h.store.count_in(CREDIT_HISTORIES_COLLECTION).await.unwrap(), 1);

    let report = Reconciler::new(h.client.clone(), h.store.clone())
        .reconcile()
        .await
        .unwrap();
    assert!(report.consistent, "{:?}", report.discrepancies);

    let stats = h.stop().await;
    assert_eq!(stats.failed, 0);
}

#[tokio::test]
async fn test_replay_after_restart_is_idempotent() {
    let mut h = Harness::new().await;
    h.start();
    h.client.create_novel(&novel("n1", "outline-1", "ann")).await.unwrap();
    h.client.create_user_credit("u1", 5, 0, 5).await.unwrap();
    h.client.update_user_credit("u1", 7, 0, 7).await.unwrap();
    h.settle().await;
    h.stop().await;

    let before: Novel = h.store.find_by_key("outline-1").await.unwrap().unwrap();
    let stats = h.replay_all().await;

    assert_eq!(stats.received, 3);
    assert_eq!(stats.failed, 0);
    assert_eq!(h.store.count::<Novel>().await.unwrap(), 1);
    assert_eq!(h.store.count::<UserCredit>().await.unwrap(), 1);

    let after: Novel = h.store.find_by_key("outline-1").await.unwrap().unwrap();
    assert_eq!(before, after);
    let credit: UserCredit = h.store.find_by_key("u1").await.unwrap().unwrap();
    assert_eq!(credit.credit, 7);
}

#[tokio::test]
async fn test_missed_create_heals_on_next_update() {
    let mut h = Harness::new().await;
    h.start();

    h.backend.set_fail_writes("user_credits", true).await;
    h.client.create_user_credit("u1", 5, 0, 5).await.unwrap();
    h.settle().await;
    assert!(h.store.find_by_key::<UserCredit>("u1").await.unwrap().is_none());

    h.backend.set_fail_writes("user_credits", false).await;
    h.client.update_user_credit("u1", 9, 1, 10).await.unwrap();
    h.settle().await;

    let credit: UserCredit = h.store.find_by_key("u1").await.unwrap().unwrap();
    assert_eq!((credit.credit, credit.total_used, credit.total_recharge), (9, 1, 10));

    let stats = h.stop().await;
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.handled, 1);
}

#[tokio::test]
async fn test_delete_survives_redelivery() {
    let mut h = Harness::new().await;
    h.start();
    h.client.create_novel(&novel("n1", "outline-1", "ann")).await.unwrap();
    h.client.delete_novel("n1").await.unwrap();
    h.settle().await;
    h.stop().await;
    assert_eq!(h.store.count::<Novel>().await.unwrap(), 0);

    let stats = h.replay_all().await;
    assert_eq!(stats.failed, 0);
    assert_eq!(h.store.count::<Novel>().await.unwrap(), 0);
}

#[tokio::test]
async fn test_drift_is_reported_until_healed() {
    let mut h = Harness::new().await;
    h.start();
    let reconciler = Reconciler::new(h.client.clone(), h.store.clone());

    h.backend.set_fail_writes("novels", true).await;
    h.client.create_novel(&novel("n1", "outline-1", "ann")).await.unwrap();
    h.settle().await;

    let report = reconciler.reconcile().await.unwrap();
    assert!(!report.consistent);
    assert_eq!(
        report.discrepancies,
        vec!["Novels count mismatch: ledger 1, projection 0".to_string()]
    );

    h.backend.set_fail_writes("novels", false).await;
    h.client.update_novel(&novel("n1", "outline-1", "ann")).await.unwrap();
    h.settle().await;

    assert!(reconciler.reconcile().await.unwrap().consistent);
    h.stop().await;
}
