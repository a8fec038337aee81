use std::sync::Arc;

use lexkv::storage::BaseMapping;
use lexkv::{TransactionError, TransactionManager, TxnId};

fn seeded(entries: &[(&str, &str)]) -> TransactionManager {
    let base: BaseMapping = entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    TransactionManager::new(base)
}

#[tokio::test]
async fn second_writer_retries_until_first_commits() {
    let manager = seeded(&[]);

    let tx1 = manager.begin().await;
    manager.write(&tx1, "a", "1").await.unwrap();

    let tx2 = manager.begin().await;
    let err = manager.write(&tx2, "a", "2").await.unwrap_err();
    assert!(matches!(err, TransactionError::Locked { owner, .. } if owner == tx1));

    manager.commit(&tx1).await;
    assert_eq!(manager.read(None, "a").await.as_deref(), Some("1"));

    manager.write(&tx2, "a", "2").await.unwrap();
    manager.commit(&tx2).await;
    assert_eq!(manager.read(None, "a").await.as_deref(), Some("2"));
}

#[tokio::test]
async fn uncommitted_writes_are_private_to_their_transaction() {
    let manager = seeded(&[("hello", "sawubona")]);

    let writer = manager.begin().await;
    let other = manager.begin().await;
    manager.write(&writer, "hello", "hi").await.unwrap();
    manager.write(&writer, "fresh", "new").await.unwrap();

    assert_eq!(manager.read(Some(&writer), "hello").await.as_deref(), Some("hi"));
    assert_eq!(manager.read(Some(&writer), "fresh").await.as_deref(), Some("new"));

    assert_eq!(manager.read(None, "hello").await.as_deref(), Some("sawubona"));
    assert_eq!(manager.read(Some(&other), "hello").await.as_deref(), Some("sawubona"));
    assert_eq!(manager.read(Some(&other), "fresh").await, None);

    manager.commit(&writer).await;
    assert_eq!(manager.read(Some(&other), "hello").await.as_deref(), Some("hi"));
}

#[tokio::test]
async fn rollback_restores_pre_transaction_view() {
    let manager = seeded(&[("hello", "sawubona"), ("world", "umhlaba")]);

    let tx = manager.begin().await;
    manager.write(&tx, "hello", "changed").await.unwrap();
    manager.delete(&tx, "world").await.unwrap();
    manager.write(&tx, "extra", "x").await.unwrap();
    assert!(manager.rollback(&tx).await);

    assert_eq!(manager.read(None, "hello").await.as_deref(), Some("sawubona"));
    assert_eq!(manager.read(None, "world").await.as_deref(), Some("umhlaba"));
    assert_eq!(manager.read(None, "extra").await, None);
    for key in ["hello", "world", "extra"] {
        assert_eq!(manager.lock_owner(key).await, None);
    }
}

#[tokio::test]
async fn commit_and_rollback_are_idempotent() {
    let manager = seeded(&[("k", "v0")]);

    let tx = manager.begin().await;
    manager.write(&tx, "k", "v1").await.unwrap();
    assert_eq!(manager.commit(&tx).await.writes_applied, 1);

    let before = manager.committed().await;
    assert_eq!(manager.commit(&tx).await.writes_applied, 0);
    assert!(!manager.rollback(&tx).await);
    assert_eq!(manager.commit(&TxnId::new()).await.writes_applied, 0);
    assert!(!manager.rollback(&TxnId::new()).await);
    assert_eq!(manager.committed().await, before);
    assert_eq!(manager.active_transactions().await, 0);
}

#[tokio::test]
async fn prepare_rejects_finished_or_unknown_transactions() {
    let manager = seeded(&[]);
    let tx = manager.begin().await;
    manager.prepare(&tx).await.expect("active transaction prepares");

    manager.rollback(&tx).await;
    assert_eq!(
        manager.prepare(&tx).await,
        Err(TransactionError::UnknownTransaction(tx))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exactly_one_concurrent_writer_wins_the_lock() {
    let manager = Arc::new(seeded(&[]));
    let mut tasks = Vec::new();
    for i in 0..16 {
        let manager = manager.clone();
        tasks.push(tokio::spawn(async move {
            let tx = manager.begin().await;
            let won = manager.write(&tx, "contended", format!("v{i}")).await.is_ok();
            (tx, won)
        }));
    }

    let mut winners = Vec::new();
    for task in tasks {
        let (tx, won) = task.await.unwrap();
        if won {
            winners.push(tx);
        }
    }
    assert_eq!(winners.len(), 1);
    assert_eq!(manager.lock_owner("contended").await, Some(winners[0]));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn observers_never_see_a_partial_commit() {
    let manager = Arc::new(seeded(&[]));
    let keys: Vec<String> = (0..50).map(|i| format!("key{i}")).collect();

    let tx = manager.begin().await;
    for key in &keys {
        manager.write(&tx, key, "done").await.unwrap();
    }

    let observer = {
        let manager = manager.clone();
        tokio::spawn(async move {
            for _ in 0..200 {
                let view = manager.committed().await;
                assert!(
                    view.is_empty() || view.len() == 50,
                    "observed {} of 50 writes",
                    view.len()
                );
                tokio::task::yield_now().await;
            }
        })
    };

    manager.commit(&tx).await;
    observer.await.unwrap();

    let view = manager.committed().await;
    assert!(keys.iter().all(|key| view.get(key).map(String::as_str) == Some("done")));
    assert!(manager.lock_owner("key0").await.is_none());
}
