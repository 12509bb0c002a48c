mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use uuid::Uuid;

use common::{command, money, FlakyAccounts, FlakyTransfers, Harness, LOCK_PREFIX};
use ledger_core::domain::audit::{ACTION_TRANSFER_COMPLETED, ACTION_TRANSFER_FAILED};
use ledger_core::domain::{AccountStatus, Actor, TransferStatus};
use ledger_core::ports::{AccountRepository, LockStore, TransactionRepository, TransferRepository};
use ledger_core::services::{
    DistributedLock, ReconcileOutcome, ReconcileSummary, ReconcilerConfig, TransferReconciler,
};
use ledger_core::TransferError;

fn reconciler(h: &Harness) -> Arc<TransferReconciler> {
    reconciler_with(h, ReconcilerConfig::default())
}

fn reconciler_with(h: &Harness, config: ReconcilerConfig) -> Arc<TransferReconciler> {
    reconciler_over(h, h.ledger.clone(), h.ledger.clone(), config)
}

fn reconciler_over(
    h: &Harness,
    accounts: Arc<dyn AccountRepository>,
    transfers: Arc<dyn TransferRepository>,
    config: ReconcilerConfig,
) -> Arc<TransferReconciler> {
    Arc::new(TransferReconciler::new(
        accounts,
        transfers,
        h.ledger.clone(),
        h.gateway.clone(),
        h.audit.clone(),
        h.lock.clone(),
        config,
    ))
}

async fn status_of(h: &Harness, id: Uuid) -> TransferStatus {
    TransferRepository::get_by_id(h.ledger.as_ref(), id)
        .await
        .unwrap()
        .status
}

#[tokio::test]
async fn test_gateway_completed_moves_funds() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;

    let summary = reconciler(&h).reconcile_pending().await.unwrap();
    assert_eq!(
        summary,
        ReconcileSummary {
            completed: 1,
            ..Default::default()
        }
    );

    let stored = TransferRepository::get_by_id(h.ledger.as_ref(), transfer.id)
        .await
        .unwrap();
    assert_eq!(stored.status, TransferStatus::Completed);
    assert!(stored.debit_transaction_id.is_some());
    assert_eq!(h.balance(a.id).await, money("380.00"));
    assert_eq!(h.balance(b.id).await, money("120.00"));

    let legs = h
        .ledger
        .list_by_reference(&transfer.reference_number)
        .await
        .unwrap();
    assert_eq!(legs.len(), 2);
    assert!(h.audit.actions().contains(&ACTION_TRANSFER_COMPLETED.to_string()));
    assert!(h.ledger.find_pending_external(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_completed_transfer_is_not_reconciled_twice() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    let reconciler = reconciler(&h);

    reconciler.reconcile_pending().await.unwrap();
    let second = reconciler.reconcile_pending().await.unwrap();

    assert_eq!(second.total(), 0);
    assert_eq!(h.ledger.transaction_count(), 2);
    assert_eq!(h.balance(a.id).await, money("380.00"));
}

#[tokio::test]
async fn test_unsettled_transfer_stays_pending() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    h.gateway.set_status("ext-a", "processing");

    let summary = reconciler(&h).reconcile_pending().await.unwrap();

    assert_eq!(summary.pending, 1);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Pending);
    assert_eq!(h.ledger.transaction_count(), 0);
}

#[tokio::test]
async fn test_gateway_failure_marks_transfer_failed() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    h.gateway.set_status("ext-a", "FAILED");

    let summary = reconciler(&h).reconcile_pending().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Failed);
    assert_eq!(h.balance(a.id).await, money("500.00"));
    assert!(h.audit.actions().contains(&ACTION_TRANSFER_FAILED.to_string()));
}

#[tokio::test]
async fn test_underfunded_source_fails_without_moving_funds() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "50.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;

    let outcome = reconciler(&h).reconcile_transfer(transfer.clone()).await;

    assert_eq!(outcome, ReconcileOutcome::Failed);
    let stored = TransferRepository::get_by_id(h.ledger.as_ref(), transfer.id)
        .await
        .unwrap();
    assert_eq!(stored.status, TransferStatus::Failed);
    assert_eq!(stored.error_message.as_deref(), Some("Insufficient funds"));
    assert_eq!(h.balance(a.id).await, money("50.00"));
    assert_eq!(h.ledger.transaction_count(), 0);
}

#[tokio::test]
async fn test_inactive_destination_fails_transfer() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    h.ledger
        .update_status(b.id, AccountStatus::Inactive)
        .await
        .unwrap();

    let outcome = reconciler(&h).reconcile_transfer(transfer.clone()).await;

    assert_eq!(outcome, ReconcileOutcome::Failed);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Failed);
    assert_eq!(h.balance(a.id).await, money("500.00"));
}

#[tokio::test]
async fn test_busy_account_pair_is_skipped_until_next_pass() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;

    let key = format!("{}{}", LOCK_PREFIX, DistributedLock::account_pair_key(a.id, b.id));
    h.lock_store
        .set_if_absent(&key, "orchestrator", Duration::from_secs(30))
        .await
        .unwrap();
    let reconciler = reconciler(&h);

    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Pending);

    h.lock_store.release(&key, "orchestrator").await.unwrap();
    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Completed);
}

#[tokio::test]
async fn test_gateway_outage_is_retried_next_pass() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    h.gateway.status_unavailable.store(true, Ordering::SeqCst);

    let reconciler = reconciler(&h);
    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Pending);

    h.gateway.status_unavailable.store(false, Ordering::SeqCst);
    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.completed, 1);
}

#[tokio::test]
async fn test_one_failing_transfer_does_not_block_others() {
    let h = Harness::new();
    let rich = h.open_account(Uuid::new_v4(), "1000.00").await;
    let poor = h.open_account(Uuid::new_v4(), "1.00").await;
    let sink = h.open_account(Uuid::new_v4(), "0.00").await;
    let third = h.open_account(Uuid::new_v4(), "0.00").await;

    let ok = h.delegated_transfer(rich.id, sink.id, "100.00", "ext-ok").await;
    let broke = h.delegated_transfer(poor.id, sink.id, "100.00", "ext-broke").await;
    let waiting = h.delegated_transfer(rich.id, third.id, "5.00", "ext-wait").await;
    h.gateway.set_status("ext-wait", "processing");

    let summary = reconciler(&h).reconcile_pending().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.pending, 1);
    assert_eq!(status_of(&h, ok.id).await, TransferStatus::Completed);
    assert_eq!(status_of(&h, broke.id).await, TransferStatus::Failed);
    assert_eq!(status_of(&h, waiting.id).await, TransferStatus::Pending);
    assert_eq!(h.balance(sink.id).await, money("100.00"));
}

#[tokio::test]
async fn test_batch_size_bounds_a_pass() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "1000.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    for i in 0..3 {
        h.delegated_transfer(a.id, b.id, "1.00", &format!("ext-{i}")).await;
    }
    h.gateway.set_default_status("processing");

    let summary = reconciler_with(
        &h,
        ReconcilerConfig {
            batch_size: 2,
            ..Default::default()
        },
    )
    .reconcile_pending()
    .await
    .unwrap();

    assert_eq!(summary.total(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_reconciles_until_shutdown() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    h.gateway.set_status("ext-a", "processing");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(
        reconciler_with(
            &h,
            ReconcilerConfig {
                interval: Duration::from_secs(5),
                batch_size: 10,
                ..Default::default()
            },
        )
        .run(shutdown_rx),
    );

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Pending);
    let polls_before = h.gateway.status_calls.load(Ordering::SeqCst);
    assert!(polls_before >= 1);

    h.gateway.set_status("ext-a", "completed");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Completed);

    shutdown_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("reconciler stops on shutdown")
        .unwrap();
}

fn sweeping() -> ReconcilerConfig {
    ReconcilerConfig {
        stale_after: Duration::ZERO,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_account_read_error_during_revalidation_is_retried() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    let accounts = FlakyAccounts::new(h.ledger.clone());
    accounts.fail_reads(1);
    let reconciler = reconciler_over(&h, accounts, h.ledger.clone(), ReconcilerConfig::default());

    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(
        summary,
        ReconcileSummary {
            errors: 1,
            ..Default::default()
        }
    );
    let stored = TransferRepository::get_by_id(h.ledger.as_ref(), transfer.id)
        .await
        .unwrap();
    assert_eq!(stored.status, TransferStatus::Pending);
    assert!(stored.error_message.is_none());
    assert_eq!(h.balance(a.id).await, money("500.00"));

    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.completed, 1);
    assert_eq!(h.balance(a.id).await, money("380.00"));
}

#[tokio::test]
async fn test_failed_status_write_is_retried_next_pass() {
    let h = Harness::new();
    let a = h.open_account(Uuid::new_v4(), "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "0.00").await;
    let transfer = h.delegated_transfer(a.id, b.id, "120.00", "ext-a").await;
    h.gateway.set_status("ext-a", "failed");
    let transfers = FlakyTransfers::new(h.ledger.clone());
    transfers.fail_updates(1);
    let reconciler = reconciler_over(&h, h.ledger.clone(), transfers, ReconcilerConfig::default());

    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.errors, 1);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Pending);

    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.failed, 1);
    assert_eq!(status_of(&h, transfer.id).await, TransferStatus::Failed);
}

#[tokio::test]
async fn test_lost_completion_write_is_recovered_from_ledger_legs() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let a = h.open_account(user, "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "200.00").await;
    let transfers = FlakyTransfers::new(h.ledger.clone());
    transfers.fail_updates(1);
    let service = h.service_with(transfers);

    let err = service
        .transfer(command(a.id, b.id, "100.00", "lost-write", Actor::customer(user)))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::Store(_)));
    assert_eq!(h.balance(a.id).await, money("400.00"));
    assert_eq!(h.balance(b.id).await, money("300.00"));

    let retry = service
        .transfer(command(a.id, b.id, "100.00", "lost-write", Actor::customer(user)))
        .await
        .unwrap_err();
    assert!(matches!(retry, TransferError::TransferInProgress));

    // Within the grace period the row is left alone.
    let summary = reconciler(&h).reconcile_pending().await.unwrap();
    assert_eq!(summary.total(), 0);

    let summary = reconciler_with(&h, sweeping()).reconcile_pending().await.unwrap();
    assert_eq!(
        summary,
        ReconcileSummary {
            completed: 1,
            ..Default::default()
        }
    );

    let stored = h.transfer_by_key("lost-write").await.unwrap();
    let legs = h
        .ledger
        .list_by_reference(&stored.reference_number)
        .await
        .unwrap();
    assert_eq!(stored.status, TransferStatus::Completed);
    assert_eq!(stored.debit_transaction_id, Some(legs[0].id));
    assert_eq!(stored.credit_transaction_id, Some(legs[1].id));
    assert!(h.audit.actions().contains(&ACTION_TRANSFER_COMPLETED.to_string()));

    let replayed = service
        .transfer(command(a.id, b.id, "100.00", "lost-write", Actor::customer(user)))
        .await
        .unwrap();
    assert_eq!(replayed.id, stored.id);
    assert_eq!(h.balance(a.id).await, money("400.00"));
    assert_eq!(h.ledger.transaction_count(), 2);
}

#[tokio::test]
async fn test_lost_failure_write_is_recovered_as_failed() {
    let h = Harness::new();
    let user = Uuid::new_v4();
    let a = h.open_account(user, "500.00").await;
    let b = h.open_account(Uuid::new_v4(), "200.00").await;
    let key = format!("{}{}", LOCK_PREFIX, DistributedLock::account_pair_key(a.id, b.id));
    h.lock_store
        .set_if_absent(&key, "other-worker", Duration::from_secs(30))
        .await
        .unwrap();
    let transfers = FlakyTransfers::new(h.ledger.clone());
    transfers.fail_updates(1);

    let err = h
        .service_with(transfers)
        .transfer(command(a.id, b.id, "100.00", "lost-fail", Actor::customer(user)))
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::LockNotAcquired(_)));
    assert_eq!(
        h.transfer_by_key("lost-fail").await.unwrap().status,
        TransferStatus::Pending
    );

    let reconciler = reconciler_with(&h, sweeping());
    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.skipped, 1);

    h.lock_store.release(&key, "other-worker").await.unwrap();
    let summary = reconciler.reconcile_pending().await.unwrap();
    assert_eq!(summary.failed, 1);

    let stored = h.transfer_by_key("lost-fail").await.unwrap();
    assert_eq!(stored.status, TransferStatus::Failed);
    assert_eq!(h.balance(a.id).await, money("500.00"));

    let retry = h
        .service()
        .transfer(command(a.id, b.id, "100.00", "lost-fail", Actor::customer(user)))
        .await
        .unwrap_err();
    assert!(matches!(retry, TransferError::PreviousTransferFailed));
}
