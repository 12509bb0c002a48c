use chrono::Utc;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::audit::{ACTION_TRANSFER_COMPLETED, ACTION_TRANSFER_FAILED};
use crate::domain::{AuditEvent, TransactionStatus, TransactionType, Transfer, TransferStatus};
use crate::error::TransferError;
use crate::gateway::SettlementGateway;
use crate::ports::{
    AccountRepository, AuditSink, LockError, StoreError, TransactionRepository, TransferRepository,
};
use crate::services::lock::{DistributedLock, LockGuard};
use crate::services::regulator::RegulatorNotifier;
use crate::services::transfer::load_account;

#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    pub interval: Duration,
    /// Maximum pending transfers examined per tick.
    pub batch_size: i64,
    /// Age after which an undelegated pending transfer is considered abandoned.
    pub stale_after: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            batch_size: 100,
            stale_after: Duration::from_secs(120),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Completed,
    Failed,
    /// Gateway has not settled the transfer yet.
    StillPending,
    /// Another worker holds the pair lock or already finished the transfer.
    Skipped,
    /// Infrastructure error; retried on the next tick.
    Errored,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl ReconcileSummary {
    fn record(&mut self, outcome: ReconcileOutcome) {
        match outcome {
            ReconcileOutcome::Completed => self.completed += 1,
            ReconcileOutcome::Failed => self.failed += 1,
            ReconcileOutcome::StillPending => self.pending += 1,
            ReconcileOutcome::Skipped => self.skipped += 1,
            ReconcileOutcome::Errored => self.errors += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.completed + self.failed + self.pending + self.skipped + self.errors
    }
}

/// Background loop finalizing transfers delegated to the settlement gateway
/// and recovering internal transfers left `pending` by an interrupted request.
pub struct TransferReconciler {
    accounts: Arc<dyn AccountRepository>,
    transfers: Arc<dyn TransferRepository>,
    transactions: Arc<dyn TransactionRepository>,
    gateway: Arc<dyn SettlementGateway>,
    audit: Arc<dyn AuditSink>,
    lock: DistributedLock,
    notifier: Option<Arc<RegulatorNotifier>>,
    config: ReconcilerConfig,
}

impl TransferReconciler {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        transfers: Arc<dyn TransferRepository>,
        transactions: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn SettlementGateway>,
        audit: Arc<dyn AuditSink>,
        lock: DistributedLock,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            accounts,
            transfers,
            transactions,
            gateway,
            audit,
            lock,
            notifier: None,
            config,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<RegulatorNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Runs until `shutdown` flips to `true` or its sender is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval.as_secs_f64(),
            batch_size = self.config.batch_size,
            "Transfer reconciler started"
        );

        let mut ticker = interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.reconcile_pending().await {
                        Ok(summary) if summary.total() > 0 => info!(?summary, "Reconciliation pass finished"),
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Reconciliation pass failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Transfer reconciler stopped");
    }

    /// One pass: every pending delegated transfer and every stale internal
    /// transfer gets its own task.
    pub async fn reconcile_pending(self: &Arc<Self>) -> Result<ReconcileSummary, TransferError> {
        let delegated = self
            .transfers
            .find_pending_external(self.config.batch_size)
            .await?;
        let stale_after = chrono::Duration::from_std(self.config.stale_after)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let stale = self
            .transfers
            .find_stale_internal(Utc::now() - stale_after, self.config.batch_size)
            .await?;
        if delegated.is_empty() && stale.is_empty() {
            return Ok(ReconcileSummary::default());
        }
        debug!(
            delegated = delegated.len(),
            stale = stale.len(),
            "Reconciling pending transfers"
        );

        let mut handles = Vec::with_capacity(delegated.len() + stale.len());
        for transfer in delegated {
            let reconciler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                reconciler.reconcile_transfer(transfer).await
            }));
        }
        for transfer in stale {
            let reconciler = Arc::clone(self);
            handles.push(tokio::spawn(async move {
                reconciler.recover_transfer(transfer).await
            }));
        }

        let mut summary = ReconcileSummary::default();
        for result in join_all(handles).await {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(error = %e, "Reconciliation worker panicked");
                    summary.record(ReconcileOutcome::Errored);
                }
            }
        }
        Ok(summary)
    }

    pub async fn reconcile_transfer(&self, transfer: Transfer) -> ReconcileOutcome {
        let gateway_id = transfer.gateway_transfer_id();
        let response = match self.gateway.get_transfer_status(&gateway_id).await {
            Ok(response) => response,
            Err(e) => {
                warn!(transfer_id = %transfer.id, error = %e, "Gateway status check failed");
                return ReconcileOutcome::Errored;
            }
        };

        match response.normalized_status() {
            Some(TransferStatus::Completed) => self.settle(transfer, None).await,
            Some(TransferStatus::Failed) => {
                self.settle(transfer, Some("Settlement gateway reported the transfer failed"))
                    .await
            }
            _ => ReconcileOutcome::StillPending,
        }
    }

    /// Finishes an internal transfer whose request died between the pending
    /// insert and the final status write. The ledger legs written under the
    /// transfer's reference number decide the outcome.
    pub async fn recover_transfer(&self, transfer: Transfer) -> ReconcileOutcome {
        let guard = match self.lock_pair(&transfer).await {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };

        let outcome = self.recover_locked(transfer.id).await;

        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release account-pair lock");
        }
        outcome
    }

    async fn recover_locked(&self, transfer_id: Uuid) -> ReconcileOutcome {
        let mut transfer = match self.transfers.get_by_id(transfer_id).await {
            Ok(transfer) => transfer,
            Err(e) => {
                warn!(transfer_id = %transfer_id, error = %e, "Failed to re-read transfer");
                return ReconcileOutcome::Errored;
            }
        };
        if transfer.is_terminal() || transfer.external_transfer_id.is_some() {
            return ReconcileOutcome::Skipped;
        }

        let legs = match self
            .transactions
            .list_by_reference(&transfer.reference_number)
            .await
        {
            Ok(legs) => legs,
            Err(e) => {
                warn!(transfer_id = %transfer.id, error = %e, "Failed to list ledger legs");
                return ReconcileOutcome::Errored;
            }
        };

        if legs.is_empty() {
            return self
                .fail_transfer(transfer, "Transfer abandoned before ledger execution")
                .await;
        }

        let debit = legs
            .iter()
            .find(|t| t.transaction_type == TransactionType::Debit)
            .map(|t| t.id);
        let credit = legs
            .iter()
            .find(|t| t.transaction_type == TransactionType::Credit)
            .map(|t| t.id);
        let (Some(debit_tx_id), Some(credit_tx_id)) = (debit, credit) else {
            error!(
                transfer_id = %transfer.id,
                reference = %transfer.reference_number,
                legs = legs.len(),
                "Ledger legs incomplete, leaving transfer pending"
            );
            return ReconcileOutcome::Errored;
        };

        if let Err(e) = transfer.complete(debit_tx_id, credit_tx_id) {
            error!(transfer_id = %transfer.id, error = %e, "Transfer already terminal");
            return ReconcileOutcome::Errored;
        }
        if let Err(e) = self.transfers.update(&transfer).await {
            error!(transfer_id = %transfer.id, error = %e, "Failed to persist recovered transfer");
            return ReconcileOutcome::Errored;
        }

        info!(transfer_id = %transfer.id, "Recovered transfer completed");
        self.audit
            .log_event(
                AuditEvent::for_transfer(
                    ACTION_TRANSFER_COMPLETED,
                    &transfer,
                    "Transfer completed by recovery",
                )
                .by_actor("reconciler"),
            )
            .await;
        self.launch_notifier(&transfer);
        ReconcileOutcome::Completed
    }

    /// Finalizes under the account-pair lock so it never races the orchestrator.
    async fn settle(&self, transfer: Transfer, gateway_failure: Option<&str>) -> ReconcileOutcome {
        let guard = match self.lock_pair(&transfer).await {
            Ok(guard) => guard,
            Err(outcome) => return outcome,
        };

        let outcome = self.settle_locked(transfer.id, gateway_failure).await;

        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release account-pair lock");
        }
        outcome
    }

    async fn lock_pair(&self, transfer: &Transfer) -> Result<LockGuard, ReconcileOutcome> {
        let key = DistributedLock::account_pair_key(transfer.from_account_id, transfer.to_account_id);
        match self.lock.acquire(&key).await {
            Ok(guard) => Ok(guard),
            Err(LockError::NotAcquired(_)) => {
                debug!(transfer_id = %transfer.id, "Account pair busy, retrying next tick");
                Err(ReconcileOutcome::Skipped)
            }
            Err(e) => {
                warn!(transfer_id = %transfer.id, error = %e, "Lock store unavailable");
                Err(ReconcileOutcome::Errored)
            }
        }
    }

    async fn settle_locked(
        &self,
        transfer_id: Uuid,
        gateway_failure: Option<&str>,
    ) -> ReconcileOutcome {
        let mut transfer = match self.transfers.get_by_id(transfer_id).await {
            Ok(transfer) => transfer,
            Err(e) => {
                warn!(transfer_id = %transfer_id, error = %e, "Failed to re-read transfer");
                return ReconcileOutcome::Errored;
            }
        };
        if transfer.is_terminal() {
            return ReconcileOutcome::Skipped;
        }

        if let Some(reason) = gateway_failure {
            return self.fail_transfer(transfer, reason).await;
        }

        match self.revalidate(&transfer).await {
            Ok(()) => {}
            Err(e) if is_business_rejection(&e) => {
                return self.fail_transfer(transfer, &e.to_string()).await;
            }
            Err(e) => {
                warn!(transfer_id = %transfer.id, error = %e, "Revalidation failed, will retry");
                return ReconcileOutcome::Errored;
            }
        }

        let legs = match self
            .accounts
            .execute_atomic_transfer(
                transfer.from_account_id,
                transfer.to_account_id,
                &transfer.amount,
                &format!("Settled transfer {}", transfer.reference_number),
                &format!("Settled transfer {}", transfer.reference_number),
                &transfer.reference_number,
                TransactionStatus::Completed,
            )
            .await
        {
            Ok(legs) => legs,
            Err(e @ (StoreError::InsufficientFunds | StoreError::AccountNotActive(_))) => {
                let reason = TransferError::from(e).to_string();
                return self.fail_transfer(transfer, &reason).await;
            }
            Err(e) => {
                warn!(transfer_id = %transfer.id, error = %e, "Ledger execution failed, will retry");
                return ReconcileOutcome::Errored;
            }
        };

        if let Err(e) = transfer.complete(legs.debit_tx_id, legs.credit_tx_id) {
            error!(transfer_id = %transfer.id, error = %e, "Transfer already terminal");
            return ReconcileOutcome::Errored;
        }
        if let Err(e) = self.transfers.update(&transfer).await {
            error!(
                transfer_id = %transfer.id,
                reference = %transfer.reference_number,
                error = %e,
                "Failed to persist reconciled transfer"
            );
            return ReconcileOutcome::Errored;
        }

        info!(transfer_id = %transfer.id, "Reconciled transfer completed");
        self.audit
            .log_event(
                AuditEvent::for_transfer(
                    ACTION_TRANSFER_COMPLETED,
                    &transfer,
                    "Transfer completed by reconciliation",
                )
                .by_actor("reconciler"),
            )
            .await;
        self.launch_notifier(&transfer);
        ReconcileOutcome::Completed
    }

    /// Both accounts exist and are active, and the source is funded.
    async fn revalidate(&self, transfer: &Transfer) -> Result<(), TransferError> {
        let from = load_account(self.accounts.as_ref(), transfer.from_account_id).await?;
        let to = load_account(self.accounts.as_ref(), transfer.to_account_id).await?;

        if !from.is_active() {
            return Err(TransferError::AccountNotActive(from.id));
        }
        if !to.is_active() {
            return Err(TransferError::AccountNotActive(to.id));
        }
        if !from.has_sufficient_funds(&transfer.amount) {
            return Err(TransferError::InsufficientFunds);
        }
        Ok(())
    }

    /// Persists and audits a failure. A persist error leaves the row pending
    /// for the next pass.
    async fn fail_transfer(&self, mut transfer: Transfer, reason: &str) -> ReconcileOutcome {
        if let Err(e) = transfer.fail(reason) {
            warn!(transfer_id = %transfer.id, error = %e, "Transfer already terminal");
            return ReconcileOutcome::Skipped;
        }
        if let Err(e) = self.transfers.update(&transfer).await {
            error!(transfer_id = %transfer.id, error = %e, "Failed to persist failed transfer");
            return ReconcileOutcome::Errored;
        }

        warn!(transfer_id = %transfer.id, reason, "Reconciled transfer failed");
        self.audit
            .log_event(
                AuditEvent::for_transfer(
                    ACTION_TRANSFER_FAILED,
                    &transfer,
                    format!("Transfer failed: {}", reason),
                )
                .by_actor("reconciler"),
            )
            .await;
        self.launch_notifier(&transfer);
        ReconcileOutcome::Failed
    }

    fn launch_notifier(&self, transfer: &Transfer) {
        if let Some(notifier) = &self.notifier {
            notifier.start_monitoring(transfer.clone());
        }
    }
}

/// Rejections that no retry can fix. Anything else is infrastructure.
fn is_business_rejection(err: &TransferError) -> bool {
    matches!(
        err,
        TransferError::AccountNotFound(_)
            | TransferError::AccountNotActive(_)
            | TransferError::InsufficientFunds
    )
}
