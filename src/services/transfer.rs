//! Transfer orchestrator.
//!
//! Drives a transfer from request to a terminal status:
//!
//! 1. preconditions (amount, distinct accounts) and per-user admission
//! 2. idempotency lookup: completed replays, pending/failed are rejected
//! 3. account load, ownership and activity checks
//! 4. pending insert, the authoritative deduplication point
//! 5. account-pair lock, atomic ledger execution, terminal persist, audit
//!
//! Delegated transfers stop after step 4 and hand off to the settlement
//! gateway; the reconciler finishes them, along with any internal transfer
//! whose final status write was lost.

use bigdecimal::{BigDecimal, Zero};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::domain::audit::{
    ACTION_TRANSFER_COMPLETED, ACTION_TRANSFER_CREATED, ACTION_TRANSFER_FAILED,
    ACTION_TRANSFER_INITIATED,
};
use crate::domain::{
    Account, Actor, AuditEvent, TransactionStatus, Transfer, TransferDirection, TransferStatus,
    TransferType,
};
use crate::error::TransferError;
use crate::gateway::{SettlementGateway, TransferAccount, TransferRequest};
use crate::ports::{AccountRepository, AuditSink, StoreError, TransferRepository};
use crate::services::concurrency_limiter::ConcurrencyLimiter;
use crate::services::lock::DistributedLock;
use crate::services::regulator::RegulatorNotifier;

#[derive(Debug, Clone)]
pub struct TransferCommand {
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
    pub transfer_type: TransferType,
    pub direction: TransferDirection,
    pub actor: Actor,
}

/// Counterparty details the settlement gateway needs for a delegated transfer.
#[derive(Debug, Clone)]
pub struct ExternalParties {
    pub source: TransferAccount,
    pub destination: TransferAccount,
}

enum Inserted {
    Created(Transfer),
    Existing(Transfer),
}

pub struct TransferService {
    accounts: Arc<dyn AccountRepository>,
    transfers: Arc<dyn TransferRepository>,
    audit: Arc<dyn AuditSink>,
    gateway: Arc<dyn SettlementGateway>,
    lock: DistributedLock,
    limiter: Arc<ConcurrencyLimiter>,
    notifier: Option<Arc<RegulatorNotifier>>,
}

impl TransferService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        transfers: Arc<dyn TransferRepository>,
        audit: Arc<dyn AuditSink>,
        gateway: Arc<dyn SettlementGateway>,
        lock: DistributedLock,
        limiter: Arc<ConcurrencyLimiter>,
    ) -> Self {
        Self {
            accounts,
            transfers,
            audit,
            gateway,
            lock,
            limiter,
            notifier: None,
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<RegulatorNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Moves funds between two ledger accounts exactly once per idempotency key.
    #[instrument(skip(self, cmd), fields(idempotency_key = %cmd.idempotency_key))]
    pub async fn transfer(&self, cmd: TransferCommand) -> Result<Transfer, TransferError> {
        validate(&cmd)?;
        let _permit = self
            .limiter
            .try_acquire(cmd.actor.user_id)
            .ok_or(TransferError::TooManyConcurrentTransfers(cmd.actor.user_id))?;

        if let Some(existing) = self
            .transfers
            .find_by_idempotency_key(&cmd.idempotency_key)
            .await?
        {
            return replay(existing);
        }

        let (from, to) = self.load_accounts(&cmd).await?;

        let transfer = match self.insert_pending(&cmd).await? {
            Inserted::Created(transfer) => transfer,
            Inserted::Existing(existing) => return replay(existing),
        };

        let lock_key = DistributedLock::account_pair_key(from.id, to.id);
        let guard = match self.lock.acquire(&lock_key).await {
            Ok(guard) => guard,
            Err(e) => {
                let err = TransferError::from(e);
                warn!(transfer_id = %transfer.id, error = %err, "Could not lock account pair");
                self.fail_transfer(transfer, &err.to_string()).await;
                return Err(err);
            }
        };

        let result = self.execute(transfer, &from, &to).await;

        if let Err(e) = guard.release().await {
            warn!(error = %e, "Failed to release account-pair lock");
        }
        result
    }

    /// Records a pending transfer and hands it to the settlement gateway.
    /// The returned transfer stays `pending` until the reconciler sees the
    /// gateway settle it.
    #[instrument(skip(self, cmd, parties), fields(idempotency_key = %cmd.idempotency_key))]
    pub async fn initiate_external(
        &self,
        cmd: TransferCommand,
        parties: ExternalParties,
    ) -> Result<Transfer, TransferError> {
        validate(&cmd)?;
        let _permit = self
            .limiter
            .try_acquire(cmd.actor.user_id)
            .ok_or(TransferError::TooManyConcurrentTransfers(cmd.actor.user_id))?;

        if let Some(existing) = self
            .transfers
            .find_by_idempotency_key(&cmd.idempotency_key)
            .await?
        {
            return replay(existing);
        }

        self.load_accounts(&cmd).await?;

        let mut transfer = match self.insert_pending(&cmd).await? {
            Inserted::Created(transfer) => transfer,
            Inserted::Existing(existing) => return replay(existing),
        };

        let request = TransferRequest {
            amount: transfer.amount.clone(),
            currency: transfer.currency.clone(),
            direction: transfer.direction.as_str().to_string(),
            transfer_type: transfer.transfer_type.as_str().to_string(),
            description: transfer.description.clone(),
            reference_number: transfer.reference_number.clone(),
            scheduled_date: Utc::now(),
            source_account: parties.source,
            destination_account: parties.destination,
        };

        match self.gateway.validate_transfer(&request).await {
            Ok(response) if !response.validation.valid => {
                let err = TransferError::GatewayRejected(response.validation.summary());
                self.fail_transfer(transfer, &err.to_string()).await;
                return Err(err);
            }
            Ok(_) => {}
            Err(e) => {
                let err = TransferError::from(e);
                self.fail_transfer(transfer, &err.to_string()).await;
                return Err(err);
            }
        }

        let initiated = match self.gateway.initiate_transfer(&request).await {
            Ok(initiated) => initiated,
            Err(e) => {
                let err = TransferError::from(e);
                self.fail_transfer(transfer, &err.to_string()).await;
                return Err(err);
            }
        };

        if let Err(e) = self
            .transfers
            .set_external_id(transfer.id, &initiated.transfer_id)
            .await
        {
            error!(transfer_id = %transfer.id, error = %e, "Failed to record gateway transfer id");
            let err = TransferError::from(e);
            self.fail_transfer(transfer, &err.to_string()).await;
            return Err(err);
        }
        transfer.external_transfer_id = Some(initiated.transfer_id.clone());

        info!(
            transfer_id = %transfer.id,
            gateway_transfer_id = %initiated.transfer_id,
            "Transfer delegated to settlement gateway"
        );
        self.audit
            .log_event(
                AuditEvent::for_transfer(
                    ACTION_TRANSFER_INITIATED,
                    &transfer,
                    format!("Transfer initiated at gateway as {}", initiated.transfer_id),
                )
                .by_user(cmd.actor.user_id),
            )
            .await;

        Ok(transfer)
    }

    pub async fn find_by_idempotency_key(&self, key: &str) -> Result<Transfer, TransferError> {
        self.transfers
            .find_by_idempotency_key(key)
            .await?
            .ok_or_else(|| TransferError::TransferNotFound(key.to_string()))
    }

    async fn load_accounts(&self, cmd: &TransferCommand) -> Result<(Account, Account), TransferError> {
        let from = load_account(self.accounts.as_ref(), cmd.from_account_id).await?;
        let to = load_account(self.accounts.as_ref(), cmd.to_account_id).await?;

        if !cmd.actor.can_operate(&from) {
            return Err(TransferError::Unauthorized);
        }
        if !from.is_active() {
            return Err(TransferError::AccountNotActive(from.id));
        }
        if !to.is_active() {
            return Err(TransferError::AccountNotActive(to.id));
        }
        Ok((from, to))
    }

    async fn insert_pending(&self, cmd: &TransferCommand) -> Result<Inserted, TransferError> {
        let transfer = Transfer::new_pending(
            cmd.from_account_id,
            cmd.to_account_id,
            cmd.amount.clone(),
            cmd.currency.clone(),
            cmd.description.clone(),
            cmd.idempotency_key.clone(),
            cmd.transfer_type,
            cmd.direction,
        );

        match self.transfers.create(&transfer).await {
            Ok(()) => {}
            Err(StoreError::DuplicateKey(_)) => {
                // Lost the race to a concurrent request with the same key.
                return match self
                    .transfers
                    .find_by_idempotency_key(&cmd.idempotency_key)
                    .await?
                {
                    Some(existing) => Ok(Inserted::Existing(existing)),
                    None => Err(TransferError::Store(format!(
                        "transfer for key {} not found after duplicate insert",
                        cmd.idempotency_key
                    ))),
                };
            }
            Err(e) => return Err(e.into()),
        }

        info!(transfer_id = %transfer.id, amount = %transfer.amount, "Transfer created");
        self.audit
            .log_event(
                AuditEvent::for_transfer(ACTION_TRANSFER_CREATED, &transfer, "Transfer created")
                    .by_user(cmd.actor.user_id),
            )
            .await;
        Ok(Inserted::Created(transfer))
    }

    async fn execute(
        &self,
        mut transfer: Transfer,
        from: &Account,
        to: &Account,
    ) -> Result<Transfer, TransferError> {
        let from_description = leg_description("Transfer to", &to.account_number, &transfer.description);
        let to_description = leg_description("Transfer from", &from.account_number, &transfer.description);

        let legs = match self
            .accounts
            .execute_atomic_transfer(
                transfer.from_account_id,
                transfer.to_account_id,
                &transfer.amount,
                &from_description,
                &to_description,
                &transfer.reference_number,
                TransactionStatus::Completed,
            )
            .await
        {
            Ok(legs) => legs,
            Err(e) => {
                let err = TransferError::from(e);
                warn!(transfer_id = %transfer.id, error = %err, "Ledger execution failed");
                self.fail_transfer(transfer, &err.to_string()).await;
                return Err(err);
            }
        };

        transfer.complete(legs.debit_tx_id, legs.credit_tx_id)?;
        if let Err(e) = self.transfers.update(&transfer).await {
            // Funds moved; the stale sweep completes the row from its legs.
            error!(
                transfer_id = %transfer.id,
                reference = %transfer.reference_number,
                error = %e,
                "Failed to persist completed transfer"
            );
            return Err(e.into());
        }

        info!(transfer_id = %transfer.id, "Transfer completed");
        self.audit
            .log_event(AuditEvent::for_transfer(
                ACTION_TRANSFER_COMPLETED,
                &transfer,
                "Transfer completed",
            ))
            .await;
        self.launch_notifier(&transfer);
        Ok(transfer)
    }

    /// Moves a pending transfer to `failed`, persisting and auditing it.
    /// Persist errors are logged, never raised; the reconciler's stale sweep
    /// finishes a row left `pending`.
    async fn fail_transfer(&self, mut transfer: Transfer, reason: &str) -> Transfer {
        if let Err(e) = transfer.fail(reason) {
            warn!(transfer_id = %transfer.id, error = %e, "Transfer already terminal");
            return transfer;
        }
        if let Err(e) = self.transfers.update(&transfer).await {
            error!(transfer_id = %transfer.id, error = %e, "Failed to persist failed transfer");
            return transfer;
        }

        self.audit
            .log_event(AuditEvent::for_transfer(
                ACTION_TRANSFER_FAILED,
                &transfer,
                format!("Transfer failed: {}", reason),
            ))
            .await;
        self.launch_notifier(&transfer);
        transfer
    }

    fn launch_notifier(&self, transfer: &Transfer) {
        if let Some(notifier) = &self.notifier {
            notifier.start_monitoring(transfer.clone());
        }
    }
}

fn validate(cmd: &TransferCommand) -> Result<(), TransferError> {
    if cmd.amount <= BigDecimal::zero() {
        return Err(TransferError::InvalidAmount);
    }
    if cmd.from_account_id == cmd.to_account_id {
        return Err(TransferError::SameAccountTransfer);
    }
    Ok(())
}

fn replay(existing: Transfer) -> Result<Transfer, TransferError> {
    match existing.status {
        TransferStatus::Completed => Ok(existing),
        TransferStatus::Pending => Err(TransferError::TransferInProgress),
        TransferStatus::Failed => Err(TransferError::PreviousTransferFailed),
    }
}

pub(crate) async fn load_account(
    accounts: &dyn AccountRepository,
    id: Uuid,
) -> Result<Account, TransferError> {
    match accounts.get_by_id(id).await {
        Ok(account) => Ok(account),
        Err(StoreError::NotFound(_)) => Err(TransferError::AccountNotFound(id)),
        Err(e) => Err(e.into()),
    }
}

fn leg_description(prefix: &str, counterparty: &str, description: &str) -> String {
    if description.is_empty() {
        format!("{} {}", prefix, counterparty)
    } else {
        format!("{} {}: {}", prefix, counterparty, description)
    }
}
