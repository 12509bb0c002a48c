//! Collaborator contracts consumed by the ledger core.
//!
//! Adapters in `crate::adapters` implement these against Postgres, Redis and
//! in-process memory. Services only ever hold `Arc<dyn ...>` handles.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Account, AccountStatus, AuditEvent, Transaction, TransactionStatus, Transfer};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Account is not active: {0}")]
    AccountNotActive(Uuid),

    /// A conditional update found the row in an unexpected state.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                StoreError::DuplicateKey(db.message().to_string())
            }
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Debit/credit transaction ids produced by one atomic transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerLegs {
    pub debit_tx_id: Uuid,
    pub credit_tx_id: Uuid,
}

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn insert(&self, account: &Account) -> StoreResult<Account>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Account>;

    async fn update_status(&self, id: Uuid, status: AccountStatus) -> StoreResult<Account>;

    /// Moves `amount` from `from` to `to` and writes both legs, all or nothing.
    ///
    /// The source balance is re-read inside the unit of work; a balance below
    /// `amount` yields `StoreError::InsufficientFunds` and changes nothing.
    #[allow(clippy::too_many_arguments)]
    async fn execute_atomic_transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: &BigDecimal,
        from_description: &str,
        to_description: &str,
        reference: &str,
        status: TransactionStatus,
    ) -> StoreResult<LedgerLegs>;
}

#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction>;

    async fn list_by_account(&self, account_id: Uuid) -> StoreResult<Vec<Transaction>>;

    async fn list_by_reference(&self, reference: &str) -> StoreResult<Vec<Transaction>>;
}

#[async_trait]
pub trait TransferRepository: Send + Sync {
    /// Fails with `StoreError::DuplicateKey` when the idempotency key exists.
    async fn create(&self, transfer: &Transfer) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transfer>;

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transfer>>;

    /// Persists a transition out of `pending`. Fails with `StoreError::Conflict`
    /// when the stored row is already terminal.
    async fn update(&self, transfer: &Transfer) -> StoreResult<()>;

    /// Records the gateway id of a still-pending delegated transfer.
    async fn set_external_id(&self, id: Uuid, external_transfer_id: &str) -> StoreResult<()>;

    /// Pending transfers delegated to the settlement gateway, oldest first.
    async fn find_pending_external(&self, limit: i64) -> StoreResult<Vec<Transfer>>;

    /// Pending transfers never delegated to the gateway and created before
    /// `created_before`, oldest first.
    async fn find_stale_internal(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transfer>>;
}

/// Fire-and-forget audit trail. Implementations log their own failures.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn log_event(&self, event: AuditEvent);
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("could not acquire lock: {0}")]
    NotAcquired(String),

    #[error("lock store error: {0}")]
    Store(String),
}

impl From<redis::RedisError> for LockError {
    fn from(e: redis::RedisError) -> Self {
        LockError::Store(e.to_string())
    }
}

/// Shared key-value store offering atomic set-if-absent with expiry.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Returns `true` when the key was absent and is now held with `token`.
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError>;

    /// Deletes the key only while it still holds `token`.
    async fn release(&self, key: &str, token: &str) -> Result<(), LockError>;
}
