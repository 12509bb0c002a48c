use thiserror::Error;
use uuid::Uuid;

use crate::gateway::GatewayError;
use crate::ports::{LockError, StoreError};

/// Errors surfaced by the transfer orchestrator and the account service.
#[derive(Error, Debug)]
pub enum TransferError {
    // === Validation ===
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Source and destination account cannot be the same")]
    SameAccountTransfer,

    // === Not found ===
    #[error("Account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("Transfer not found: {0}")]
    TransferNotFound(String),

    // === Authorization ===
    #[error("Caller is not allowed to operate on this account")]
    Unauthorized,

    // === State conflicts ===
    #[error("Account is not active: {0}")]
    AccountNotActive(Uuid),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("A transfer with this idempotency key is still in progress")]
    TransferInProgress,

    #[error("A previous transfer with this idempotency key failed; use a new key")]
    PreviousTransferFailed,

    #[error("Too many concurrent transfers for user {0}")]
    TooManyConcurrentTransfers(Uuid),

    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    #[error("Account balance must be zero to close the account")]
    NonZeroBalance,

    #[error("Transfer rejected by settlement gateway: {0}")]
    GatewayRejected(String),

    // === Infrastructure ===
    #[error("Could not acquire lock: {0}")]
    LockNotAcquired(String),

    #[error("Lock store error: {0}")]
    Lock(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

impl TransferError {
    /// Stable error code for callers and logs.
    pub fn code(&self) -> &'static str {
        match self {
            TransferError::InvalidAmount => "INVALID_AMOUNT",
            TransferError::SameAccountTransfer => "SAME_ACCOUNT_TRANSFER",
            TransferError::AccountNotFound(_) => "ACCOUNT_NOT_FOUND",
            TransferError::TransferNotFound(_) => "TRANSFER_NOT_FOUND",
            TransferError::Unauthorized => "UNAUTHORIZED",
            TransferError::AccountNotActive(_) => "ACCOUNT_NOT_ACTIVE",
            TransferError::InsufficientFunds => "INSUFFICIENT_FUNDS",
            TransferError::TransferInProgress => "TRANSFER_IN_PROGRESS",
            TransferError::PreviousTransferFailed => "PREVIOUS_TRANSFER_FAILED",
            TransferError::TooManyConcurrentTransfers(_) => "TOO_MANY_CONCURRENT_TRANSFERS",
            TransferError::InvalidStateTransition(_) => "INVALID_STATE_TRANSITION",
            TransferError::NonZeroBalance => "NON_ZERO_BALANCE",
            TransferError::GatewayRejected(_) => "GATEWAY_REJECTED",
            TransferError::LockNotAcquired(_) => "LOCK_NOT_ACQUIRED",
            TransferError::Lock(_) => "LOCK_ERROR",
            TransferError::Store(_) => "STORE_ERROR",
            TransferError::Gateway(_) => "GATEWAY_ERROR",
        }
    }

    /// Infrastructure failures the caller may retry. Business-rule violations never are.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransferError::LockNotAcquired(_)
                | TransferError::Lock(_)
                | TransferError::Store(_)
                | TransferError::Gateway(_)
                | TransferError::TooManyConcurrentTransfers(_)
        )
    }
}

impl From<StoreError> for TransferError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InsufficientFunds => TransferError::InsufficientFunds,
            StoreError::AccountNotActive(id) => TransferError::AccountNotActive(id),
            other => TransferError::Store(other.to_string()),
        }
    }
}

impl From<LockError> for TransferError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::NotAcquired(key) => TransferError::LockNotAcquired(key),
            LockError::Store(msg) => TransferError::Lock(msg),
        }
    }
}
