//! In-process adapters with the same semantics as the Postgres and Redis ones.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, AuditEvent, Transaction, TransactionStatus, TransactionType, Transfer,
};
use crate::ports::{
    AccountRepository, AuditSink, LedgerLegs, LockError, LockStore, StoreError, StoreResult,
    TransactionRepository, TransferRepository,
};

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<Uuid, Account>,
    transactions: HashMap<Uuid, Transaction>,
    transfers: HashMap<Uuid, Transfer>,
    idempotency_keys: HashMap<String, Uuid>,
}

/// Accounts, transactions and transfers behind one mutex, so the atomic
/// primitive is trivially all-or-nothing.
#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<LedgerState>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transaction_count(&self) -> usize {
        self.state.lock().transactions.len()
    }
}

#[async_trait]
impl AccountRepository for InMemoryLedger {
    async fn insert(&self, account: &Account) -> StoreResult<Account> {
        let mut state = self.state.lock();
        if state.accounts.contains_key(&account.id) {
            return Err(StoreError::DuplicateKey(account.id.to_string()));
        }
        state.accounts.insert(account.id, account.clone());
        Ok(account.clone())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Account> {
        self.state
            .lock()
            .accounts
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))
    }

    async fn update_status(&self, id: Uuid, status: AccountStatus) -> StoreResult<Account> {
        let mut state = self.state.lock();
        let account = state
            .accounts
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?;
        account.status = status;
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    async fn execute_atomic_transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: &BigDecimal,
        from_description: &str,
        to_description: &str,
        reference: &str,
        status: TransactionStatus,
    ) -> StoreResult<LedgerLegs> {
        let mut state = self.state.lock();

        let source = state
            .accounts
            .get(&from)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", from)))?;
        let destination = state
            .accounts
            .get(&to)
            .ok_or_else(|| StoreError::NotFound(format!("account {}", to)))?;

        if !source.is_active() {
            return Err(StoreError::AccountNotActive(from));
        }
        if !destination.is_active() {
            return Err(StoreError::AccountNotActive(to));
        }
        if !source.has_sufficient_funds(amount) {
            return Err(StoreError::InsufficientFunds);
        }

        let debit = Transaction::leg(
            from,
            TransactionType::Debit,
            amount.clone(),
            source.balance.clone(),
            from_description.to_string(),
            reference.to_string(),
            status,
        );
        let credit = Transaction::leg(
            to,
            TransactionType::Credit,
            amount.clone(),
            destination.balance.clone(),
            to_description.to_string(),
            reference.to_string(),
            status,
        );

        let now = Utc::now();
        if let Some(account) = state.accounts.get_mut(&from) {
            account.balance = debit.balance_after.clone();
            account.updated_at = now;
        }
        if let Some(account) = state.accounts.get_mut(&to) {
            account.balance = credit.balance_after.clone();
            account.updated_at = now;
        }

        let legs = LedgerLegs {
            debit_tx_id: debit.id,
            credit_tx_id: credit.id,
        };
        state.transactions.insert(debit.id, debit);
        state.transactions.insert(credit.id, credit);
        Ok(legs)
    }
}

#[async_trait]
impl TransactionRepository for InMemoryLedger {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction> {
        self.state
            .lock()
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("transaction {}", id)))
    }

    async fn list_by_account(&self, account_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let mut rows: Vec<Transaction> = self
            .state
            .lock()
            .transactions
            .values()
            .filter(|t| t.account_id == account_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn list_by_reference(&self, reference: &str) -> StoreResult<Vec<Transaction>> {
        let mut rows: Vec<Transaction> = self
            .state
            .lock()
            .transactions
            .values()
            .filter(|t| t.reference == reference)
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.transaction_type != TransactionType::Debit);
        Ok(rows)
    }
}

#[async_trait]
impl TransferRepository for InMemoryLedger {
    async fn create(&self, transfer: &Transfer) -> StoreResult<()> {
        let mut state = self.state.lock();
        if state.idempotency_keys.contains_key(&transfer.idempotency_key) {
            return Err(StoreError::DuplicateKey(transfer.idempotency_key.clone()));
        }
        state
            .idempotency_keys
            .insert(transfer.idempotency_key.clone(), transfer.id);
        state.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transfer> {
        self.state
            .lock()
            .transfers
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("transfer {}", id)))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transfer>> {
        let state = self.state.lock();
        Ok(state
            .idempotency_keys
            .get(key)
            .and_then(|id| state.transfers.get(id))
            .cloned())
    }

    async fn update(&self, transfer: &Transfer) -> StoreResult<()> {
        let mut state = self.state.lock();
        let stored = state
            .transfers
            .get_mut(&transfer.id)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {}", transfer.id)))?;
        if stored.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "transfer {} is already {}",
                transfer.id, stored.status
            )));
        }
        *stored = transfer.clone();
        Ok(())
    }

    async fn set_external_id(&self, id: Uuid, external_transfer_id: &str) -> StoreResult<()> {
        let mut state = self.state.lock();
        let stored = state
            .transfers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("transfer {}", id)))?;
        if stored.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "transfer {} is already {}",
                id, stored.status
            )));
        }
        stored.external_transfer_id = Some(external_transfer_id.to_string());
        stored.updated_at = Utc::now();
        Ok(())
    }

    async fn find_pending_external(&self, limit: i64) -> StoreResult<Vec<Transfer>> {
        let mut rows: Vec<Transfer> = self
            .state
            .lock()
            .transfers
            .values()
            .filter(|t| !t.is_terminal() && t.external_transfer_id.is_some())
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn find_stale_internal(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transfer>> {
        let mut rows: Vec<Transfer> = self
            .state
            .lock()
            .transfers
            .values()
            .filter(|t| {
                !t.is_terminal()
                    && t.external_transfer_id.is_none()
                    && t.created_at < created_before
            })
            .cloned()
            .collect();
        rows.sort_by_key(|t| t.created_at);
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }
}

/// Single-process lock store honouring expiry on `tokio::time`.
#[derive(Default)]
pub struct InMemoryLockStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl InMemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: &str) -> bool {
        self.entries
            .lock()
            .get(key)
            .map(|(_, expires_at)| Instant::now() < *expires_at)
            .unwrap_or(false)
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn set_if_absent(&self, key: &str, token: &str, ttl: Duration) -> Result<bool, LockError> {
        let mut entries = self.entries.lock();
        let now = Instant::now();
        if let Some((_, expires_at)) = entries.get(key) {
            if now < *expires_at {
                return Ok(false);
            }
        }
        entries.insert(key.to_string(), (token.to_string(), now + ttl));
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<(), LockError> {
        let mut entries = self.entries.lock();
        if entries.get(key).map(|(t, _)| t == token).unwrap_or(false) {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Audit sink that keeps events in memory for inspection.
#[derive(Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    pub fn actions(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.action.clone()).collect()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn log_event(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}
