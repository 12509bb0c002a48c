#![allow(dead_code)]

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use ledger_core::adapters::{InMemoryLedger, InMemoryLockStore, MemoryAuditSink};
use ledger_core::domain::{
    Account, AccountStatus, AccountType, Actor, TransactionStatus, Transfer, TransferDirection,
    TransferType,
};
use ledger_core::gateway::types::{GatewayAccount, Validation, ValidationIssue};
use ledger_core::gateway::{
    AccountValidationRequest, AccountValidationResult, GatewayError, RegulatorNotification,
    SettlementGateway, TransferAccount, TransferRequest, TransferStatusResponse,
    ValidationResponse,
};
use ledger_core::ports::{
    AccountRepository, LedgerLegs, StoreError, StoreResult, TransferRepository,
};
use ledger_core::services::{
    ConcurrencyLimiter, DistributedLock, ExternalParties, TransferCommand, TransferService,
};

/// Scripted settlement gateway.
pub struct FakeGateway {
    /// Status reported for ids without an explicit entry.
    pub default_status: Mutex<String>,
    pub statuses: Mutex<HashMap<String, String>>,
    pub status_unavailable: AtomicBool,
    pub status_calls: AtomicU32,
    pub reject_validation: AtomicBool,
    pub initiate_unavailable: AtomicBool,
    pub initiated: AtomicU32,
    pub notify_failures: AtomicU32,
    pub notify_calls: AtomicU32,
    pub notifications: Mutex<Vec<RegulatorNotification>>,
}

impl FakeGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            default_status: Mutex::new("completed".to_string()),
            statuses: Mutex::new(HashMap::new()),
            status_unavailable: AtomicBool::new(false),
            status_calls: AtomicU32::new(0),
            reject_validation: AtomicBool::new(false),
            initiate_unavailable: AtomicBool::new(false),
            initiated: AtomicU32::new(0),
            notify_failures: AtomicU32::new(0),
            notify_calls: AtomicU32::new(0),
            notifications: Mutex::new(Vec::new()),
        })
    }

    pub fn set_default_status(&self, status: &str) {
        *self.default_status.lock() = status.to_string();
    }

    pub fn set_status(&self, gateway_id: &str, status: &str) {
        self.statuses
            .lock()
            .insert(gateway_id.to_string(), status.to_string());
    }

    /// Makes the next `n` webhook deliveries fail with a 503.
    pub fn fail_notifications(&self, n: u32) {
        self.notify_failures.store(n, Ordering::SeqCst);
    }

    pub fn notifications(&self) -> Vec<RegulatorNotification> {
        self.notifications.lock().clone()
    }

    fn unavailable() -> GatewayError {
        GatewayError::Unexpected {
            status: 503,
            body: "Service Unavailable".to_string(),
        }
    }

    fn status_response(transfer_id: &str, status: &str) -> TransferStatusResponse {
        serde_json::from_value(serde_json::json!({
            "transfer_id": transfer_id,
            "status": status,
        }))
        .expect("valid status response")
    }
}

#[async_trait]
impl SettlementGateway for FakeGateway {
    async fn validate_account(
        &self,
        request: &AccountValidationRequest,
    ) -> Result<AccountValidationResult, GatewayError> {
        let response = ValidationResponse {
            validation: Validation {
                valid: true,
                ..Default::default()
            },
            data: Some(GatewayAccount {
                id: request.account_number.clone(),
                account_holder: request.account_holder_name.clone(),
                status: "active".to_string(),
                account_type: "checking".to_string(),
                available_balance: None,
            }),
        };
        Ok(AccountValidationResult {
            account_exists: true,
            account_valid: true,
            available_balance: None,
            response,
        })
    }

    async fn validate_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ValidationResponse<TransferStatusResponse>, GatewayError> {
        if self.reject_validation.load(Ordering::SeqCst) {
            return Ok(ValidationResponse {
                validation: Validation {
                    valid: false,
                    issues: vec![ValidationIssue {
                        field: "destination_account.routing_number".to_string(),
                        code: "INVALID_ROUTING".to_string(),
                        message: "unknown institution".to_string(),
                        severity: "error".to_string(),
                    }],
                    ..Default::default()
                },
                data: None,
            });
        }
        Ok(ValidationResponse {
            validation: Validation {
                valid: true,
                ..Default::default()
            },
            data: Some(Self::status_response(&request.reference_number, "pending")),
        })
    }

    async fn initiate_transfer(
        &self,
        _request: &TransferRequest,
    ) -> Result<TransferStatusResponse, GatewayError> {
        if self.initiate_unavailable.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let n = self.initiated.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Self::status_response(&format!("ext-{}", n), "pending"))
    }

    async fn get_transfer_status(
        &self,
        transfer_id: &str,
    ) -> Result<TransferStatusResponse, GatewayError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.status_unavailable.load(Ordering::SeqCst) {
            return Err(Self::unavailable());
        }
        let status = self
            .statuses
            .lock()
            .get(transfer_id)
            .cloned()
            .unwrap_or_else(|| self.default_status.lock().clone());
        Ok(Self::status_response(transfer_id, &status))
    }

    async fn notify(&self, payload: &RegulatorNotification) -> Result<(), GatewayError> {
        self.notify_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.notify_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.notify_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Self::unavailable());
        }
        self.notifications.lock().push(payload.clone());
        Ok(())
    }
}

pub const LOCK_PREFIX: &str = "lock:";

pub struct Harness {
    pub ledger: Arc<InMemoryLedger>,
    pub audit: Arc<MemoryAuditSink>,
    pub lock_store: Arc<InMemoryLockStore>,
    pub lock: DistributedLock,
    pub limiter: Arc<ConcurrencyLimiter>,
    pub gateway: Arc<FakeGateway>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_limit(100)
    }

    pub fn with_limit(limit: usize) -> Self {
        let lock_store = Arc::new(InMemoryLockStore::new());
        Self {
            ledger: Arc::new(InMemoryLedger::new()),
            audit: Arc::new(MemoryAuditSink::new()),
            lock: DistributedLock::new(lock_store.clone(), LOCK_PREFIX, Duration::from_secs(30)),
            lock_store,
            limiter: ConcurrencyLimiter::new(limit),
            gateway: FakeGateway::new(),
        }
    }

    pub fn service(&self) -> TransferService {
        self.service_with(self.ledger.clone())
    }

    pub fn service_with(&self, transfers: Arc<dyn TransferRepository>) -> TransferService {
        TransferService::new(
            self.ledger.clone(),
            transfers,
            self.audit.clone(),
            self.gateway.clone(),
            self.lock.clone(),
            self.limiter.clone(),
        )
    }

    pub async fn open_account(&self, user_id: Uuid, balance: &str) -> Account {
        let account = Account::new(
            user_id,
            format!("{:010}", rand_suffix()),
            "021000021".to_string(),
            AccountType::Checking,
            money(balance),
        );
        AccountRepository::insert(self.ledger.as_ref(), &account)
            .await
            .expect("insert account")
    }

    pub async fn balance(&self, id: Uuid) -> BigDecimal {
        AccountRepository::get_by_id(self.ledger.as_ref(), id)
            .await
            .expect("account exists")
            .balance
    }

    pub async fn transfer_by_key(&self, key: &str) -> Option<Transfer> {
        self.ledger
            .find_by_idempotency_key(key)
            .await
            .expect("lookup")
    }

    /// Inserts a pending transfer already delegated to the gateway as `external_id`.
    pub async fn delegated_transfer(
        &self,
        from: Uuid,
        to: Uuid,
        amount: &str,
        external_id: &str,
    ) -> Transfer {
        let mut transfer = Transfer::new_pending(
            from,
            to,
            money(amount),
            "USD".to_string(),
            "settlement".to_string(),
            Uuid::new_v4().to_string(),
            TransferType::Ach,
            TransferDirection::Outbound,
        );
        transfer.external_transfer_id = Some(external_id.to_string());
        self.ledger.create(&transfer).await.expect("create transfer");
        transfer
    }
}

/// Takes one armed failure, if any.
fn trip(remaining: &AtomicU32) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

/// Transfer store whose next `update` calls fail with a database error.
pub struct FlakyTransfers {
    pub inner: Arc<InMemoryLedger>,
    pub failing_updates: AtomicU32,
}

impl FlakyTransfers {
    pub fn new(inner: Arc<InMemoryLedger>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_updates: AtomicU32::new(0),
        })
    }

    pub fn fail_updates(&self, n: u32) {
        self.failing_updates.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl TransferRepository for FlakyTransfers {
    async fn create(&self, transfer: &Transfer) -> StoreResult<()> {
        self.inner.create(transfer).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transfer> {
        TransferRepository::get_by_id(self.inner.as_ref(), id).await
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transfer>> {
        self.inner.find_by_idempotency_key(key).await
    }

    async fn update(&self, transfer: &Transfer) -> StoreResult<()> {
        if trip(&self.failing_updates) {
            return Err(StoreError::Database("connection reset".to_string()));
        }
        self.inner.update(transfer).await
    }

    async fn set_external_id(&self, id: Uuid, external_transfer_id: &str) -> StoreResult<()> {
        self.inner.set_external_id(id, external_transfer_id).await
    }

    async fn find_pending_external(&self, limit: i64) -> StoreResult<Vec<Transfer>> {
        self.inner.find_pending_external(limit).await
    }

    async fn find_stale_internal(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transfer>> {
        self.inner.find_stale_internal(created_before, limit).await
    }
}

/// Account store whose next `get_by_id` calls fail with a database error.
pub struct FlakyAccounts {
    pub inner: Arc<InMemoryLedger>,
    pub failing_reads: AtomicU32,
}

impl FlakyAccounts {
    pub fn new(inner: Arc<InMemoryLedger>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_reads: AtomicU32::new(0),
        })
    }

    pub fn fail_reads(&self, n: u32) {
        self.failing_reads.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl AccountRepository for FlakyAccounts {
    async fn insert(&self, account: &Account) -> StoreResult<Account> {
        self.inner.insert(account).await
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Account> {
        if trip(&self.failing_reads) {
            return Err(StoreError::Database("pool timed out".to_string()));
        }
        AccountRepository::get_by_id(self.inner.as_ref(), id).await
    }

    async fn update_status(&self, id: Uuid, status: AccountStatus) -> StoreResult<Account> {
        self.inner.update_status(id, status).await
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
        self.inner
            .execute_atomic_transfer(
                from,
                to,
                amount,
                from_description,
                to_description,
                reference,
                status,
            )
            .await
    }
}

pub fn money(raw: &str) -> BigDecimal {
    raw.parse().expect("decimal literal")
}

pub fn command(from: Uuid, to: Uuid, amount: &str, key: &str, actor: Actor) -> TransferCommand {
    TransferCommand {
        from_account_id: from,
        to_account_id: to,
        amount: money(amount),
        currency: "USD".to_string(),
        description: "test transfer".to_string(),
        idempotency_key: key.to_string(),
        transfer_type: TransferType::Internal,
        direction: TransferDirection::Outbound,
        actor,
    }
}

pub fn parties() -> ExternalParties {
    ExternalParties {
        source: TransferAccount {
            account_holder_name: "Jane Doe".to_string(),
            account_number: "000111222".to_string(),
            routing_number: "021000021".to_string(),
            institution_name: None,
        },
        destination: TransferAccount {
            account_holder_name: "Acme Corp".to_string(),
            account_number: "999888777".to_string(),
            routing_number: "011000015".to_string(),
            institution_name: Some("First Bank".to_string()),
        },
    }
}

fn rand_suffix() -> u64 {
    let bytes = Uuid::new_v4().as_u128();
    (bytes % 10_000_000_000) as u64
}
