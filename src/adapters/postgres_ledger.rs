//! Postgres implementation of the account, transaction and transfer stores.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    Account, AccountStatus, Transaction, TransactionStatus, TransactionType, Transfer,
    TransferStatusEvent,
};
use crate::ports::{
    AccountRepository, LedgerLegs, StoreError, StoreResult, TransactionRepository,
    TransferRepository,
};

const ACCOUNT_COLUMNS: &str = "id, user_id, account_number, routing_number, account_type, \
     balance, currency, status, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, account_id, transaction_type, amount, balance_before, \
     balance_after, status, description, reference, merchant_name, category, processed_at, created_at";

const TRANSFER_COLUMNS: &str = "id, from_account_id, to_account_id, amount, currency, description, \
     idempotency_key, reference_number, external_transfer_id, transfer_type, direction, status, \
     debit_transaction_id, credit_transaction_id, error_message, failed_at, completed_at, \
     status_history, created_at, updated_at";

#[derive(Clone)]
pub struct PostgresLedger {
    pool: PgPool,
}

impl PostgresLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert_leg(
        conn: &mut sqlx::PgConnection,
        leg: &Transaction,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO transactions (
                id, account_id, transaction_type, amount, balance_before, balance_after,
                status, description, reference, merchant_name, category, processed_at, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(leg.id)
        .bind(leg.account_id)
        .bind(leg.transaction_type.as_str())
        .bind(&leg.amount)
        .bind(&leg.balance_before)
        .bind(&leg.balance_after)
        .bind(leg.status.as_str())
        .bind(&leg.description)
        .bind(&leg.reference)
        .bind(&leg.merchant_name)
        .bind(&leg.category)
        .bind(leg.processed_at)
        .bind(leg.created_at)
        .execute(conn)
        .await?;
        Ok(())
    }

    /// Distinguishes a missing row from a terminal one after a conditional update matched nothing.
    async fn transfer_conflict(&self, id: Uuid) -> StoreError {
        match sqlx::query_scalar::<_, String>("SELECT status FROM transfers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
        {
            Ok(Some(status)) => {
                StoreError::Conflict(format!("transfer {} is already {}", id, status))
            }
            Ok(None) => StoreError::NotFound(format!("transfer {}", id)),
            Err(e) => e.into(),
        }
    }
}

#[async_trait]
impl AccountRepository for PostgresLedger {
    async fn insert(&self, account: &Account) -> StoreResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            r#"
            INSERT INTO accounts ({cols})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {cols}
            "#,
            cols = ACCOUNT_COLUMNS
        ))
        .bind(account.id)
        .bind(account.user_id)
        .bind(&account.account_number)
        .bind(&account.routing_number)
        .bind(account.account_type.as_str())
        .bind(&account.balance)
        .bind(&account.currency)
        .bind(account.status.as_str())
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?
            .into_domain()
    }

    async fn update_status(&self, id: Uuid, status: AccountStatus) -> StoreResult<Account> {
        let row = sqlx::query_as::<_, AccountRow>(&format!(
            "UPDATE accounts SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .bind(status.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("account {}", id)))?
            .into_domain()
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
        let mut tx = self.pool.begin().await?;

        // Row locks in id order so concurrent A->B and B->A cannot deadlock.
        let rows = sqlx::query_as::<_, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = ANY($1) ORDER BY id FOR UPDATE",
            ACCOUNT_COLUMNS
        ))
        .bind(vec![from, to])
        .fetch_all(&mut *tx)
        .await?;

        let mut source = None;
        let mut destination = None;
        for row in rows {
            let account = row.into_domain()?;
            if account.id == from {
                source = Some(account);
            } else if account.id == to {
                destination = Some(account);
            }
        }
        let source = source.ok_or_else(|| StoreError::NotFound(format!("account {}", from)))?;
        let destination =
            destination.ok_or_else(|| StoreError::NotFound(format!("account {}", to)))?;

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
            source.balance,
            from_description.to_string(),
            reference.to_string(),
            status,
        );
        let credit = Transaction::leg(
            to,
            TransactionType::Credit,
            amount.clone(),
            destination.balance,
            to_description.to_string(),
            reference.to_string(),
            status,
        );

        sqlx::query("UPDATE accounts SET balance = balance - $2, updated_at = NOW() WHERE id = $1")
            .bind(from)
            .bind(amount)
            .execute(&mut *tx)
            .await?;
        sqlx::query("UPDATE accounts SET balance = balance + $2, updated_at = NOW() WHERE id = $1")
            .bind(to)
            .bind(amount)
            .execute(&mut *tx)
            .await?;

        Self::insert_leg(&mut *tx, &debit).await?;
        Self::insert_leg(&mut *tx, &credit).await?;

        tx.commit().await?;

        Ok(LedgerLegs {
            debit_tx_id: debit.id,
            credit_tx_id: credit.id,
        })
    }
}

#[async_trait]
impl TransactionRepository for PostgresLedger {
    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transaction> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TRANSACTION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("transaction {}", id)))?
            .into_domain()
    }

    async fn list_by_account(&self, account_id: Uuid) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE account_id = $1 ORDER BY created_at DESC",
            TRANSACTION_COLUMNS
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }

    async fn list_by_reference(&self, reference: &str) -> StoreResult<Vec<Transaction>> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE reference = $1 \
             ORDER BY (transaction_type = 'debit') DESC, created_at",
            TRANSACTION_COLUMNS
        ))
        .bind(reference)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransactionRow::into_domain).collect()
    }
}

#[async_trait]
impl TransferRepository for PostgresLedger {
    async fn create(&self, transfer: &Transfer) -> StoreResult<()> {
        sqlx::query(&format!(
            r#"
            INSERT INTO transfers ({})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)
            "#,
            TRANSFER_COLUMNS
        ))
        .bind(transfer.id)
        .bind(transfer.from_account_id)
        .bind(transfer.to_account_id)
        .bind(&transfer.amount)
        .bind(&transfer.currency)
        .bind(&transfer.description)
        .bind(&transfer.idempotency_key)
        .bind(&transfer.reference_number)
        .bind(&transfer.external_transfer_id)
        .bind(transfer.transfer_type.as_str())
        .bind(transfer.direction.as_str())
        .bind(transfer.status.as_str())
        .bind(transfer.debit_transaction_id)
        .bind(transfer.credit_transaction_id)
        .bind(&transfer.error_message)
        .bind(transfer.failed_at)
        .bind(transfer.completed_at)
        .bind(Json(&transfer.status_history))
        .bind(transfer.created_at)
        .bind(transfer.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Transfer> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {} FROM transfers WHERE id = $1",
            TRANSFER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| StoreError::NotFound(format!("transfer {}", id)))?
            .into_domain()
    }

    async fn find_by_idempotency_key(&self, key: &str) -> StoreResult<Option<Transfer>> {
        let row = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {} FROM transfers WHERE idempotency_key = $1",
            TRANSFER_COLUMNS
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TransferRow::into_domain).transpose()
    }

    async fn update(&self, transfer: &Transfer) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transfers SET
                status = $2,
                debit_transaction_id = $3,
                credit_transaction_id = $4,
                error_message = $5,
                failed_at = $6,
                completed_at = $7,
                status_history = $8,
                external_transfer_id = $9,
                updated_at = $10
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(transfer.id)
        .bind(transfer.status.as_str())
        .bind(transfer.debit_transaction_id)
        .bind(transfer.credit_transaction_id)
        .bind(&transfer.error_message)
        .bind(transfer.failed_at)
        .bind(transfer.completed_at)
        .bind(Json(&transfer.status_history))
        .bind(&transfer.external_transfer_id)
        .bind(transfer.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transfer_conflict(transfer.id).await);
        }
        Ok(())
    }

    async fn set_external_id(&self, id: Uuid, external_transfer_id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE transfers SET external_transfer_id = $2, updated_at = NOW() \
             WHERE id = $1 AND status = 'pending'",
        )
        .bind(id)
        .bind(external_transfer_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(self.transfer_conflict(id).await);
        }
        Ok(())
    }

    async fn find_pending_external(&self, limit: i64) -> StoreResult<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {} FROM transfers \
             WHERE status = 'pending' AND external_transfer_id IS NOT NULL \
             ORDER BY created_at LIMIT $1",
            TRANSFER_COLUMNS
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransferRow::into_domain).collect()
    }

    async fn find_stale_internal(
        &self,
        created_before: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Transfer>> {
        let rows = sqlx::query_as::<_, TransferRow>(&format!(
            "SELECT {} FROM transfers \
             WHERE status = 'pending' AND external_transfer_id IS NULL AND created_at < $1 \
             ORDER BY created_at LIMIT $2",
            TRANSFER_COLUMNS
        ))
        .bind(created_before)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TransferRow::into_domain).collect()
    }
}

fn parse_column<T>(column: &str, raw: &str) -> StoreResult<T>
where
    T: std::str::FromStr<Err = String>,
{
    raw.parse()
        .map_err(|e| StoreError::Database(format!("invalid {}: {}", column, e)))
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: Uuid,
    user_id: Uuid,
    account_number: String,
    routing_number: String,
    account_type: String,
    balance: BigDecimal,
    currency: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl AccountRow {
    fn into_domain(self) -> StoreResult<Account> {
        Ok(Account {
            id: self.id,
            user_id: self.user_id,
            account_number: self.account_number,
            routing_number: self.routing_number,
            account_type: parse_column("account_type", &self.account_type)?,
            balance: self.balance,
            currency: self.currency,
            status: parse_column("account status", &self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: Uuid,
    account_id: Uuid,
    transaction_type: String,
    amount: BigDecimal,
    balance_before: BigDecimal,
    balance_after: BigDecimal,
    status: String,
    description: String,
    reference: String,
    merchant_name: Option<String>,
    category: Option<String>,
    processed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
}

impl TransactionRow {
    fn into_domain(self) -> StoreResult<Transaction> {
        Ok(Transaction {
            id: self.id,
            account_id: self.account_id,
            transaction_type: parse_column("transaction_type", &self.transaction_type)?,
            amount: self.amount,
            balance_before: self.balance_before,
            balance_after: self.balance_after,
            status: parse_column("transaction status", &self.status)?,
            description: self.description,
            reference: self.reference,
            merchant_name: self.merchant_name,
            category: self.category,
            processed_at: self.processed_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransferRow {
    id: Uuid,
    from_account_id: Uuid,
    to_account_id: Uuid,
    amount: BigDecimal,
    currency: String,
    description: String,
    idempotency_key: String,
    reference_number: String,
    external_transfer_id: Option<String>,
    transfer_type: String,
    direction: String,
    status: String,
    debit_transaction_id: Option<Uuid>,
    credit_transaction_id: Option<Uuid>,
    error_message: Option<String>,
    failed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    status_history: Json<Vec<TransferStatusEvent>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TransferRow {
    fn into_domain(self) -> StoreResult<Transfer> {
        Ok(Transfer {
            id: self.id,
            from_account_id: self.from_account_id,
            to_account_id: self.to_account_id,
            amount: self.amount,
            currency: self.currency,
            description: self.description,
            idempotency_key: self.idempotency_key,
            reference_number: self.reference_number,
            external_transfer_id: self.external_transfer_id,
            transfer_type: parse_column("transfer_type", &self.transfer_type)?,
            direction: parse_column("direction", &self.direction)?,
            status: parse_column("transfer status", &self.status)?,
            debit_transaction_id: self.debit_transaction_id,
            credit_transaction_id: self.credit_transaction_id,
            error_message: self.error_message,
            failed_at: self.failed_at,
            completed_at: self.completed_at,
            status_history: self.status_history.0,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
