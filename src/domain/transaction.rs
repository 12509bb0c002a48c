//! Transaction domain entity.
//! One immutable ledger leg (debit or credit) against a single account.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Credit,
    Debit,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Credit => "credit",
            TransactionType::Debit => "debit",
        }
    }
}

impl FromStr for TransactionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "credit" => Ok(TransactionType::Credit),
            "debit" => Ok(TransactionType::Debit),
            other => Err(format!("unknown transaction type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(TransactionStatus::Pending),
            "completed" => Ok(TransactionStatus::Completed),
            "failed" => Ok(TransactionStatus::Failed),
            other => Err(format!("unknown transaction status: {}", other)),
        }
    }
}

/// Domain entity representing a ledger leg.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub account_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: BigDecimal,
    pub balance_before: BigDecimal,
    pub balance_after: BigDecimal,
    pub status: TransactionStatus,
    pub description: String,
    pub reference: String,
    pub merchant_name: Option<String>,
    pub category: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    /// Builds a leg with its balance snapshot. Debits subtract, credits add.
    pub fn leg(
        account_id: Uuid,
        transaction_type: TransactionType,
        amount: BigDecimal,
        balance_before: BigDecimal,
        description: String,
        reference: String,
        status: TransactionStatus,
    ) -> Self {
        let balance_after = match transaction_type {
            TransactionType::Debit => &balance_before - &amount,
            TransactionType::Credit => &balance_before + &amount,
        };
        let now = Utc::now();
        let processed_at = match status {
            TransactionStatus::Pending => None,
            _ => Some(now),
        };

        Self {
            id: Uuid::new_v4(),
            account_id,
            transaction_type,
            amount,
            balance_before,
            balance_after,
            status,
            description,
            reference,
            merchant_name: None,
            category: Some("transfer".to_string()),
            processed_at,
            created_at: now,
        }
    }
}
