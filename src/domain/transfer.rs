//! Transfer domain entity.
//!
//! A transfer is created `pending` exactly once per idempotency key and moves
//! to one of the terminal states `completed` or `failed`. Terminal states are
//! final: every further transition is rejected.
//!
//! ```text
//! PENDING ──► COMPLETED
//!    │
//!    └──────► FAILED
//! ```

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::TransferError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Completed,
    Failed,
}

impl TransferStatus {
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransferStatus::Completed | TransferStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Pending => "pending",
            TransferStatus::Completed => "completed",
            TransferStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Case-insensitive, so gateway statuses like `COMPLETED` normalize.
impl FromStr for TransferStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(TransferStatus::Pending),
            "completed" => Ok(TransferStatus::Completed),
            "failed" => Ok(TransferStatus::Failed),
            other => Err(format!("unknown transfer status: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferType {
    Internal,
    Ach,
    Wire,
}

impl TransferType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferType::Internal => "internal",
            TransferType::Ach => "ach",
            TransferType::Wire => "wire",
        }
    }
}

impl FromStr for TransferType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "internal" => Ok(TransferType::Internal),
            "ach" => Ok(TransferType::Ach),
            "wire" => Ok(TransferType::Wire),
            other => Err(format!("unknown transfer type: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferDirection {
    Inbound,
    Outbound,
}

impl TransferDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferDirection::Inbound => "inbound",
            TransferDirection::Outbound => "outbound",
        }
    }
}

impl FromStr for TransferDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "inbound" => Ok(TransferDirection::Inbound),
            "outbound" => Ok(TransferDirection::Outbound),
            other => Err(format!("unknown transfer direction: {}", other)),
        }
    }
}

/// One entry of the status-history trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferStatusEvent {
    pub status: TransferStatus,
    pub timestamp: DateTime<Utc>,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transfer {
    pub id: Uuid,
    pub from_account_id: Uuid,
    pub to_account_id: Uuid,
    pub amount: BigDecimal,
    pub currency: String,
    pub description: String,
    pub idempotency_key: String,
    pub reference_number: String,
    /// Identifier assigned by the settlement gateway for delegated transfers.
    pub external_transfer_id: Option<String>,
    pub transfer_type: TransferType,
    pub direction: TransferDirection,
    pub status: TransferStatus,
    pub debit_transaction_id: Option<Uuid>,
    pub credit_transaction_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub failed_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status_history: Vec<TransferStatusEvent>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transfer {
    #[allow(clippy::too_many_arguments)]
    pub fn new_pending(
        from_account_id: Uuid,
        to_account_id: Uuid,
        amount: BigDecimal,
        currency: String,
        description: String,
        idempotency_key: String,
        transfer_type: TransferType,
        direction: TransferDirection,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            from_account_id,
            to_account_id,
            amount,
            currency,
            description,
            idempotency_key,
            reference_number: new_reference_number(),
            external_transfer_id: None,
            transfer_type,
            direction,
            status: TransferStatus::Pending,
            debit_transaction_id: None,
            credit_transaction_id: None,
            error_message: None,
            failed_at: None,
            completed_at: None,
            status_history: vec![TransferStatusEvent {
                status: TransferStatus::Pending,
                timestamp: now,
                description: "Transfer created".to_string(),
            }],
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Key used to look the transfer up at the settlement gateway.
    pub fn gateway_transfer_id(&self) -> String {
        self.external_transfer_id
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn complete(&mut self, debit_tx_id: Uuid, credit_tx_id: Uuid) -> Result<(), TransferError> {
        self.ensure_pending(TransferStatus::Completed)?;
        let now = Utc::now();
        self.status = TransferStatus::Completed;
        self.debit_transaction_id = Some(debit_tx_id);
        self.credit_transaction_id = Some(credit_tx_id);
        self.completed_at = Some(now);
        self.updated_at = now;
        self.status_history.push(TransferStatusEvent {
            status: TransferStatus::Completed,
            timestamp: now,
            description: "Funds moved".to_string(),
        });
        Ok(())
    }

    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransferError> {
        self.ensure_pending(TransferStatus::Failed)?;
        let reason = reason.into();
        let now = Utc::now();
        self.status = TransferStatus::Failed;
        self.failed_at = Some(now);
        self.updated_at = now;
        self.status_history.push(TransferStatusEvent {
            status: TransferStatus::Failed,
            timestamp: now,
            description: reason.clone(),
        });
        self.error_message = Some(reason);
        Ok(())
    }

    fn ensure_pending(&self, target: TransferStatus) -> Result<(), TransferError> {
        if self.status.is_terminal() {
            return Err(TransferError::InvalidStateTransition(format!(
                "transfer {} is {}, cannot move to {}",
                self.id, self.status, target
            )));
        }
        Ok(())
    }
}

fn new_reference_number() -> String {
    let raw = Uuid::new_v4().simple().to_string().to_uppercase();
    format!("TRF-{}", &raw[..16])
}
