//! Wire types of the settlement gateway API.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use crate::domain::TransferStatus;

// ---------- Validation ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResponse<T> {
    pub validation: Validation,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
    pub valid: bool,
    #[serde(default)]
    pub issues: Vec<ValidationIssue>,
    #[serde(default)]
    pub metadata: HashMap<String, Value>,
    pub validation_time: Option<DateTime<Utc>>,
}

impl Validation {
    /// Issue messages joined for error reporting.
    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            return "validation failed".to_string();
        }
        self.issues
            .iter()
            .map(|i| format!("{}: {}", i.field, i.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub severity: String,
}

// ---------- Account ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountValidationRequest {
    pub account_holder_name: String,
    pub account_number: String,
    pub routing_number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayAccount {
    #[serde(rename = "account_id")]
    pub id: String,
    #[serde(rename = "account_holder_name", default)]
    pub account_holder: String,
    #[serde(rename = "account_status", default)]
    pub status: String,
    #[serde(rename = "account_type", default)]
    pub account_type: String,
    pub available_balance: Option<BigDecimal>,
}

#[derive(Debug, Clone)]
pub struct AccountValidationResult {
    pub account_exists: bool,
    pub account_valid: bool,
    pub available_balance: Option<BigDecimal>,
    pub response: ValidationResponse<GatewayAccount>,
}

// ---------- Transfer ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferAccount {
    pub account_holder_name: String,
    pub account_number: String,
    pub routing_number: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub institution_name: Option<String>,
}

/// Body for both `/external/transfers/validate` and `/external/transfers/initiate`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRequest {
    pub amount: BigDecimal,
    pub currency: String,
    pub direction: String,
    pub transfer_type: String,
    pub description: String,
    pub reference_number: String,
    pub scheduled_date: DateTime<Utc>,
    pub source_account: TransferAccount,
    pub destination_account: TransferAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayStatusEvent {
    pub status: String,
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStatusResponse {
    pub transfer_id: String,
    pub status: String,
    #[serde(default)]
    pub reference_number: String,
    pub amount: Option<BigDecimal>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub direction: String,
    #[serde(default)]
    pub transfer_type: String,
    #[serde(default)]
    pub description: String,
    pub initiated_date: Option<DateTime<Utc>>,
    pub expected_completion_date: Option<DateTime<Utc>>,
    pub fee: Option<BigDecimal>,
    #[serde(default)]
    pub retry_count: i32,
    #[serde(default)]
    pub status_history: Vec<GatewayStatusEvent>,
}

impl TransferStatusResponse {
    /// Lower-cased status; `None` for values outside pending/completed/failed.
    pub fn normalized_status(&self) -> Option<TransferStatus> {
        self.status.parse().ok()
    }
}

// ---------- Errors ----------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetail,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub details: HashMap<String, Value>,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub timestamp: String,
}

// ---------- Regulator webhook ----------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegulatorNotification {
    pub transfer_id: String,
    pub success: bool,
    pub details: NotificationDetails,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationDetails {
    pub amount: String,
    pub from_account: String,
    pub to_account: String,
    pub status: TransferStatus,
}
