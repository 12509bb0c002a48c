//! Audit events produced by state-changing operations. Never read back by the core.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::Transfer;

pub const ACTION_TRANSFER_CREATED: &str = "transfer.created";
pub const ACTION_TRANSFER_COMPLETED: &str = "transfer.completed";
pub const ACTION_TRANSFER_FAILED: &str = "transfer.failed";
pub const ACTION_TRANSFER_INITIATED: &str = "transfer.initiated";
pub const ACTION_ACCOUNT_STATUS_CHANGED: &str = "account.status_changed";
pub const ACTION_ACCOUNT_CLOSED: &str = "account.closed";
pub const ACTION_TRANSFER_STATUS_DETECTED: &str = "transfer.status_detected";
pub const ACTION_REGULATOR_NOTIFICATION: &str = "regulator.notification";

pub const RESOURCE_TRANSFER: &str = "transfer";
pub const RESOURCE_ACCOUNT: &str = "account";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource: String,
    pub resource_id: String,
    pub message: String,
    pub actor: String,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(
        action: &str,
        resource: &str,
        resource_id: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: None,
            action: action.to_string(),
            resource: resource.to_string(),
            resource_id: resource_id.into(),
            message: message.into(),
            actor: "system".to_string(),
            metadata: Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn by_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self.actor = user_id.to_string();
        self
    }

    pub fn by_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    /// Transfer event carrying the amount, parties and status as metadata.
    pub fn for_transfer(action: &str, transfer: &Transfer, message: impl Into<String>) -> Self {
        Self::new(action, RESOURCE_TRANSFER, transfer.id.to_string(), message).with_metadata(
            serde_json::json!({
                "amount": transfer.amount.to_string(),
                "currency": transfer.currency,
                "from_account_id": transfer.from_account_id,
                "to_account_id": transfer.to_account_id,
                "reference_number": transfer.reference_number,
                "idempotency_key": transfer.idempotency_key,
                "status": transfer.status.as_str(),
            }),
        )
    }
}
