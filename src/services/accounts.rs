use bigdecimal::Zero;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::domain::audit::{ACTION_ACCOUNT_CLOSED, ACTION_ACCOUNT_STATUS_CHANGED, RESOURCE_ACCOUNT};
use crate::domain::{Account, AccountStatus, Actor, AuditEvent};
use crate::error::TransferError;
use crate::ports::{AccountRepository, AuditSink};
use crate::services::transfer::load_account;

/// Administrative account lifecycle. Closed accounts stay closed.
pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
    audit: Arc<dyn AuditSink>,
}

impl AccountService {
    pub fn new(accounts: Arc<dyn AccountRepository>, audit: Arc<dyn AuditSink>) -> Self {
        Self { accounts, audit }
    }

    pub async fn update_status(
        &self,
        actor: Actor,
        account_id: Uuid,
        status: AccountStatus,
    ) -> Result<Account, TransferError> {
        let account = load_account(self.accounts.as_ref(), account_id).await?;

        if !actor.can_operate(&account) {
            return Err(TransferError::Unauthorized);
        }
        if account.status == status {
            return Ok(account);
        }
        if account.status == AccountStatus::Closed {
            return Err(TransferError::InvalidStateTransition(format!(
                "account {} is closed",
                account_id
            )));
        }
        if status == AccountStatus::Closed && !account.balance.is_zero() {
            return Err(TransferError::NonZeroBalance);
        }

        let updated = self.accounts.update_status(account_id, status).await?;

        let action = if status == AccountStatus::Closed {
            ACTION_ACCOUNT_CLOSED
        } else {
            ACTION_ACCOUNT_STATUS_CHANGED
        };
        info!(account_id = %account_id, from = %account.status, to = %status, "Account status changed");
        self.audit
            .log_event(
                AuditEvent::new(
                    action,
                    RESOURCE_ACCOUNT,
                    account_id.to_string(),
                    format!("Account status changed from {} to {}", account.status, status),
                )
                .by_user(actor.user_id)
                .with_metadata(json!({
                    "old_status": account.status.as_str(),
                    "new_status": status.as_str(),
                })),
            )
            .await;

        Ok(updated)
    }
}
