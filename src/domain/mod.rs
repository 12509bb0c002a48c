//! Framework-agnostic ledger entities.

pub mod account;
pub mod audit;
pub mod transaction;
pub mod transfer;

pub use account::{Account, AccountStatus, AccountType};
pub use audit::AuditEvent;
pub use transaction::{Transaction, TransactionStatus, TransactionType};
pub use transfer::{Transfer, TransferDirection, TransferStatus, TransferStatusEvent, TransferType};

use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Customer,
    Admin,
}

/// The authenticated caller on whose behalf an operation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn customer(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn can_operate(&self, account: &Account) -> bool {
        self.is_admin() || account.user_id == self.user_id
    }
}
