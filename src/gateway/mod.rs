//! Settlement gateway: the external system of record for transfer validation,
//! initiation and status, plus the regulator webhook.

pub mod client;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

pub use client::{GatewayConfig, HttpSettlementGateway};
pub use types::{
    AccountValidationRequest, AccountValidationResult, NotificationDetails, RegulatorNotification,
    TransferAccount, TransferRequest, TransferStatusResponse, ValidationResponse,
};

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("gateway error {code}: {message} (request_id: {request_id})")]
    Api {
        status: u16,
        code: String,
        message: String,
        request_id: String,
    },

    #[error("gateway error ({status}): {body}")]
    Unexpected { status: u16, body: String },

    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),

    #[error("Settlement gateway circuit breaker is open")]
    CircuitOpen,

    #[error("Settlement gateway call timed out")]
    Timeout,
}

impl GatewayError {
    /// Failures that indicate a degraded gateway rather than a rejected request.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Request(_) | GatewayError::Timeout => true,
            GatewayError::Api { status, .. } | GatewayError::Unexpected { status, .. } => {
                *status >= 500 || *status == 429
            }
            GatewayError::InvalidResponse(_) | GatewayError::CircuitOpen => false,
        }
    }
}

#[async_trait]
pub trait SettlementGateway: Send + Sync {
    async fn validate_account(
        &self,
        request: &AccountValidationRequest,
    ) -> Result<AccountValidationResult, GatewayError>;

    async fn validate_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ValidationResponse<TransferStatusResponse>, GatewayError>;

    async fn initiate_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferStatusResponse, GatewayError>;

    async fn get_transfer_status(
        &self,
        transfer_id: &str,
    ) -> Result<TransferStatusResponse, GatewayError>;

    /// Delivers one regulator webhook. Non-2xx is an error.
    async fn notify(&self, payload: &RegulatorNotification) -> Result<(), GatewayError>;
}
