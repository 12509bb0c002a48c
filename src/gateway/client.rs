use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use super::types::{
    AccountValidationRequest, AccountValidationResult, ErrorResponse, GatewayAccount,
    RegulatorNotification, TransferRequest, TransferStatusResponse, ValidationResponse,
};
use super::{GatewayError, SettlementGateway};
use crate::services::circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState,
};

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub webhook_url: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl GatewayConfig {
    pub fn new(base_url: impl Into<String>, webhook_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            webhook_url: webhook_url.into(),
            api_key: None,
            timeout: Duration::from_secs(10),
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// HTTP client for the settlement gateway.
///
/// Gateway calls go through a circuit breaker; the regulator webhook does not,
/// so a failing regulator endpoint never blocks settlement traffic.
#[derive(Clone)]
pub struct HttpSettlementGateway {
    client: Client,
    base_url: String,
    webhook_url: String,
    api_key: Option<String>,
    circuit_breaker: Arc<CircuitBreaker>,
}

impl HttpSettlementGateway {
    pub fn new(config: GatewayConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();

        HttpSettlementGateway {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            webhook_url: config.webhook_url,
            api_key: config.api_key,
            circuit_breaker: Arc::new(CircuitBreaker::new(config.circuit_breaker)),
        }
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.circuit_breaker.state()
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn guarded<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, GatewayError> {
        let request = self.authorized(request);
        let result = self
            .circuit_breaker
            .call(execute::<T>(request), GatewayError::is_transient)
            .await;

        match result {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Open) => Err(GatewayError::CircuitOpen),
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }
}

async fn execute<T: DeserializeOwned>(request: RequestBuilder) -> Result<T, GatewayError> {
    let response = request.send().await.map_err(|e| {
        error!(error = %e, "settlement gateway request failed");
        if e.is_timeout() {
            GatewayError::Timeout
        } else {
            GatewayError::Request(e)
        }
    })?;

    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(parse_error(status.as_u16(), &body));
    }

    serde_json::from_str(&body).map_err(|e| GatewayError::InvalidResponse(e.to_string()))
}

fn parse_error(status: u16, body: &str) -> GatewayError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(resp) => GatewayError::Api {
            status,
            code: resp.error.code,
            message: resp.error.message,
            request_id: resp.error.request_id,
        },
        Err(_) => GatewayError::Unexpected {
            status,
            body: body.to_string(),
        },
    }
}

#[async_trait]
impl SettlementGateway for HttpSettlementGateway {
    async fn validate_account(
        &self,
        request: &AccountValidationRequest,
    ) -> Result<AccountValidationResult, GatewayError> {
        let url = format!("{}/external/accounts/validate", self.base_url);
        let response: ValidationResponse<GatewayAccount> =
            self.guarded(self.client.post(&url).json(request)).await?;

        let account_exists = response
            .data
            .as_ref()
            .map(|a| !a.id.is_empty())
            .unwrap_or(false);
        let available_balance = response
            .data
            .as_ref()
            .and_then(|a| a.available_balance.clone());

        info!(
            valid = response.validation.valid,
            exists = account_exists,
            "account validation completed"
        );

        Ok(AccountValidationResult {
            account_exists,
            account_valid: response.validation.valid,
            available_balance,
            response,
        })
    }

    async fn validate_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<ValidationResponse<TransferStatusResponse>, GatewayError> {
        let url = format!("{}/external/transfers/validate", self.base_url);
        self.guarded(self.client.post(&url).json(request)).await
    }

    async fn initiate_transfer(
        &self,
        request: &TransferRequest,
    ) -> Result<TransferStatusResponse, GatewayError> {
        let url = format!("{}/external/transfers/initiate", self.base_url);
        let status: TransferStatusResponse =
            self.guarded(self.client.post(&url).json(request)).await?;

        info!(
            transfer_id = %status.transfer_id,
            status = %status.status,
            "transfer initiated"
        );
        Ok(status)
    }

    async fn get_transfer_status(
        &self,
        transfer_id: &str,
    ) -> Result<TransferStatusResponse, GatewayError> {
        let url = format!("{}/external/transfers/{}", self.base_url, transfer_id);
        self.guarded(self.client.get(&url)).await
    }

    async fn notify(&self, payload: &RegulatorNotification) -> Result<(), GatewayError> {
        let request = self.authorized(self.client.post(&self.webhook_url).json(payload));
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Timeout
            } else {
                GatewayError::Request(e)
            }
        })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(parse_error(status.as_u16(), &body))
    }
}
