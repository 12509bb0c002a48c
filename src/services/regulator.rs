//! Bounded-retry delivery of regulator notifications.
//!
//! After a transfer reaches a terminal state a detached task first polls the
//! settlement gateway until it reports `completed`/`failed` or the poll
//! budget runs out, then posts the regulator webhook with linear backoff
//! inside a fresh delivery budget.

use std::sync::Arc;
use std::time::Duration;
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::domain::audit::{
    ACTION_REGULATOR_NOTIFICATION, ACTION_TRANSFER_STATUS_DETECTED, RESOURCE_TRANSFER,
};
use crate::domain::{AuditEvent, Transfer, TransferStatus};
use crate::gateway::{NotificationDetails, RegulatorNotification, SettlementGateway};
use crate::ports::AuditSink;

#[derive(Debug, Clone)]
pub struct NotifierConfig {
    /// Budget for each phase: status polling, then webhook delivery.
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub max_retries: u32,
    /// Backoff after attempt `n` is `n * backoff_step`.
    pub backoff_step: Duration,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(1),
            max_retries: 5,
            backoff_step: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationOutcome {
    Delivered { attempts: u32 },
    Exhausted { attempts: u32 },
    TimedOut { attempts: u32 },
}

impl NotificationOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            NotificationOutcome::Delivered { attempts }
            | NotificationOutcome::Exhausted { attempts }
            | NotificationOutcome::TimedOut { attempts } => *attempts,
        }
    }
}

pub struct RegulatorNotifier {
    gateway: Arc<dyn SettlementGateway>,
    audit: Arc<dyn AuditSink>,
    config: NotifierConfig,
}

impl RegulatorNotifier {
    pub fn new(
        gateway: Arc<dyn SettlementGateway>,
        audit: Arc<dyn AuditSink>,
        config: NotifierConfig,
    ) -> Self {
        Self {
            gateway,
            audit,
            config,
        }
    }

    /// Spawns the poll-then-notify protocol for `transfer` as a detached task.
    pub fn start_monitoring(self: &Arc<Self>, transfer: Transfer) -> JoinHandle<NotificationOutcome> {
        let notifier = Arc::clone(self);
        tokio::spawn(async move { notifier.monitor(&transfer).await })
    }

    pub async fn monitor(&self, transfer: &Transfer) -> NotificationOutcome {
        let deadline = Instant::now() + self.config.timeout;
        let status = self
            .poll_transfer_status(&transfer.gateway_transfer_id(), deadline)
            .await;

        info!(transfer_id = %transfer.id, status = %status, "Transfer final status detected");
        self.audit
            .log_event(
                AuditEvent::new(
                    ACTION_TRANSFER_STATUS_DETECTED,
                    RESOURCE_TRANSFER,
                    transfer.id.to_string(),
                    "Transfer final status detected",
                )
                .with_metadata(json!({
                    "transfer_id": transfer.id,
                    "status": status.as_str(),
                })),
            )
            .await;

        self.notify_regulator(transfer, status).await
    }

    /// Polls until the gateway reports a terminal status. Returns `Pending`
    /// once `deadline` passes without one.
    pub async fn poll_transfer_status(&self, gateway_id: &str, deadline: Instant) -> TransferStatus {
        loop {
            match timeout_at(deadline, self.gateway.get_transfer_status(gateway_id)).await {
                Ok(Ok(response)) => match response.normalized_status() {
                    Some(status) if status.is_terminal() => return status,
                    _ => debug!(transfer_id = %gateway_id, status = %response.status, "Transfer not settled yet"),
                },
                Ok(Err(e)) => debug!(transfer_id = %gateway_id, error = %e, "Status poll failed"),
                Err(_) => break,
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            sleep(self.config.poll_interval.min(deadline - now)).await;
        }

        warn!(transfer_id = %gateway_id, "Status polling timed out, reporting pending");
        TransferStatus::Pending
    }

    pub async fn notify_regulator(
        &self,
        transfer: &Transfer,
        status: TransferStatus,
    ) -> NotificationOutcome {
        let payload = RegulatorNotification {
            transfer_id: transfer.id.to_string(),
            success: status == TransferStatus::Completed,
            details: NotificationDetails {
                amount: transfer.amount.to_string(),
                from_account: transfer.from_account_id.to_string(),
                to_account: transfer.to_account_id.to_string(),
                status,
            },
        };

        let deadline = Instant::now() + self.config.timeout;
        let mut attempts = 0;

        while attempts < self.config.max_retries {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return self.timed_out(transfer, attempts).await;
            }

            attempts += 1;
            match timeout_at(deadline, self.gateway.notify(&payload)).await {
                Ok(Ok(())) => {
                    info!(transfer_id = %transfer.id, attempts, "Regulator notified");
                    self.audit_attempt(transfer, attempts, "delivered", None).await;
                    return NotificationOutcome::Delivered { attempts };
                }
                Ok(Err(e)) => {
                    warn!(transfer_id = %transfer.id, attempt = attempts, error = %e, "Regulator notification failed");
                    self.audit_attempt(transfer, attempts, "failed", Some(e.to_string()))
                        .await;
                }
                Err(_) => {
                    self.audit_attempt(transfer, attempts, "timed_out", None).await;
                    return self.timed_out(transfer, attempts).await;
                }
            }

            if attempts < self.config.max_retries {
                let remaining = deadline.saturating_duration_since(Instant::now());
                sleep((self.config.backoff_step * attempts).min(remaining)).await;
            }
        }

        warn!(transfer_id = %transfer.id, attempts, "Regulator notification retries exhausted");
        self.audit
            .log_event(
                AuditEvent::new(
                    ACTION_REGULATOR_NOTIFICATION,
                    RESOURCE_TRANSFER,
                    transfer.id.to_string(),
                    "Regulator notification retries exhausted",
                )
                .with_metadata(json!({ "outcome": "exhausted", "attempts": attempts })),
            )
            .await;
        NotificationOutcome::Exhausted { attempts }
    }

    async fn timed_out(&self, transfer: &Transfer, attempts: u32) -> NotificationOutcome {
        warn!(transfer_id = %transfer.id, attempts, "Regulator notification budget exhausted");
        self.audit
            .log_event(
                AuditEvent::new(
                    ACTION_REGULATOR_NOTIFICATION,
                    RESOURCE_TRANSFER,
                    transfer.id.to_string(),
                    "Regulator notification timed out",
                )
                .with_metadata(json!({ "outcome": "timed_out", "attempts": attempts })),
            )
            .await;
        NotificationOutcome::TimedOut { attempts }
    }

    async fn audit_attempt(
        &self,
        transfer: &Transfer,
        attempt: u32,
        outcome: &str,
        error: Option<String>,
    ) {
        let message = format!("Regulator notification attempt {} {}", attempt, outcome);
        self.audit
            .log_event(
                AuditEvent::new(
                    ACTION_REGULATOR_NOTIFICATION,
                    RESOURCE_TRANSFER,
                    transfer.id.to_string(),
                    message,
                )
                .with_metadata(json!({
                    "attempt": attempt,
                    "outcome": outcome,
                    "error": error,
                })),
            )
            .await;
    }
}
