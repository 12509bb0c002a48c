use async_trait::async_trait;

use crate::domain::AuditEvent;
use crate::ports::AuditSink;

/// Emits audit events as structured log lines under the `audit` target.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_event(&self, event: AuditEvent) {
        tracing::info!(
            target: "audit",
            audit_id = %event.id,
            action = %event.action,
            resource = %event.resource,
            resource_id = %event.resource_id,
            actor = %event.actor,
            metadata = %event.metadata,
            "{}",
            event.message
        );
    }
}
