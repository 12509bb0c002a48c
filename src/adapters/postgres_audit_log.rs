use async_trait::async_trait;
use serde_json::Value;
use sqlx::PgPool;

use crate::domain::AuditEvent;
use crate::ports::AuditSink;

/// Appends audit events to `audit_logs`. Insert failures are logged and dropped.
#[derive(Clone)]
pub struct PostgresAuditLog {
    pool: PgPool,
}

impl PostgresAuditLog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditLog {
    async fn log_event(&self, event: AuditEvent) {
        let metadata = match &event.metadata {
            Value::Null => None,
            other => Some(other.clone()),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO audit_logs (
                id, user_id, action, resource, resource_id, message, actor, metadata, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(event.id)
        .bind(event.user_id)
        .bind(&event.action)
        .bind(&event.resource)
        .bind(&event.resource_id)
        .bind(&event.message)
        .bind(&event.actor)
        .bind(metadata)
        .bind(event.created_at)
        .execute(&self.pool)
        .await;

        if let Err(e) = result {
            tracing::error!(
                error = %e,
                action = %event.action,
                resource_id = %event.resource_id,
                "Failed to write audit log"
            );
        }
    }
}
