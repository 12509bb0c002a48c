//! Implementations of the `crate::ports` contracts.

pub mod memory;
pub mod postgres_audit_log;
pub mod postgres_ledger;
pub mod redis_lock_store;
pub mod tracing_audit_sink;

pub use memory::{InMemoryLedger, InMemoryLockStore, MemoryAuditSink};
pub use postgres_audit_log::PostgresAuditLog;
pub use postgres_ledger::PostgresLedger;
pub use redis_lock_store::RedisLockStore;
pub use tracing_audit_sink::TracingAuditSink;
