pub mod accounts;
pub mod circuit_breaker;
pub mod concurrency_limiter;
pub mod lock;
pub mod reconciliation;
pub mod regulator;
pub mod transfer;

pub use accounts::AccountService;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitState};
pub use concurrency_limiter::{ConcurrencyLimiter, ConcurrencyPermit};
pub use lock::{DistributedLock, LockGuard};
pub use reconciliation::{ReconcileOutcome, ReconcileSummary, ReconcilerConfig, TransferReconciler};
pub use regulator::{NotificationOutcome, NotifierConfig, RegulatorNotifier};
pub use transfer::{ExternalParties, TransferCommand, TransferService};
