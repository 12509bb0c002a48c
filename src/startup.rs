use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;

use crate::adapters::{PostgresAuditLog, PostgresLedger, RedisLockStore};
use crate::config::Config;
use crate::gateway::{HttpSettlementGateway, SettlementGateway};
use crate::ports::{
    AccountRepository, AuditSink, LockStore, TransactionRepository, TransferRepository,
};
use crate::services::{
    AccountService, ConcurrencyLimiter, DistributedLock, RegulatorNotifier, TransferReconciler,
    TransferService,
};

/// Fully wired ledger services over Postgres, Redis and the HTTP gateway.
pub struct LedgerCore {
    pub pool: PgPool,
    pub gateway: Arc<HttpSettlementGateway>,
    pub transfers: Arc<TransferService>,
    pub accounts: Arc<AccountService>,
    pub reconciler: Arc<TransferReconciler>,
}

pub async fn build_core(config: &Config, pool: PgPool) -> Result<LedgerCore> {
    let ledger = Arc::new(PostgresLedger::new(pool.clone()));
    let account_repo: Arc<dyn AccountRepository> = ledger.clone();
    let transfer_repo: Arc<dyn TransferRepository> = ledger.clone();
    let transaction_repo: Arc<dyn TransactionRepository> = ledger;
    let audit: Arc<dyn AuditSink> = Arc::new(PostgresAuditLog::new(pool.clone()));

    let lock_store: Arc<dyn LockStore> =
        Arc::new(RedisLockStore::new(&config.redis_url).context("Invalid Redis URL")?);
    let lock = DistributedLock::new(lock_store, config.lock_prefix.clone(), config.lock_ttl);

    let http_gateway = Arc::new(HttpSettlementGateway::new(config.gateway_config()));
    let gateway: Arc<dyn SettlementGateway> = http_gateway.clone();

    let notifier = Arc::new(RegulatorNotifier::new(
        gateway.clone(),
        audit.clone(),
        config.notifier.clone(),
    ));

    let transfers = TransferService::new(
        account_repo.clone(),
        transfer_repo.clone(),
        audit.clone(),
        gateway.clone(),
        lock.clone(),
        ConcurrencyLimiter::new(config.user_concurrency_limit),
    )
    .with_notifier(notifier.clone());

    let reconciler = TransferReconciler::new(
        account_repo.clone(),
        transfer_repo,
        transaction_repo,
        gateway,
        audit.clone(),
        lock,
        config.reconciler.clone(),
    )
    .with_notifier(notifier);

    tracing::info!(
        gateway_url = %config.gateway_url,
        concurrency_limit = config.user_concurrency_limit,
        "Ledger services initialized"
    );

    Ok(LedgerCore {
        pool,
        gateway: http_gateway,
        transfers: Arc::new(transfers),
        accounts: Arc::new(AccountService::new(account_repo, audit)),
        reconciler: Arc::new(reconciler),
    })
}

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub redis: bool,
    pub gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.redis && self.gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Redis Connectivity:    {}", status(self.redis));
        println!("Gateway Connectivity:  {}", status(self.gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config) -> ValidationReport {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        redis: true,
        gateway: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(config).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_redis(&config.redis_url).await {
        report.redis = false;
        report.errors.push(format!("Redis: {}", e));
    }

    if let Err(e) = validate_gateway(&config.gateway_url).await {
        report.gateway = false;
        report.errors.push(format!("Gateway: {}", e));
    }

    report
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.redis_url.is_empty() {
        anyhow::bail!("REDIS_URL is empty");
    }
    if config.user_concurrency_limit == 0 {
        anyhow::bail!("USER_CONCURRENCY_LIMIT must be greater than 0");
    }
    if config.circuit_breaker.failure_threshold == 0 {
        anyhow::bail!("CIRCUIT_BREAKER_FAILURE_THRESHOLD must be greater than 0");
    }

    url::Url::parse(&config.gateway_url).context("SETTLEMENT_GATEWAY_URL is not a valid URL")?;
    url::Url::parse(&config.regulator_webhook_url)
        .context("REGULATOR_WEBHOOK_URL is not a valid URL")?;

    Ok(())
}

async fn validate_database(config: &Config) -> Result<()> {
    let pool = crate::db::create_pool(config)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(&pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_redis(redis_url: &str) -> Result<()> {
    let store = RedisLockStore::new(redis_url).context("Invalid Redis URL")?;
    store.ping().await.context("Redis PING failed")?;
    Ok(())
}

async fn validate_gateway(gateway_url: &str) -> Result<()> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let response = client
        .get(gateway_url)
        .send()
        .await
        .context("Failed to connect to settlement gateway")?;

    if response.status().is_server_error() {
        anyhow::bail!("Settlement gateway returned status: {}", response.status());
    }

    Ok(())
}
