use crate::config::DatabaseConfig;
use crate::error::AppError;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::{Config as PgConfig, NoTls};

/// Schema files applied in order at startup. Every statement is idempotent.
const MIGRATIONS: &[(&str, &str)] = &[(
    "0001_chat_core",
    include_str!("../migrations/0001_chat_core.sql"),
)];

pub async fn init_pool(cfg: &DatabaseConfig) -> Result<Pool, AppError> {
    let pg_config: PgConfig = cfg
        .url
        .parse()
        .map_err(|e: tokio_postgres::Error| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr_config = ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    };
    let mgr = Manager::from_config(pg_config, NoTls, mgr_config);
    let pool = Pool::builder(mgr)
        .max_size(cfg.max_connections)
        .wait_timeout(Some(cfg.timeout))
        .create_timeout(Some(cfg.timeout))
        .recycle_timeout(Some(cfg.timeout))
        .runtime(Runtime::Tokio1)
        .build()
        .map_err(|e| AppError::StartServer(format!("db pool: {e}")))?;

    // Fail fast if the database is unreachable.
    let client = pool.get().await?;
    client.simple_query("SELECT 1").await?;
    tracing::info!(
        max_connections = cfg.max_connections,
        timeout_ms = cfg.timeout.as_millis() as u64,
        "database pool created and verified"
    );

    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> Result<(), AppError> {
    let client = pool.get().await?;
    for (name, sql) in MIGRATIONS {
        client.batch_execute(sql).await?;
        tracing::info!(migration = %name, "migration applied");
    }
    Ok(())
}
