use crate::error::{AppError, AppResult};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

const MIGRATION: &str = include_str!("../migrations/0001_messaging.sql");

/// Build a deadpool-postgres pool and apply the schema.
pub async fn init_pool(database_url: &str, max_connections: usize) -> AppResult<Pool> {
    let pg_config: tokio_postgres::Config = database_url
        .parse()
        .map_err(|e| AppError::Config(format!("DATABASE_URL: {e}")))?;

    let mgr = Manager::from_config(
        pg_config,
        NoTls,
        ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        },
    );
    let pool = Pool::builder(mgr)
        .max_size(max_connections)
        .build()
        .map_err(|e| AppError::StartServer(format!("db pool: {e}")))?;

    run_migrations(&pool).await?;
    tracing::info!(max_connections, "database pool ready");
    Ok(pool)
}

pub async fn run_migrations(pool: &Pool) -> AppResult<()> {
    let client = pool.get().await?;
    client.batch_execute(MIGRATION).await?;
    Ok(())
}
