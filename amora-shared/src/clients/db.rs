use std::time::Duration;

use diesel::pg::PgConnection;
use diesel::r2d2::{ConnectionManager, Pool};

pub type DbPool = Pool<ConnectionManager<PgConnection>>;

/// Pool sizing. Every store call holds one connection for the length of a
/// single transaction.
#[derive(Debug, Clone, Copy)]
pub struct PoolSettings {
    pub max_size: u32,
    pub min_idle: u32,
    pub connection_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_size: 10,
            min_idle: 2,
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Builds the pool without waiting for a first connection; the health
/// check reports an unreachable database.
pub fn create_pool(database_url: &str, settings: PoolSettings) -> DbPool {
    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(settings.max_size)
        .min_idle(Some(settings.min_idle.min(settings.max_size)))
        .connection_timeout(settings.connection_timeout)
        .test_on_check_out(true)
        .build_unchecked(manager);

    tracing::info!(
        max_size = settings.max_size,
        timeout_ms = settings.connection_timeout.as_millis() as u64,
        "database connection pool created"
    );
    pool
}
