use crate::config::get_config;
use crate::error::Result;
use sqlx::{postgres::PgPoolOptions, PgPool};

/// Lazy pool so the process can start without a reachable database;
/// connectivity is surfaced through the test_connections endpoint.
pub fn create_pool() -> Result<PgPool> {
    let config = get_config();
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(std::time::Duration::from_secs(30))
        .connect_lazy(&config.database_url)?;
    Ok(pool)
}
