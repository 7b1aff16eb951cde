use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use sqlx_migrator::{Info, Migrate, Migrator, Plan};

mod m1_0;
pub mod queue;
pub mod table;

pub fn migrator() -> Result<Migrator<sqlx::Sqlite>, sqlx_migrator::Error> {
    let mut migrator = Migrator::default();
    migrator.add_migrations(vec![Box::new(m1_0::Migration)])?;

    Ok(migrator)
}

/// Applies all pending schema migrations.
pub async fn migrate(pool: &SqlitePool) -> anyhow::Result<()> {
    let migrator = migrator()?;
    let mut conn = pool.acquire().await?;
    migrator.run(&mut *conn, &Plan::apply_all()).await?;

    Ok(())
}

/// WAL mode enables concurrent reads while a writer is active; busy_timeout
/// absorbs short lock contention from parallel listeners.
async fn configure_pragmas(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = true")
        .execute(pool)
        .await?;

    Ok(())
}

pub async fn create_pool(database_url: &str, max_connections: u32) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    configure_pragmas(&pool).await?;

    Ok(pool)
}
