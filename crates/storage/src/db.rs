use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{self, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

/// Opens (or creates) the engine database under `data_folder` and applies
/// the schema. WAL keeps supervisor writes from blocking decision-loop reads.
pub async fn open_pool(data_folder: &str) -> Result<SqlitePool, sqlx::Error> {
    std::fs::create_dir_all(data_folder)?;
    let db_filename = format!("{}/engine.db", data_folder);
    let options = connect_options(&format!("sqlite:{}", db_filename))?;
    let pool = SqlitePool::connect_with(options).await?;
    apply_schema(&pool).await?;
    info!("engine database ready at {}", db_filename);
    Ok(pool)
}

/// In-memory database with the same schema, for tests. A single connection
/// is mandatory: every sqlite `:memory:` connection is its own database.
pub async fn open_in_memory() -> Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;
    apply_schema(&pool).await?;
    Ok(pool)
}

fn connect_options(url: &str) -> Result<SqliteConnectOptions, sqlx::Error> {
    Ok(SqliteConnectOptions::from_str(url)?
        .create_if_missing(true)
        .journal_mode(sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlite::SqliteSynchronous::Normal)
        .busy_timeout(Duration::from_secs(30)))
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let schema = include_str!("../../../sql/schema.sql");
    sqlx::raw_sql(schema).execute(pool).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_applies_and_tables_exist() {
        let pool = open_in_memory().await.unwrap();
        let count: i64 = sqlx::query_scalar(
            "SELECT count(*) FROM sqlite_master WHERE type = 'table' AND name IN ('positions', 'universe')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!(count, 2);
    }
}
