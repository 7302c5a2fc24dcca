use sqlx::SqlitePool;

pub struct UniverseRepository;

impl UniverseRepository {
    /// Replaces the persisted universe wholesale, preserving ranking order.
    pub async fn replace(pool: &SqlitePool, instruments: &[String]) -> Result<(), sqlx::Error> {
        let mut tx = pool.begin().await?;
        sqlx::query("DELETE FROM universe").execute(&mut *tx).await?;
        for (rank, instrument) in instruments.iter().enumerate() {
            sqlx::query("INSERT INTO universe (rank, instrument) VALUES (?, ?)")
                .bind(rank as i64)
                .bind(instrument)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn load(pool: &SqlitePool) -> Result<Vec<String>, sqlx::Error> {
        sqlx::query_scalar::<_, String>("SELECT instrument FROM universe ORDER BY rank")
            .fetch_all(pool)
            .await
    }
}
