use std::collections::HashMap;

use sqlx::SqlitePool;
use thiserror::Error;
use tokio::sync::RwLock;

use common::models::Position;

use crate::repositories::{PositionsRepository, UniverseRepository};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error("stored row is corrupt for {instrument}: {reason}")]
    Corrupt { instrument: String, reason: String },
}

/// Durable record of every live position, fronted by an in-memory map.
///
/// The durable write commits before the cached copy changes, so a crash can
/// only lose an update that was never acknowledged to its caller. Readers
/// (the decision loop) see the cache; writers are the decision pipeline on
/// open and each position's own supervisor afterwards.
pub struct PositionStore {
    pool: SqlitePool,
    cache: RwLock<HashMap<String, Position>>,
}

impl PositionStore {
    /// Loads every persisted position. Called once at boot, before any
    /// supervisor or decision tick runs.
    pub async fn load(pool: SqlitePool) -> Result<Self, StoreError> {
        let rows = PositionsRepository::load_all(&pool).await?;
        let cache = rows
            .into_iter()
            .map(|p| (p.instrument.clone(), p))
            .collect();
        Ok(Self {
            pool,
            cache: RwLock::new(cache),
        })
    }

    pub async fn contains(&self, instrument: &str) -> bool {
        self.cache.read().await.contains_key(instrument)
    }

    pub async fn get(&self, instrument: &str) -> Option<Position> {
        self.cache.read().await.get(instrument).cloned()
    }

    /// All live positions, ordered by instrument for stable reporting.
    pub async fn snapshot(&self) -> Vec<Position> {
        let mut all: Vec<Position> = self.cache.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        all
    }

    pub async fn len(&self) -> usize {
        self.cache.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.cache.read().await.is_empty()
    }

    /// Inserts or replaces one position: durable first, cache second.
    pub async fn upsert(&self, position: Position) -> Result<(), StoreError> {
        PositionsRepository::upsert(&self.pool, &position).await?;
        self.cache
            .write()
            .await
            .insert(position.instrument.clone(), position);
        Ok(())
    }

    pub async fn remove(&self, instrument: &str) -> Result<(), StoreError> {
        PositionsRepository::delete(&self.pool, instrument).await?;
        self.cache.write().await.remove(instrument);
        Ok(())
    }
}

/// Persisted instrument ranking; survives restarts so the first decision
/// tick after boot has a universe before the first refresh completes.
pub struct UniverseStore {
    pool: SqlitePool,
}

impl UniverseStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn load(&self) -> Result<Vec<String>, StoreError> {
        Ok(UniverseRepository::load(&self.pool).await?)
    }

    pub async fn replace(&self, instruments: &[String]) -> Result<(), StoreError> {
        Ok(UniverseRepository::replace(&self.pool, instruments).await?)
    }
}
