use std::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use common::models::{Position, Side};

use crate::store::StoreError;

pub struct PositionsRepository;

impl PositionsRepository {
    /// Writes the full row in one statement; sqlite makes it atomic, so no
    /// partial-write state is ever visible.
    pub async fn upsert(pool: &SqlitePool, position: &Position) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
                INSERT INTO positions (
                    instrument, side, entry_price, size, extreme_price,
                    last_reentry_time, order_id, opened_at
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(instrument) DO UPDATE SET
                    side = excluded.side,
                    entry_price = excluded.entry_price,
                    size = excluded.size,
                    extreme_price = excluded.extreme_price,
                    last_reentry_time = excluded.last_reentry_time,
                    order_id = excluded.order_id,
                    opened_at = excluded.opened_at
            "#,
        )
        .bind(&position.instrument)
        .bind(position.side.as_str())
        .bind(position.entry_price.to_string())
        .bind(position.size.to_string())
        .bind(position.extreme_price.to_string())
        .bind(position.last_reentry_time.map(|t| t.to_rfc3339()))
        .bind(&position.order_id)
        .bind(position.opened_at.to_rfc3339())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn delete(pool: &SqlitePool, instrument: &str) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM positions WHERE instrument = ?")
            .bind(instrument)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn load_all(pool: &SqlitePool) -> Result<Vec<Position>, StoreError> {
        let rows = sqlx::query(
            "SELECT instrument, side, entry_price, size, extreme_price, \
             last_reentry_time, order_id, opened_at FROM positions",
        )
        .fetch_all(pool)
        .await?;
        rows.iter().map(row_to_position).collect()
    }
}

fn row_to_position(row: &SqliteRow) -> Result<Position, StoreError> {
    let instrument: String = row.get("instrument");

    let side = match row.get::<String, _>("side").as_str() {
        "Buy" => Side::Buy,
        "Sell" => Side::Sell,
        other => {
            return Err(StoreError::Corrupt {
                instrument,
                reason: format!("unknown side {other}"),
            });
        }
    };

    let entry_price = decimal_field(&instrument, "entry_price", row.get("entry_price"))?;
    let size = decimal_field(&instrument, "size", row.get("size"))?;
    let extreme_price = decimal_field(&instrument, "extreme_price", row.get("extreme_price"))?;
    let last_reentry_time = row
        .get::<Option<String>, _>("last_reentry_time")
        .map(|raw| datetime_field(&instrument, "last_reentry_time", &raw))
        .transpose()?;
    let order_id: String = row.get("order_id");
    let opened_at = datetime_field(&instrument, "opened_at", &row.get::<String, _>("opened_at"))?;

    Ok(Position {
        instrument,
        side,
        entry_price,
        size,
        extreme_price,
        last_reentry_time,
        order_id,
        opened_at,
    })
}

fn decimal_field(instrument: &str, field: &str, raw: String) -> Result<Decimal, StoreError> {
    Decimal::from_str(&raw).map_err(|e| StoreError::Corrupt {
        instrument: instrument.to_string(),
        reason: format!("{field}: {e}"),
    })
}

fn datetime_field(instrument: &str, field: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            instrument: instrument.to_string(),
            reason: format!("{field}: {e}"),
        })
}
