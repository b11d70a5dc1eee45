use std::{collections::BTreeMap, time::Duration};

use chrono::{DateTime, Utc};
use sqlx::{postgres::PgPoolOptions, PgPool};
use tracing::debug;

use super::{Reading, ReadingStore, StoreError};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

/// Postgres-backed store over the `sensores` table:
///
/// ```sql
/// CREATE TABLE sensores (
///     id         BIGSERIAL PRIMARY KEY,
///     sensor_id  INTEGER          NOT NULL,
///     value      DOUBLE PRECISION NOT NULL,
///     created_at TIMESTAMPTZ      NOT NULL DEFAULT now()
/// );
/// ```
///
/// Every operation checks out one pooled connection and holds it only for the
/// duration of the call; the guard hands it back on drop, including when a
/// query fails halfway.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Builds the pool without connecting, so the server can come up while
    /// the database is down and report that through `GET /sensor`.
    pub fn connect_lazy(url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_lazy(url)?;

        Ok(PgStore { pool })
    }
}

impl ReadingStore for PgStore {
    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let (now,): (DateTime<Utc>,) = sqlx::query_as("SELECT now()")
            .fetch_one(&mut *conn)
            .await?;

        Ok(now)
    }

    async fn insert(&self, sensor_id: i32, value: f64) -> Result<Reading, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let reading = sqlx::query_as::<_, Reading>(
            r#"
            INSERT INTO sensores (sensor_id, value)
            VALUES ($1, $2)
            RETURNING id, sensor_id, value, created_at
            "#,
        )
        .bind(sensor_id)
        .bind(value)
        .fetch_one(&mut *conn)
        .await?;

        debug!(id = reading.id, sensor_id, value, "reading inserted");
        Ok(reading)
    }

    async fn latest(&self, sensor_id: i32, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let readings = sqlx::query_as::<_, Reading>(
            r#"
            SELECT id, sensor_id, value, created_at
            FROM sensores
            WHERE sensor_id = $1
            ORDER BY created_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(sensor_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await?;

        Ok(readings)
    }

    async fn latest_per_device(&self) -> Result<BTreeMap<i32, Reading>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        // DISTINCT ON keeps the first row of each sensor_id group, so the
        // ORDER BY tail decides the winner: newest timestamp, then highest id.
        let readings = sqlx::query_as::<_, Reading>(
            r#"
            SELECT DISTINCT ON (sensor_id) id, sensor_id, value, created_at
            FROM sensores
            ORDER BY sensor_id ASC, created_at DESC, id DESC
            "#,
        )
        .fetch_all(&mut *conn)
        .await?;

        Ok(readings
            .into_iter()
            .map(|reading| (reading.sensor_id, reading))
            .collect())
    }

    async fn device_ids(&self) -> Result<Vec<i32>, StoreError> {
        let mut conn = self.pool.acquire().await?;
        let ids: Vec<i32> =
            sqlx::query_scalar("SELECT DISTINCT sensor_id FROM sensores ORDER BY sensor_id")
                .fetch_all(&mut *conn)
                .await?;

        Ok(ids)
    }
}

/// These run against a real server when `DATABASE_URL` is set and pass
/// trivially otherwise. Each test works in its own throwaway schema.
#[cfg(test)]
mod test {
    use std::{
        str::FromStr,
        sync::atomic::{AtomicUsize, Ordering},
    };

    use chrono::TimeZone;
    use sqlx::postgres::PgConnectOptions;

    use super::*;
    use crate::store::HISTORY_LIMIT;

    static SCHEMAS: AtomicUsize = AtomicUsize::new(0);

    fn at(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 12, minute, 0).unwrap()
    }

    async fn scratch_store() -> Option<PgStore> {
        let Ok(url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set, skipping postgres test");
            return None;
        };
        let schema = format!(
            "sensor_test_{}_{}",
            std::process::id(),
            SCHEMAS.fetch_add(1, Ordering::Relaxed)
        );

        let admin = PgPool::connect(&url).await.unwrap();
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {schema} CASCADE"))
            .execute(&admin)
            .await
            .unwrap();
        sqlx::query(&format!("CREATE SCHEMA {schema}"))
            .execute(&admin)
            .await
            .unwrap();
        sqlx::query(&format!(
            "CREATE TABLE {schema}.sensores (
                id         BIGSERIAL PRIMARY KEY,
                sensor_id  INTEGER          NOT NULL,
                value      DOUBLE PRECISION NOT NULL,
                created_at TIMESTAMPTZ      NOT NULL DEFAULT now()
            )"
        ))
        .execute(&admin)
        .await
        .unwrap();
        admin.close().await;

        let options = PgConnectOptions::from_str(&url)
            .unwrap()
            .options([("search_path", schema.as_str())]);
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .unwrap();

        Some(PgStore { pool })
    }

    async fn insert_at(store: &PgStore, sensor_id: i32, value: f64, created_at: DateTime<Utc>) {
        sqlx::query("INSERT INTO sensores (sensor_id, value, created_at) VALUES ($1, $2, $3)")
            .bind(sensor_id)
            .bind(value)
            .bind(created_at)
            .execute(&store.pool)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn insert_returns_stored_row() {
        let Some(store) = scratch_store().await else {
            return;
        };

        let reading = store.insert(7, 21.25).await.unwrap();
        let now = store.now().await.unwrap();

        assert_eq!(reading.sensor_id, 7);
        assert_eq!(reading.value, 21.25);
        assert!(reading.created_at <= now);
        assert_eq!(store.latest(7, 1).await.unwrap(), vec![reading]);
    }

    #[tokio::test]
    async fn latest_is_newest_first_and_limited() {
        let Some(store) = scratch_store().await else {
            return;
        };
        for minute in 0..12 {
            insert_at(&store, 3, f64::from(minute), at(minute)).await;
        }
        insert_at(&store, 4, 99.0, at(30)).await;

        let latest = store.latest(3, HISTORY_LIMIT).await.unwrap();
        let values: Vec<f64> = latest.iter().map(|reading| reading.value).collect();

        assert_eq!(values, (2..12).rev().map(f64::from).collect::<Vec<_>>());
        assert!(store.latest(5, HISTORY_LIMIT).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn equal_timestamps_prefer_highest_id() {
        let Some(store) = scratch_store().await else {
            return;
        };
        insert_at(&store, 1, 10.0, at(5)).await;
        insert_at(&store, 1, 11.0, at(5)).await;
        insert_at(&store, 1, 9.0, at(1)).await;
        insert_at(&store, 2, 20.0, at(2)).await;

        let latest = store.latest(1, 2).await.unwrap();
        assert_eq!(latest[0].value, 11.0);
        assert_eq!(latest[1].value, 10.0);
        assert!(latest[0].id > latest[1].id);

        let per_device = store.latest_per_device().await.unwrap();
        assert_eq!(per_device.keys().copied().collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(per_device[&1].value, 11.0);
        assert_eq!(per_device[&2].value, 20.0);
    }

    #[tokio::test]
    async fn device_ids_are_distinct_and_sorted() {
        let Some(store) = scratch_store().await else {
            return;
        };
        for sensor_id in [9, 2, 9, 5, 2] {
            store.insert(sensor_id, 1.0).await.unwrap();
        }

        assert_eq!(store.device_ids().await.unwrap(), vec![2, 5, 9]);
    }
}
