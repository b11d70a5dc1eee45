use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{Reading, ReadingStore, StoreError};

/// Volatile store for development runs (`--memory-store`) and tests.
///
/// Follows the same ordering rules as [`super::PgStore`]; ids are assigned
/// from a counter starting at 1.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

#[derive(Default)]
struct Inner {
    rows: Vec<Reading>,
    next_id: i64,
}

impl Inner {
    fn push(&mut self, sensor_id: i32, value: f64, created_at: DateTime<Utc>) -> Reading {
        self.next_id += 1;
        let reading = Reading {
            id: self.next_id,
            sensor_id,
            value,
            created_at,
        };
        self.rows.push(reading.clone());
        reading
    }
}

fn newest_first(a: &Reading, b: &Reading) -> std::cmp::Ordering {
    (b.created_at, b.id).cmp(&(a.created_at, a.id))
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert with an explicit timestamp, for seeding history.
    #[cfg(test)]
    pub async fn insert_at(&self, sensor_id: i32, value: f64, created_at: DateTime<Utc>) -> Reading {
        self.inner.write().await.push(sensor_id, value, created_at)
    }
}

impl ReadingStore for MemoryStore {
    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        Ok(Utc::now())
    }

    async fn insert(&self, sensor_id: i32, value: f64) -> Result<Reading, StoreError> {
        Ok(self.inner.write().await.push(sensor_id, value, Utc::now()))
    }

    async fn latest(&self, sensor_id: i32, limit: i64) -> Result<Vec<Reading>, StoreError> {
        let inner = self.inner.read().await;
        let mut readings: Vec<Reading> = inner
            .rows
            .iter()
            .filter(|reading| reading.sensor_id == sensor_id)
            .cloned()
            .collect();
        readings.sort_by(newest_first);
        readings.truncate(usize::try_from(limit).unwrap_or(0));

        Ok(readings)
    }

    async fn latest_per_device(&self) -> Result<BTreeMap<i32, Reading>, StoreError> {
        let inner = self.inner.read().await;
        let mut latest: BTreeMap<i32, Reading> = BTreeMap::new();
        for reading in &inner.rows {
            match latest.get(&reading.sensor_id) {
                Some(current) if newest_first(reading, current).is_ge() => {}
                _ => {
                    latest.insert(reading.sensor_id, reading.clone());
                }
            }
        }

        Ok(latest)
    }

    async fn device_ids(&self) -> Result<Vec<i32>, StoreError> {
        let inner = self.inner.read().await;
        let ids: BTreeSet<i32> = inner.rows.iter().map(|reading| reading.sensor_id).collect();

        Ok(ids.into_iter().collect())
    }
}
