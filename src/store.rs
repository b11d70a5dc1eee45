//! Reading store: the append-only table of sensor readings.
//!
//! Handlers and the aggregator only see the [`ReadingStore`] trait, so the
//! service can run on Postgres ([`PgStore`]) or fully in memory
//! ([`MemoryStore`]).

mod memory;
mod postgres;

use std::{collections::BTreeMap, future::Future};

use chrono::{DateTime, Utc};
use common::SensorView;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Number of rows shown on a sensor's history page.
pub const HISTORY_LIMIT: i64 = 10;

/// One stored measurement. Never mutated after insertion.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Reading {
    pub id: i64,
    pub sensor_id: i32,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}

impl Reading {
    pub fn view(&self) -> SensorView {
        SensorView::new(self.sensor_id, self.value, self.created_at)
    }
}

/// The display string is deliberately vague; the source carries the detail
/// for the logs.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database unavailable")]
    Unavailable(#[source] sqlx::Error),
    #[error("database query failed")]
    Query(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
            | sqlx::Error::Configuration(_) => StoreError::Unavailable(e),
            _ => StoreError::Query(e),
        }
    }
}

/// Ordering contract shared by all implementations: "newest" means greatest
/// `created_at`, and among equal timestamps the greatest `id`.
pub trait ReadingStore: Clone + Send + Sync + 'static {
    /// Current time according to the store, used as a connectivity probe.
    fn now(&self) -> impl Future<Output = Result<DateTime<Utc>, StoreError>> + Send;

    fn insert(
        &self,
        sensor_id: i32,
        value: f64,
    ) -> impl Future<Output = Result<Reading, StoreError>> + Send;

    /// Up to `limit` readings for one sensor, newest first. Unknown sensors
    /// yield an empty list.
    fn latest(
        &self,
        sensor_id: i32,
        limit: i64,
    ) -> impl Future<Output = Result<Vec<Reading>, StoreError>> + Send;

    /// The newest reading of every sensor that has at least one.
    fn latest_per_device(
        &self,
    ) -> impl Future<Output = Result<BTreeMap<i32, Reading>, StoreError>> + Send;

    /// Distinct sensor ids, ascending.
    fn device_ids(&self) -> impl Future<Output = Result<Vec<i32>, StoreError>> + Send;
}

/// A store whose database is always down.
#[cfg(test)]
#[derive(Clone)]
pub struct UnreachableStore;

#[cfg(test)]
impl ReadingStore for UnreachableStore {
    async fn now(&self) -> Result<DateTime<Utc>, StoreError> {
        Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
    }

    async fn insert(&self, _sensor_id: i32, _value: f64) -> Result<Reading, StoreError> {
        Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
    }

    async fn latest(&self, _sensor_id: i32, _limit: i64) -> Result<Vec<Reading>, StoreError> {
        Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
    }

    async fn latest_per_device(&self) -> Result<BTreeMap<i32, Reading>, StoreError> {
        Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
    }

    async fn device_ids(&self) -> Result<Vec<i32>, StoreError> {
        Err(StoreError::Unavailable(sqlx::Error::PoolTimedOut))
    }
}
