use std::{fmt, str::FromStr, sync::Arc};

use common::SensorView;
use thiserror::Error;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::warn;

use crate::{
    remote::{FetchError, RemoteApi},
    store::{ReadingStore, StoreError},
};

/// Which devices a dashboard request is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceSelector {
    One(i32),
    All,
}

#[derive(Debug, Error, PartialEq)]
#[error("device id must be an integer or \"all\", got {0:?}")]
pub struct InvalidSelector(pub String);

impl FromStr for DeviceSelector {
    type Err = InvalidSelector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(DeviceSelector::All);
        }
        s.parse()
            .map(DeviceSelector::One)
            .map_err(|_| InvalidSelector(s.to_owned()))
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSelector::One(id) => write!(f, "{id}"),
            DeviceSelector::All => f.write_str("all"),
        }
    }
}

/// Fetches allowed in flight at once by default; one less than the default
/// store pool so other requests still get a connection.
pub const DEFAULT_FETCH_LIMIT: usize = 4;

/// Builds sensor views for one device or for every device the store knows.
///
/// The device universe always comes from the store. Current readings come
/// from the remote API when one is configured, otherwise from the store.
#[derive(Clone)]
pub struct Aggregator<S> {
    store: S,
    remote: Option<RemoteApi>,
    in_flight: Arc<Semaphore>,
}

impl<S: ReadingStore> Aggregator<S> {
    pub fn new(store: S, remote: Option<RemoteApi>) -> Self {
        Aggregator {
            store,
            remote,
            in_flight: Arc::new(Semaphore::new(DEFAULT_FETCH_LIMIT)),
        }
    }

    /// Caps how many device fetches `all` runs at the same time.
    pub fn with_fetch_limit(mut self, limit: usize) -> Self {
        self.in_flight = Arc::new(Semaphore::new(limit.max(1)));
        self
    }

    pub async fn fetch(&self, id: i32) -> Result<SensorView, FetchError> {
        match &self.remote {
            Some(remote) => remote.fetch(id).await,
            None => self
                .store
                .latest(id, 1)
                .await?
                .first()
                .map(|reading| reading.view())
                .ok_or(FetchError::NotFound(id)),
        }
    }

    /// Current view of every known device, ascending by id. At most the
    /// fetch limit runs at once. Devices whose fetch fails are logged and
    /// left out; only failing to list the devices is an error.
    pub async fn all(&self) -> Result<Vec<SensorView>, StoreError> {
        let ids = self.store.device_ids().await?;

        let mut fetches = JoinSet::new();
        for id in ids {
            let this = self.clone();
            fetches.spawn(async move {
                // never closed, so acquiring only waits
                let _permit = this.in_flight.acquire().await;
                (id, this.fetch(id).await)
            });
        }

        let mut views = Vec::with_capacity(fetches.len());
        while let Some(joined) = fetches.join_next().await {
            match joined {
                Ok((_, Ok(view))) => views.push(view),
                Ok((id, Err(e))) => warn!(id, error = %e, "skipping sensor"),
                Err(e) => warn!(error = %e, "sensor fetch task failed"),
            }
        }
        views.sort_by_key(|view| view.id);

        Ok(views)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::store::{MemoryStore, UnreachableStore};
    use axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        routing::get,
        Json, Router,
    };
    use chrono::Utc;
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };
    use tokio::net::TcpListener;

    /// Remote API where higher ids answer sooner, and sensor 2 never in time.
    async fn spawn_remote() -> String {
        async fn sensor(Path(id): Path<i32>) -> axum::response::Response {
            match id {
                2 => {
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    StatusCode::GATEWAY_TIMEOUT.into_response()
                }
                1..=6 => {
                    tokio::time::sleep(Duration::from_millis(60 * (6 - id) as u64)).await;
                    Json(SensorView::new(id, id as f64 * 10.0, Utc::now())).into_response()
                }
                _ => StatusCode::NOT_FOUND.into_response(),
            }
        }

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().route("/sensor/{id}", get(sensor));
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        format!("http://{addr}")
    }

    async fn store_with(ids: &[i32]) -> MemoryStore {
        let store = MemoryStore::new();
        for &id in ids {
            store.insert(id, 1.0).await.unwrap();
        }
        store
    }

    #[test]
    fn parse_selector() {
        assert_eq!("all".parse(), Ok(DeviceSelector::All));
        assert_eq!(" ALL ".parse(), Ok(DeviceSelector::All));
        assert_eq!("12".parse(), Ok(DeviceSelector::One(12)));
        assert_eq!(
            "twelve".parse::<DeviceSelector>(),
            Err(InvalidSelector("twelve".to_owned()))
        );
    }

    #[tokio::test]
    async fn local_fetch_uses_newest_reading() {
        let store = MemoryStore::new();
        store.insert(1, 22.5).await.unwrap();
        store.insert(1, 23.0).await.unwrap();
        let aggregator = Aggregator::new(store, None);

        assert_eq!(aggregator.fetch(1).await.unwrap().value, 23.0);
    }

    #[tokio::test]
    async fn missing_device_is_not_found_not_store_error() {
        let aggregator = Aggregator::new(store_with(&[1]).await, None);

        assert!(matches!(aggregator.fetch(77).await, Err(FetchError::NotFound(77))));
    }

    #[tokio::test]
    async fn store_failure_is_store_error() {
        let aggregator = Aggregator::new(UnreachableStore, None);

        assert!(matches!(aggregator.fetch(1).await, Err(FetchError::Store(_))));
        assert!(aggregator.all().await.is_err());
    }

    #[tokio::test]
    async fn all_skips_failures_and_orders_by_id() {
        let remote = RemoteApi::new(&spawn_remote().await, Duration::from_millis(1000)).unwrap();
        let aggregator = Aggregator::new(store_with(&[5, 1, 3, 2, 9]).await, Some(remote));

        let views = aggregator.all().await.unwrap();

        let ids: Vec<i32> = views.iter().map(|view| view.id).collect();
        assert_eq!(ids, [1, 3, 5]);
        assert_eq!(views[1].value, 30.0);
    }

    #[tokio::test]
    async fn all_caps_fetches_in_flight() {
        #[derive(Clone, Default)]
        struct Gauge {
            current: Arc<AtomicUsize>,
            peak: Arc<AtomicUsize>,
        }

        async fn counted(State(gauge): State<Gauge>, Path(id): Path<i32>) -> Json<SensorView> {
            let now = gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            gauge.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            gauge.current.fetch_sub(1, Ordering::SeqCst);
            Json(SensorView::new(id, 1.0, Utc::now()))
        }

        let gauge = Gauge::default();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new()
            .route("/sensor/{id}", get(counted))
            .with_state(gauge.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let ids: Vec<i32> = (1..=12).collect();
        let remote = RemoteApi::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        let aggregator =
            Aggregator::new(store_with(&ids).await, Some(remote)).with_fetch_limit(3);

        let views = aggregator.all().await.unwrap();

        assert_eq!(views.len(), 12);
        let peak = gauge.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "{peak} fetches ran at once");
        assert!(peak >= 1);
    }

    #[tokio::test]
    async fn all_with_no_devices_is_empty() {
        let aggregator = Aggregator::new(MemoryStore::new(), None);

        assert!(aggregator.all().await.unwrap().is_empty());
    }
}
