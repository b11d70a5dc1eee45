mod error;
mod params;
mod render;

use std::sync::Arc;

use axum::{
    extract::{rejection::PathRejection, Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use common::{InsertAck, SensorView};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use crate::{
    aggregate::{Aggregator, DeviceSelector, InvalidSelector},
    remote::{FetchError, RemoteApi},
    store::{ReadingStore, HISTORY_LIMIT},
};
use error::ApiError;
use params::{QueryParams, RawPairs};
use render::Panel;

pub struct AppState<S> {
    store: S,
    aggregator: Aggregator<S>,
}

impl<S: ReadingStore> AppState<S> {
    pub fn new(store: S, remote: Option<RemoteApi>) -> Self {
        AppState {
            aggregator: Aggregator::new(store.clone(), remote),
            store,
        }
    }

    pub fn with_fetch_limit(mut self, limit: usize) -> Self {
        self.aggregator = self.aggregator.with_fetch_limit(limit);
        self
    }
}

fn create_router<S: ReadingStore>(state: AppState<S>) -> Router {
    Router::new()
        .route("/", get(|| async { "Hello, World!" }))
        .route("/about", get(|| async { "About" }))
        .route("/sensor", get(probe::<S>))
        .route("/sensor/all", get(all_sensors::<S>))
        .route("/sensor/{id}", get(sensor::<S>).post(insert_reading::<S>))
        .route("/dashboard", get(dashboard::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(state))
}

pub async fn start<S: ReadingStore>(
    tcp_listener: TcpListener,
    state: AppState<S>,
) -> std::io::Result<()> {
    let app = create_router(state);
    axum::serve(tcp_listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

/// JSON is chosen by a truthy `json` query flag or an `Accept` header that
/// names `application/json`; everything else gets HTML.
fn wants_json(flag: Option<&str>, headers: &HeaderMap) -> bool {
    if let Some(flag) = flag {
        return ["true", "1", "yes"]
            .iter()
            .any(|truthy| flag.trim().eq_ignore_ascii_case(truthy));
    }
    headers
        .get(header::ACCEPT)
        .and_then(|accept| accept.to_str().ok())
        .is_some_and(|accept| accept.contains("application/json"))
}

type RawId = Result<Path<String>, PathRejection>;

fn parse_id(raw: &str) -> Result<i32, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Validation(format!("sensor id must be an integer, got {raw:?}")))
}

fn path_id(path: RawId) -> Result<i32, ApiError> {
    let Path(raw) = path.map_err(|rejection| {
        debug!(%rejection, "unreadable sensor id");
        ApiError::Validation("sensor id must be an integer".to_owned())
    })?;
    parse_id(&raw)
}

fn parse_value(raw: Option<&str>) -> Result<f64, ApiError> {
    let Some(raw) = raw else {
        return Err(ApiError::Validation(
            "Missing 'value' query parameter".to_owned(),
        ));
    };
    match raw.trim().parse::<f64>() {
        Ok(value) if value.is_finite() => Ok(value),
        _ => Err(ApiError::Validation(format!(
            "'value' must be a finite number, got {raw:?}"
        ))),
    }
}

fn bad_request_page(message: &str) -> (StatusCode, Html<String>) {
    (StatusCode::BAD_REQUEST, Html(render::error_page(message)))
}

async fn probe<S: ReadingStore>(State(state): State<Arc<AppState<S>>>) -> String {
    match state.store.now().await {
        Ok(now) => format!("Database time: {now}"),
        Err(e) => {
            error!(error = ?e, "connectivity probe failed");
            format!("Failed to connect: {e}")
        }
    }
}

async fn insert_reading<S: ReadingStore>(
    State(state): State<Arc<AppState<S>>>,
    path: RawId,
    query: RawPairs,
) -> Result<(StatusCode, Json<InsertAck>), ApiError> {
    let sensor_id = path_id(path)?;
    let params = QueryParams::extract(query)?;
    let value = parse_value(params.one("value")?)?;

    let reading = state.store.insert(sensor_id, value).await?;
    info!(id = reading.id, sensor_id, value, "reading stored");

    Ok((
        StatusCode::CREATED,
        Json(InsertAck::new(reading.sensor_id, reading.value)),
    ))
}

async fn sensor<S: ReadingStore>(
    State(state): State<Arc<AppState<S>>>,
    path: RawId,
    query: RawPairs,
    headers: HeaderMap,
) -> Response {
    let params = match QueryParams::extract(query) {
        Ok(params) => params,
        Err(e) if wants_json(None, &headers) => return ApiError::from(e).into_response(),
        Err(e) => return bad_request_page(&format!("Invalid request: {e}.")).into_response(),
    };

    if wants_json(params.first("json"), &headers) {
        latest_json(&state, path).await.into_response()
    } else {
        history_html(&state, path).await.into_response()
    }
}

async fn latest_json<S: ReadingStore>(
    state: &AppState<S>,
    path: RawId,
) -> Result<Json<SensorView>, ApiError> {
    let sensor_id = path_id(path)?;
    state
        .store
        .latest(sensor_id, 1)
        .await?
        .first()
        .map(|reading| Json(reading.view()))
        .ok_or_else(|| ApiError::NotFound(format!("no readings for sensor {sensor_id}")))
}

async fn history_html<S: ReadingStore>(
    state: &AppState<S>,
    path: RawId,
) -> (StatusCode, Html<String>) {
    let Ok(sensor_id) = path_id(path) else {
        return bad_request_page("Sensor id must be an integer.");
    };

    match state.store.latest(sensor_id, HISTORY_LIMIT).await {
        Ok(readings) => (
            StatusCode::OK,
            Html(render::sensor_history(sensor_id, readings)),
        ),
        Err(e) => {
            error!(error = ?e, sensor_id, "could not load sensor history");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Html(render::error_page(&format!(
                    "Could not load readings: {e}."
                ))),
            )
        }
    }
}

async fn all_sensors<S: ReadingStore>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<Json<Vec<SensorView>>, ApiError> {
    let latest = state.store.latest_per_device().await?;

    Ok(Json(latest.values().map(|reading| reading.view()).collect()))
}

/// A device selection that could not be understood, as shown to the user.
type Selection = Result<DeviceSelector, String>;

async fn dashboard<S: ReadingStore>(
    State(state): State<Arc<AppState<S>>>,
    query: RawPairs,
    headers: HeaderMap,
) -> Response {
    let params = QueryParams::extract(query);
    let json = wants_json(
        params.as_ref().ok().and_then(|params| params.first("json")),
        &headers,
    );

    let device_id = params.and_then(|params| {
        params
            .one("device_id")
            .map(|id| id.map(str::to_owned))
    });
    let selected = match &device_id {
        Ok(Some(id)) => id.clone(),
        Ok(None) => "all".to_owned(),
        Err(_) => String::new(),
    };
    let selection: Selection = device_id
        .map_err(|e| e.to_string())
        .and_then(|id| match id {
            None => Ok(DeviceSelector::All),
            Some(raw) => raw.parse().map_err(|e: InvalidSelector| e.to_string()),
        });

    if json {
        return dashboard_json(&state, selection).await.into_response();
    }

    let panel = dashboard_panel(&state, selection).await;
    Html(render::dashboard(&selected, &panel)).into_response()
}

async fn dashboard_json<S: ReadingStore>(
    state: &AppState<S>,
    selection: Selection,
) -> Result<Response, ApiError> {
    match selection.map_err(ApiError::Validation)? {
        DeviceSelector::One(id) => Ok(Json(state.aggregator.fetch(id).await?).into_response()),
        DeviceSelector::All => {
            let views = state.aggregator.all().await?;
            if views.is_empty() {
                return Err(ApiError::NotFound("no sensor data available".to_owned()));
            }
            Ok(Json(views).into_response())
        }
    }
}

/// Never fails: every problem becomes a banner on an otherwise normal page.
async fn dashboard_panel<S: ReadingStore>(state: &AppState<S>, selection: Selection) -> Panel {
    match selection {
        Err(e) => Panel::Banner(format!("Invalid device selection: {e}.")),
        Ok(DeviceSelector::One(id)) => match state.aggregator.fetch(id).await {
            Ok(view) => Panel::Views(vec![view]),
            Err(e) => Panel::Banner(fetch_banner(id, &e)),
        },
        Ok(DeviceSelector::All) => match state.aggregator.all().await {
            Ok(views) if views.is_empty() => {
                Panel::Banner("No sensor data available yet.".to_owned())
            }
            Ok(views) => Panel::Views(views),
            Err(e) => {
                error!(error = ?e, "could not list sensors");
                Panel::Banner("The sensor database is unavailable. Try again later.".to_owned())
            }
        },
    }
}

fn fetch_banner(id: i32, e: &FetchError) -> String {
    match e {
        FetchError::NotFound(_) | FetchError::Malformed(_) => {
            format!("No data found for sensor {id}.")
        }
        FetchError::Transport(source) => {
            error!(error = ?source, id, "remote sensor api failure");
            "The sensor service is unreachable. Try again later.".to_owned()
        }
        FetchError::Store(source) => {
            error!(error = ?source, id, "store failure");
            "The sensor database is unavailable. Try again later.".to_owned()
        }
    }
}
