use std::time::Duration;

use common::SensorView;
use reqwest::{Client, Url};
use thiserror::Error;

use crate::store::StoreError;

/// Why the current reading of one device could not be produced.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("no data for sensor {0}")]
    NotFound(i32),
    #[error("sensor service unreachable")]
    Transport(#[source] reqwest::Error),
    #[error("sensor service sent an unusable response")]
    Malformed(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Why a [`RemoteApi`] could not be built.
#[derive(Debug, Error)]
pub enum RemoteSetupError {
    #[error("remote api url {url:?} is invalid: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("could not build http client")]
    Client(#[from] reqwest::Error),
}

/// Client for another deployment's `GET /sensor/{id}?json=true`.
#[derive(Clone)]
pub struct RemoteApi {
    client: Client,
    base_url: String,
}

impl RemoteApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, RemoteSetupError> {
        let invalid = |reason: String| RemoteSetupError::InvalidUrl {
            url: base_url.to_owned(),
            reason,
        };
        let url = Url::parse(base_url).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme {:?}", url.scheme())));
        }
        if url.query().is_some() || url.fragment().is_some() {
            return Err(invalid("query and fragment are not allowed".to_owned()));
        }

        let client = Client::builder().timeout(timeout).build()?;

        Ok(RemoteApi {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn fetch(&self, id: i32) -> Result<SensorView, FetchError> {
        let response = self
            .client
            .get(format!("{}/sensor/{id}", self.base_url))
            .query(&[("json", "true")])
            .send()
            .await
            .map_err(FetchError::Transport)?;

        let status = response.status();
        if !status.is_success() {
            tracing::debug!(id, %status, "remote sensor api refused");
            return Err(FetchError::NotFound(id));
        }

        let view: SensorView = response.json().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Transport(e)
            } else {
                FetchError::Malformed(e.to_string())
            }
        })?;

        if view.id != id {
            return Err(FetchError::Malformed(format!(
                "asked for sensor {id}, got sensor {}",
                view.id
            )));
        }

        Ok(view)
    }
}
