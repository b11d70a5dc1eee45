mod aggregate;
mod config;
mod http_server;
mod logging;
mod remote;
mod store;

use anyhow::Context;
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use crate::{
    config::Config,
    http_server::AppState,
    remote::RemoteApi,
    store::{MemoryStore, PgStore, ReadingStore},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();
    config.validate()?;
    logging::init(&config);

    let remote = config
        .remote_api
        .as_deref()
        .map(|url| RemoteApi::new(url, config.remote_timeout()))
        .transpose()
        .context("building remote sensor api client")?;
    if let Some(remote) = &remote {
        info!(
            base_url = remote.base_url(),
            timeout = ?config.remote_timeout(),
            "readings come from remote sensor api"
        );
    }

    if config.memory_store {
        info!("using in-memory reading store");
        return serve(&config, MemoryStore::new(), remote).await;
    }

    let url = config
        .connection_string
        .as_deref()
        .context("no connection string configured")?;
    let store = PgStore::connect_lazy(url, config.max_connections)
        .context("parsing connection string")?;
    serve(&config, store, remote).await
}

async fn serve<S: ReadingStore>(
    config: &Config,
    store: S,
    remote: Option<RemoteApi>,
) -> anyhow::Result<()> {
    let http_listener = TcpListener::bind(config.listen)
        .await
        .with_context(|| format!("binding {}", config.listen))?;
    info!(addr = %config.listen, "listening");

    let state = AppState::new(store, remote).with_fetch_limit(config.max_concurrent_fetches);
    http_server::start(http_listener, state)
        .await
        .context("http server")
}
