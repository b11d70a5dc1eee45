use tracing_subscriber::{
    fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::config::Config;

/// Install the global subscriber: terminal output, plus journald and
/// tokio-console when asked for. Must run inside the tokio runtime.
pub fn init(config: &Config) {
    let console = config.tokio_console.then(|| {
        let (layer, server) = console_subscriber::ConsoleLayer::builder()
            .with_default_env()
            .build();
        tokio::spawn(async move {
            if let Err(e) = server.serve().await {
                tracing::warn!(error = %e, "tokio-console server stopped");
            }
        });
        layer
    });

    let journald = if config.journald {
        match tracing_journald::layer() {
            Ok(layer) => Some(layer.with_filter(filter(&config.log_filter))),
            Err(e) => {
                eprintln!("journald unavailable, logging to stderr only: {e}");
                None
            }
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(console)
        .with(fmt::layer().with_filter(filter(&config.log_filter)))
        .with(journald)
        .init();
}

fn filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}
