//! Startup orchestration.
//!
//! # Responsibilities
//! - Install the metrics exporter when enabled
//! - Bind both listeners before serving anything
//! - Run the stream relay and data hub side by side

use std::future::Future;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

use crate::config::RelayConfig;
use crate::hub::DataServer;
use crate::lifecycle::shutdown::Shutdown;
use crate::net::{self, ListenerError};
use crate::observability::metrics;
use crate::stream::StreamServer;

/// Errors that abort startup.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
    #[error("Failed to build upstream client: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("Failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid metrics address: {0}")]
    MetricsAddress(#[from] std::net::AddrParseError),
}

/// Handle to both running endpoints.
pub struct Running {
    pub stream_addr: SocketAddr,
    pub data_addr: SocketAddr,
    shutdown: Shutdown,
    stream: ServerTask,
    data: ServerTask,
}

type ServerTask = JoinHandle<Result<(), std::io::Error>>;

impl Running {
    /// Serve until `signal` resolves or either endpoint exits, then stop both.
    pub async fn serve_until<F>(self, signal: F) -> Result<(), std::io::Error>
    where
        F: Future<Output = ()>,
    {
        let Running {
            shutdown,
            mut stream,
            mut data,
            ..
        } = self;

        let (stream_done, data_done) = tokio::select! {
            _ = signal => (None, None),
            result = &mut stream => {
                tracing::error!(?result, "Stream relay exited");
                (Some(result), None)
            }
            result = &mut data => {
                tracing::error!(?result, "Data hub exited");
                (None, Some(result))
            }
        };

        shutdown.trigger();
        let stream_result = match stream_done {
            Some(result) => result,
            None => stream.await,
        };
        let data_result = match data_done {
            Some(result) => result,
            None => data.await,
        };
        flatten(stream_result)?;
        flatten(data_result)
    }

    /// Trigger shutdown and wait for both endpoints to finish.
    pub async fn stop(self) -> Result<(), std::io::Error> {
        self.shutdown.trigger();
        flatten(self.stream.await)?;
        flatten(self.data.await)
    }
}

fn flatten(
    result: Result<Result<(), std::io::Error>, tokio::task::JoinError>,
) -> Result<(), std::io::Error> {
    match result {
        Ok(result) => result,
        Err(e) if e.is_cancelled() => Ok(()),
        Err(e) => Err(std::io::Error::other(e)),
    }
}

/// Bind and start both endpoints. The config is expected to be validated.
pub async fn start(config: RelayConfig) -> Result<Running, StartupError> {
    if config.observability.metrics_enabled {
        metrics::init_metrics(config.observability.metrics_address.parse()?)?;
    }

    let stream_server = StreamServer::new(&config.stream)?;
    let data_server = DataServer::new(&config.data);

    let stream_listener = net::bind("stream", &config.stream.bind_address).await?;
    let data_listener = net::bind("data", &config.data.bind_address).await?;
    let stream_addr = stream_listener.local_addr()?;
    let data_addr = data_listener.local_addr()?;

    let shutdown = Shutdown::new();
    let stream = tokio::spawn(stream_server.run(stream_listener, shutdown.subscribe()));
    let data = tokio::spawn(data_server.run(data_listener, shutdown.subscribe()));

    tracing::info!(
        stream = %stream_addr,
        data = %data_addr,
        "Camera relay running"
    );

    Ok(Running {
        stream_addr,
        data_addr,
        shutdown,
        stream,
        data,
    })
}
