//! Upstream camera fetches.
//!
//! # Responsibilities
//! - Open one HTTP GET to the MJPEG source per subscribing client
//! - Enforce connect and read timeouts
//! - Decode the response body into frames
//! - Report connect/read failures to the owning client
//!
//! # Design Decisions
//! - Each fetch runs in its own task; the handle aborts it on drop, so the
//!   upstream socket can never outlive the client that owns the handle
//! - Connection pooling is disabled: a cancelled fetch closes its socket
//! - Frames are handed over through a single latest-frame slot. The fetch never
//!   waits for the client; a frame the client has not taken yet is replaced by
//!   the next one, so a slow socket sees fresh frames instead of a backlog

use futures_util::StreamExt;
use reqwest::StatusCode;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{oneshot, Notify};
use tokio::task::JoinHandle;

use crate::config::StreamConfig;
use crate::mjpeg::{Frame, MjpegDecoder};
use crate::net::ConnectionId;
use crate::observability::metrics;

/// Failure of an upstream fetch.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// DNS, connect, timeout or request failure before the body started.
    #[error("{0}")]
    Connect(String),
    /// The camera answered with a non-success status.
    #[error("upstream responded with status {0}")]
    Status(StatusCode),
    /// The body stream failed mid-way.
    #[error("{0}")]
    Read(String),
}

impl UpstreamError {
    fn connect(err: reqwest::Error) -> Self {
        UpstreamError::Connect(describe(&err))
    }

    fn read(err: reqwest::Error) -> Self {
        UpstreamError::Read(describe(&err))
    }

    /// Short label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            UpstreamError::Connect(_) => "connect",
            UpstreamError::Status(_) => "status",
            UpstreamError::Read(_) => "read",
        }
    }

    /// JSON notification sent to the affected client.
    pub fn client_notice(&self) -> String {
        serde_json::json!({
            "error": true,
            "message": format!("Error camera: {}", self),
        })
        .to_string()
    }
}

/// Flatten an error and its sources into one line.
fn describe(err: &(dyn std::error::Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !message.contains(&cause_text) {
            message.push_str(": ");
            message.push_str(&cause_text);
        }
        source = cause.source();
    }
    message
}

/// Output of an upstream fetch, in stream order.
#[derive(Debug)]
pub enum UpstreamEvent {
    Frame(Frame),
    /// The fetch failed and has terminated. Always the last event.
    Failed(UpstreamError),
}

/// Shared HTTP client for camera fetches.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
    url: String,
    max_frame_bytes: usize,
}

impl UpstreamClient {
    pub fn new(config: &StreamConfig) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .pool_max_idle_per_host(0)
            .build()?;

        Ok(Self {
            http,
            url: config.upstream_url.clone(),
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Start a fetch owned by the connection `owner`.
    pub fn spawn(&self, owner: ConnectionId) -> UpstreamFetch {
        let (tx, rx) = handoff();
        let client = self.clone();
        let task = tokio::spawn(async move {
            let outcome = client.pump(owner, &tx).await;
            if let Err(err) = outcome {
                tracing::warn!(
                    connection_id = %owner,
                    kind = err.kind(),
                    error = %err,
                    "Error camera"
                );
                metrics::upstream_error(err.kind());
                tx.fail(err);
            }
        });

        UpstreamFetch::new(owner, task, rx)
    }

    async fn pump(
        &self,
        owner: ConnectionId,
        tx: &FrameSender,
    ) -> Result<(), UpstreamError> {
        tracing::debug!(connection_id = %owner, url = %self.url, "Opening upstream fetch");

        let response = self
            .http
            .get(&self.url)
            .send()
            .await
            .map_err(UpstreamError::connect)?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Status(status));
        }

        tracing::debug!(
            connection_id = %owner,
            content_type = ?response.headers().get(reqwest::header::CONTENT_TYPE),
            "Upstream connected"
        );

        let mut body = response.bytes_stream();
        let mut decoder = MjpegDecoder::new(self.max_frame_bytes);

        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(UpstreamError::read)?;
            decoder.extend(&chunk);

            loop {
                match decoder.next_frame() {
                    Ok(Some(frame)) => {
                        if !tx.send(frame) {
                            // Owner is gone.
                            return Ok(());
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(connection_id = %owner, error = %err, "Skipping malformed frame");
                        metrics::frame_dropped("decode");
                    }
                }
            }
        }

        tracing::info!(
            connection_id = %owner,
            frames = decoder.frames_decoded(),
            "Upstream stream ended"
        );
        Ok(())
    }
}

/// Latest decoded frame not yet taken by the client.
#[derive(Debug, Default)]
struct FrameSlot {
    latest: Mutex<Option<Frame>>,
    ready: Notify,
}

impl FrameSlot {
    /// Store `frame`, returning the untaken frame it replaced.
    fn put(&self, frame: Frame) -> Option<Frame> {
        let replaced = self
            .latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(frame);
        self.ready.notify_one();
        replaced
    }

    fn take(&self) -> Option<Frame> {
        self.latest
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Build the two halves connecting a fetch task to its client.
pub(crate) fn handoff() -> (FrameSender, FrameReceiver) {
    let slot = Arc::new(FrameSlot::default());
    let (failed_tx, failed_rx) = oneshot::channel();
    (
        FrameSender {
            slot: slot.clone(),
            failed: failed_tx,
        },
        FrameReceiver {
            slot,
            failed: failed_rx,
            finished: false,
            failure: None,
        },
    )
}

/// Fetch-side half of the handoff.
#[derive(Debug)]
pub(crate) struct FrameSender {
    slot: Arc<FrameSlot>,
    failed: oneshot::Sender<UpstreamError>,
}

impl FrameSender {
    /// Publish a frame without waiting for the client. Returns `false` once
    /// the client has let go of the fetch.
    pub(crate) fn send(&self, frame: Frame) -> bool {
        if self.failed.is_closed() {
            return false;
        }
        if let Some(stale) = self.slot.put(frame) {
            tracing::trace!(sequence = stale.sequence(), "Client busy, frame dropped");
            metrics::frame_dropped("busy");
        }
        true
    }

    /// Report the terminal failure. Delivered after any frame still in the slot.
    pub(crate) fn fail(self, err: UpstreamError) {
        let _ = self.failed.send(err);
    }
}

/// Client-side half of the handoff.
#[derive(Debug)]
pub(crate) struct FrameReceiver {
    slot: Arc<FrameSlot>,
    failed: oneshot::Receiver<UpstreamError>,
    finished: bool,
    failure: Option<UpstreamError>,
}

impl FrameReceiver {
    async fn recv(&mut self) -> Option<UpstreamEvent> {
        loop {
            if let Some(frame) = self.slot.take() {
                return Some(UpstreamEvent::Frame(frame));
            }
            if self.finished {
                return self.failure.take().map(UpstreamEvent::Failed);
            }
            tokio::select! {
                biased;
                _ = self.slot.ready.notified() => {}
                outcome = &mut self.failed => {
                    // `Err` means the sender went away without a failure: clean end.
                    self.finished = true;
                    self.failure = outcome.ok();
                }
            }
        }
    }
}

/// Handle to a running fetch. Dropping it cancels the fetch.
#[derive(Debug)]
pub struct UpstreamFetch {
    owner: ConnectionId,
    task: JoinHandle<()>,
    events: FrameReceiver,
}

impl UpstreamFetch {
    pub(crate) fn new(owner: ConnectionId, task: JoinHandle<()>, events: FrameReceiver) -> Self {
        Self { owner, task, events }
    }

    /// Newest untaken frame, then the failure if there was one; `None` once
    /// the fetch has finished.
    pub async fn next(&mut self) -> Option<UpstreamEvent> {
        self.events.recv().await
    }

    /// Abort the fetch task, releasing its socket.
    pub fn cancel(&self) {
        if !self.task.is_finished() {
            tracing::debug!(connection_id = %self.owner, "Cancelling upstream fetch");
        }
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for UpstreamFetch {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn notice_matches_wire_format() {
        let err = UpstreamError::Connect("connection refused".into());
        let notice: serde_json::Value = serde_json::from_str(&err.client_notice()).unwrap();
        assert_eq!(
            notice,
            serde_json::json!({"error": true, "message": "Error camera: connection refused"})
        );
    }

    #[test]
    fn status_error_names_the_code() {
        let err = UpstreamError::Status(StatusCode::NOT_FOUND);
        assert_eq!(err.kind(), "status");
        assert!(err.client_notice().contains("404"));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("error sending request")]
    struct Opaque(#[source] std::io::Error);

    #[derive(Debug, thiserror::Error)]
    #[error("request failed: {0}")]
    struct Echoing(#[source] std::io::Error);

    #[test]
    fn describe_appends_sources_once() {
        let refused = || std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert_eq!(describe(&Opaque(refused())), "error sending request: refused");
        assert_eq!(describe(&Echoing(refused())), "request failed: refused");
    }

    fn frame(tag: u8) -> Frame {
        let mut decoder = MjpegDecoder::new(64);
        decoder.extend(&[0xFF, 0xD8, tag, 0xFF, 0xD9]);
        decoder.next_frame().unwrap().unwrap()
    }

    fn tag(event: Option<UpstreamEvent>) -> u8 {
        match event {
            Some(UpstreamEvent::Frame(frame)) => frame.data()[2],
            other => panic!("expected a frame, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn untaken_frame_is_replaced_by_newer_one() {
        let (tx, mut rx) = handoff();
        for n in 1..=3 {
            assert!(tx.send(frame(n)));
        }

        assert_eq!(tag(rx.recv().await), 3);
        let idle = tokio::time::timeout(Duration::from_millis(50), rx.recv()).await;
        assert!(idle.is_err(), "nothing new was published");

        assert!(tx.send(frame(4)));
        assert_eq!(tag(rx.recv().await), 4);
    }

    #[tokio::test]
    async fn failure_follows_last_frame() {
        let (tx, mut rx) = handoff();
        assert!(tx.send(frame(1)));
        tx.fail(UpstreamError::Read("connection reset".into()));

        assert_eq!(tag(rx.recv().await), 1);
        match rx.recv().await {
            Some(UpstreamEvent::Failed(err)) => assert_eq!(err.kind(), "read"),
            other => panic!("expected the failure, got {:?}", other),
        }
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn clean_end_yields_none() {
        let (tx, mut rx) = handoff();
        drop(tx);
        assert!(rx.recv().await.is_none());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn sender_notices_departed_client() {
        let (tx, rx) = handoff();
        drop(rx);
        assert!(!tx.send(frame(1)));
    }

    #[tokio::test]
    async fn cancel_stops_task() {
        let (_tx, rx) = handoff();
        let task = tokio::spawn(std::future::pending::<()>());
        let fetch = UpstreamFetch::new(ConnectionId::new(), task, rx);
        assert!(!fetch.is_finished());

        fetch.cancel();
        tokio::time::timeout(Duration::from_secs(1), async {
            while !fetch.is_finished() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn dropping_handle_aborts_task() {
        let (_tx, rx) = handoff();
        let (alive_tx, alive_rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _alive = alive_tx;
            std::future::pending::<()>().await;
        });

        let fetch = UpstreamFetch::new(ConnectionId::new(), task, rx);
        drop(fetch);

        let released = tokio::time::timeout(Duration::from_secs(1), alive_rx).await;
        assert!(matches!(released, Ok(Err(_))), "task state was not released");
    }

    #[tokio::test]
    async fn refused_connection_is_reported() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let config = StreamConfig {
            upstream_url: format!("http://{}/mjpeg/1", addr),
            ..StreamConfig::default()
        };
        let client = UpstreamClient::new(&config).unwrap();
        let mut fetch = client.spawn(ConnectionId::new());

        let event = tokio::time::timeout(Duration::from_secs(5), fetch.next())
            .await
            .unwrap();
        match event {
            Some(UpstreamEvent::Failed(err)) => assert_eq!(err.kind(), "connect"),
            other => panic!("unexpected event: {:?}", other),
        }
        assert!(fetch.next().await.is_none());
    }
}
