//! Shared utilities for integration tests.

#![allow(dead_code)]

use camera_relay::config::RelayConfig;
use camera_relay::lifecycle::{self, Running};
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const BOUNDARY: &str = "123456789000000000000987654321";

/// How the mock camera answers each request.
#[derive(Debug, Clone)]
pub enum CameraMode {
    /// 200 with these frames, then keep the connection open.
    Stream(Vec<Vec<u8>>),
    /// Like `Stream`, but written back to back with no pacing.
    Flood(Vec<Vec<u8>>),
    /// 200 promising a long body, these frames, then an abrupt close.
    Reset(Vec<Vec<u8>>),
    /// Accept the connection and never answer.
    Stall,
    /// Answer with a bare status line.
    Status(u16),
}

/// An MJPEG camera on loopback that reports when its sockets close.
pub struct MockCamera {
    pub addr: SocketAddr,
    accepted: Arc<AtomicUsize>,
    written: Arc<AtomicUsize>,
    closed: mpsc::UnboundedReceiver<()>,
}

impl MockCamera {
    pub fn url(&self) -> String {
        format!("http://{}/mjpeg/1", self.addr)
    }

    pub fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Parts written across all connections.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::SeqCst)
    }

    pub async fn wait_written(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.written() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.written() >= count
    }

    /// Wait for one upstream connection to be closed by the relay.
    pub async fn wait_closed(&mut self, within: Duration) -> bool {
        matches!(tokio::time::timeout(within, self.closed.recv()).await, Ok(Some(())))
    }

    pub async fn wait_accepted(&self, count: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while tokio::time::Instant::now() < deadline {
            if self.accepted() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.accepted() >= count
    }
}

/// A minimal JPEG-shaped payload: SOI, filler, EOI.
pub fn jpeg(tag: u8, len: usize) -> Vec<u8> {
    let mut data = vec![0xFF, 0xD8];
    data.extend(std::iter::repeat(tag).take(len));
    data.extend_from_slice(&[0xFF, 0xD9]);
    data
}

fn part(frame: &[u8]) -> Vec<u8> {
    let mut out = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        BOUNDARY,
        frame.len()
    )
    .into_bytes();
    out.extend_from_slice(frame);
    out.extend_from_slice(b"\r\n");
    out
}

pub async fn start_mock_camera(mode: CameraMode) -> MockCamera {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let accepted = Arc::new(AtomicUsize::new(0));
    let written = Arc::new(AtomicUsize::new(0));
    let (closed_tx, closed) = mpsc::unbounded_channel();

    let counter = accepted.clone();
    let parts = written.clone();
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((socket, _)) => {
                    counter.fetch_add(1, Ordering::SeqCst);
                    let mode = mode.clone();
                    let closed_tx = closed_tx.clone();
                    let parts = parts.clone();
                    tokio::spawn(async move {
                        serve_camera(socket, mode, &parts).await;
                        let _ = closed_tx.send(());
                    });
                }
                Err(_) => break,
            }
        }
    });

    MockCamera {
        addr,
        accepted,
        written,
        closed,
    }
}

async fn write_parts(
    socket: &mut TcpStream,
    frames: Vec<Vec<u8>>,
    pace: Option<Duration>,
    written: &AtomicUsize,
) -> bool {
    for frame in frames {
        if socket.write_all(&part(&frame)).await.is_err() {
            return false;
        }
        written.fetch_add(1, Ordering::SeqCst);
        if let Some(pace) = pace {
            tokio::time::sleep(pace).await;
        }
    }
    true
}

/// Returns once the peer has closed the connection.
async fn serve_camera(mut socket: TcpStream, mode: CameraMode, written: &AtomicUsize) {
    let mut buf = [0u8; 1024];
    let mut request = Vec::new();
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let multipart = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: multipart/x-mixed-replace; boundary={}\r\nConnection: close\r\n",
        BOUNDARY
    );
    let pace = matches!(mode, CameraMode::Stream(_)).then(|| Duration::from_millis(10));
    match mode {
        CameraMode::Stream(frames) | CameraMode::Flood(frames) => {
            let head = format!("{}\r\n", multipart);
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            if !write_parts(&mut socket, frames, pace, written).await {
                return;
            }
        }
        CameraMode::Reset(frames) => {
            let head = format!("{}Content-Length: 100000000\r\n\r\n", multipart);
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
            write_parts(&mut socket, frames, Some(Duration::from_millis(10)), written).await;
            // Cut the body short.
            return;
        }
        CameraMode::Status(code) => {
            let head = format!(
                "HTTP/1.1 {} Nope\r\nContent-Length: 0\r\nConnection: keep-alive\r\n\r\n",
                code
            );
            if socket.write_all(head.as_bytes()).await.is_err() {
                return;
            }
        }
        CameraMode::Stall => {}
    }

    // Hold the connection until the relay lets go of it.
    loop {
        match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

/// A URL nothing is listening on.
pub fn unreachable_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}/mjpeg/1", addr)
}

pub async fn start_relay(upstream_url: String) -> Running {
    start_relay_with(upstream_url, |_| {}).await
}

/// Start a relay on ephemeral loopback ports, letting the test adjust the config.
pub async fn start_relay_with(upstream_url: String, tweak: impl FnOnce(&mut RelayConfig)) -> Running {
    let mut config = RelayConfig::default();
    config.stream.bind_address = "127.0.0.1:0".into();
    config.data.bind_address = "127.0.0.1:0".into();
    config.stream.upstream_url = upstream_url;
    config.stream.connect_timeout_ms = 1000;
    config.stream.read_timeout_ms = 10_000;
    tweak(&mut config);

    lifecycle::start(config).await.unwrap()
}

pub async fn connect(addr: SocketAddr) -> Client {
    let (ws, _) = connect_async(format!("ws://{}/", addr)).await.unwrap();
    ws
}

/// Next data-carrying message, skipping control frames.
pub async fn next_message(ws: &mut Client, within: Duration) -> Option<Message> {
    let deadline = tokio::time::Instant::now() + within;
    loop {
        let msg = tokio::time::timeout_at(deadline, ws.next()).await.ok()??.ok()?;
        match msg {
            Message::Ping(_) | Message::Pong(_) => continue,
            other => return Some(other),
        }
    }
}

/// True if the server still answers a ping.
pub async fn is_open(ws: &mut Client) -> bool {
    if ws.send(Message::Ping(b"alive".to_vec().into())).await.is_err() {
        return false;
    }
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        match tokio::time::timeout_at(deadline, ws.next()).await {
            Ok(Some(Ok(Message::Pong(_)))) => return true,
            Ok(Some(Ok(Message::Close(_)))) | Ok(Some(Err(_))) | Ok(None) | Err(_) => return false,
            Ok(Some(Ok(_))) => continue,
        }
    }
}
