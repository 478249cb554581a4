//! ndt7 transfer client. Each phase runs on its own task and reports
//! [`Measurement`]s through a bounded channel that closes when the phase ends.

use super::download::DownloadTest;
use super::upload::UploadTest;
use super::{Direction, Measurement, SampleStream, Target, Transfer};
use anyhow::{Context, Result};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const SEC_WEBSOCKET_PROTOCOL: &str = "net.measurementlab.ndt.v7";
pub const DOWNLOAD_URL_PATH: &str = "/ndt/v7/download";
pub const UPLOAD_URL_PATH: &str = "/ndt/v7/upload";

pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(15);
pub const UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(7);
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(250);

/// Uploads start with 8 KiB messages.
pub const INITIAL_MESSAGE_SIZE: usize = 1 << 13;
pub const MAX_MESSAGE_SIZE: usize = 1 << 20;
/// Message size doubles while it is at most 1/16 of the bytes sent so far.
pub const SCALING_FRACTION: u64 = 16;

const CHANNEL_CAPACITY: usize = 64;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct Ndt7Client {
    user_agent: String,
}

impl Ndt7Client {
    pub fn new(client_name: &str, client_version: &str) -> Self {
        Self {
            user_agent: format!("{client_name}/{client_version}"),
        }
    }

    async fn connect(&self, url: &str) -> Result<WsStream> {
        let mut request = url.into_client_request()?;
        let headers = request.headers_mut();
        headers.insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(SEC_WEBSOCKET_PROTOCOL),
        );
        headers.insert("User-Agent", HeaderValue::from_str(&self.user_agent)?);

        let (ws, response) = tokio::time::timeout(HANDSHAKE_TIMEOUT, tokio_tungstenite::connect_async(request))
            .await
            .context("websocket handshake timed out")??;
        debug!(status = %response.status(), "websocket connected");
        Ok(ws)
    }

    async fn open(&self, target: &Target, direction: Direction) -> Result<(WsStream, mpsc::Sender<Measurement>, SampleStream)> {
        let url = endpoint(target, direction);
        info!(%direction, machine = %target.machine, "starting ndt7 test");
        let ws = self
            .connect(&url)
            .await
            .with_context(|| format!("failed to connect to {}", target.machine))?;
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Ok((ws, tx, rx))
    }
}

impl Transfer for Ndt7Client {
    async fn start_download(&self, target: &Target, cancel: CancellationToken) -> Result<SampleStream> {
        let (ws, tx, rx) = self.open(target, Direction::Download).await?;
        tokio::spawn(async move {
            if let Err(e) = DownloadTest::new(ws).run(tx, cancel).await {
                warn!(error = %e, "download ended with error");
            }
        });
        Ok(rx)
    }

    async fn start_upload(&self, target: &Target, cancel: CancellationToken) -> Result<SampleStream> {
        let (ws, tx, rx) = self.open(target, Direction::Upload).await?;
        tokio::spawn(async move {
            if let Err(e) = UploadTest::new(ws).run(tx, cancel).await {
                warn!(error = %e, "upload ended with error");
            }
        });
        Ok(rx)
    }
}

/// The URL advertised by the locate service, or the bare ndt7 path on the
/// target's machine when none was given.
fn endpoint(target: &Target, direction: Direction) -> String {
    let (advertised, path) = match direction {
        Direction::Download => (&target.download_url, DOWNLOAD_URL_PATH),
        Direction::Upload => (&target.upload_url, UPLOAD_URL_PATH),
    };
    advertised
        .clone()
        .unwrap_or_else(|| format!("wss://{}{}", target.machine, path))
}

/// Sends `measurement` unless the session is cancelled first. Returns false
/// once the consumer is gone or cancellation fired.
pub(super) async fn emit(
    tx: &mpsc::Sender<Measurement>,
    measurement: Measurement,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        _ = cancel.cancelled() => false,
        sent = tx.send(measurement) => sent.is_ok(),
    }
}

/// Decodes a server text message into a housekeeping sample. Server counters
/// run on the remote clock, so only client totals feed the running sums.
pub(super) fn server_message(text: &str) -> Option<Measurement> {
    match serde_json::from_str::<Measurement>(text) {
        Ok(mut measurement) => {
            if let Some(app_info) = measurement.app_info.take() {
                debug!(
                    origin = ?measurement.origin,
                    test = ?measurement.test,
                    num_bytes = app_info.num_bytes,
                    elapsed = app_info.elapsed_time,
                    "server measurement"
                );
            }
            Some(measurement)
        }
        Err(e) => {
            debug!(error = %e, "ignoring malformed server message");
            None
        }
    }
}

/// Size of the next upload message given the current size and bytes sent.
pub(super) fn next_message_size(current: usize, total_sent: u64) -> usize {
    if current >= MAX_MESSAGE_SIZE || current as u64 > total_sent / SCALING_FRACTION {
        current
    } else {
        (current * 2).min(MAX_MESSAGE_SIZE)
    }
}
