pub mod download;
pub mod locate;
pub mod monitor;
pub mod ndt7;
pub mod ping;
pub mod rate;
pub mod session;
pub mod upload;

use serde::Deserialize;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// One candidate measurement server, as ranked by the locate service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    /// Host name used both as the ping destination and the transfer endpoint.
    pub machine: String,
    pub location: Location,
    pub download_url: Option<String>,
    pub upload_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub city: String,
    #[serde(default)]
    pub country: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    pub fn glyph(self) -> &'static str {
        match self {
            Direction::Download => "↓",
            Direction::Upload => "↑",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Direction::Download => "Download speed:",
            Direction::Upload => "Upload speed  :",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Download => f.write_str("download"),
            Direction::Upload => f.write_str("upload"),
        }
    }
}

/// Cumulative application-level counters reported by a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct AppInfo {
    #[serde(rename = "NumBytes")]
    pub num_bytes: u64,
    /// Microseconds since the phase started.
    #[serde(rename = "ElapsedTime")]
    pub elapsed_time: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Origin {
    #[serde(rename = "client")]
    Client,
    #[serde(rename = "server")]
    Server,
}

/// A single event on a phase's sample stream. Events without `app_info` are
/// housekeeping and carry no measurement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Measurement {
    #[serde(rename = "AppInfo", default)]
    pub app_info: Option<AppInfo>,
    #[serde(rename = "Origin", default)]
    pub origin: Option<Origin>,
    #[serde(rename = "Test", default)]
    pub test: Option<String>,
}

impl Measurement {
    pub fn client(num_bytes: u64, elapsed: Duration) -> Self {
        Self {
            app_info: Some(AppInfo {
                num_bytes,
                elapsed_time: u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            }),
            origin: Some(Origin::Client),
            test: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseResult {
    pub total_bytes: u64,
    pub elapsed_micros: u64,
    pub summary_mbps: f64,
    /// Number of samples that carried a measurement.
    pub samples: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionOutcome {
    pub target: Target,
    pub rtt_ms: u64,
    pub download: PhaseResult,
    pub upload: PhaseResult,
    /// True when the deadline or an interrupt cut the session short.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestPhase {
    Idle,
    LocateServer,
    Probe,
    Download,
    Upload,
    Done,
    Failed,
}

/// Aggregate statistics of an ICMP echo exchange.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EchoStats {
    pub sent: usize,
    pub received: usize,
    pub avg_rtt: Duration,
}

pub type SampleStream = mpsc::Receiver<Measurement>;

pub trait Discovery {
    fn nearest(&self, service: &str) -> impl Future<Output = anyhow::Result<Vec<Target>>> + Send;
}

pub trait Transfer {
    fn start_download(
        &self,
        target: &Target,
        cancel: CancellationToken,
    ) -> impl Future<Output = anyhow::Result<SampleStream>> + Send;

    fn start_upload(
        &self,
        target: &Target,
        cancel: CancellationToken,
    ) -> impl Future<Output = anyhow::Result<SampleStream>> + Send;
}

/// ICMP echo round trips. Implementations return whatever replies arrived by
/// `deadline` instead of failing when an echo is lost.
pub trait EchoExchange {
    fn exchange(
        &self,
        host: &str,
        count: usize,
        deadline: Instant,
    ) -> impl Future<Output = anyhow::Result<EchoStats>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_server_measurement() {
        let raw = r#"{"AppInfo":{"NumBytes":1234,"ElapsedTime":5678},"Origin":"server","Test":"download","TCPInfo":{"RTT":100}}"#;
        let m: Measurement = serde_json::from_str(raw).unwrap();
        assert_eq!(
            m.app_info,
            Some(AppInfo {
                num_bytes: 1234,
                elapsed_time: 5678
            })
        );
        assert_eq!(m.origin, Some(Origin::Server));
        assert_eq!(m.test.as_deref(), Some("download"));
    }

    #[test]
    fn housekeeping_message_has_no_app_info() {
        let m: Measurement = serde_json::from_str(r#"{"ConnectionInfo":{"Client":"1.2.3.4:5"}}"#).unwrap();
        assert!(m.app_info.is_none());
    }

    #[test]
    fn client_measurement_uses_micros() {
        let m = Measurement::client(10, Duration::from_millis(250));
        assert_eq!(m.app_info.unwrap().elapsed_time, 250_000);
        assert_eq!(m.origin, Some(Origin::Client));
    }

    #[test]
    fn client_elapsed_saturates() {
        let m = Measurement::client(0, Duration::MAX);
        assert_eq!(m.app_info.unwrap().elapsed_time, u64::MAX);
    }
}
