use clap::ValueEnum;
use std::time::Duration;

pub const LOCATE_URL: &str = "https://locate.measurementlab.net";
pub const SERVICE: &str = "ndt/ndt7";

/// Which value of a phase becomes its headline figure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum SummaryPolicy {
    /// Speed computed from the final cumulative totals.
    #[default]
    #[value(name = "last")]
    LastSample,
    /// Highest instantaneous speed seen during the phase.
    #[value(name = "max")]
    Maximum,
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub ping_count: usize,
    pub ping_timeout: Duration,
    pub session_deadline: Duration,
    pub service: String,
    pub locate_url: String,
    pub client_name: String,
    pub client_version: String,
    pub summary: SummaryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            ping_count: 3,
            ping_timeout: Duration::from_secs(3),
            session_deadline: Duration::from_secs(60),
            service: SERVICE.to_string(),
            locate_url: LOCATE_URL.to_string(),
            client_name: env!("CARGO_PKG_NAME").to_string(),
            client_version: env!("CARGO_PKG_VERSION").to_string(),
            summary: SummaryPolicy::default(),
        }
    }
}

impl From<&crate::Cli> for Settings {
    fn from(cli: &crate::Cli) -> Self {
        Self {
            session_deadline: Duration::from_secs(cli.deadline),
            locate_url: cli.locate_url.clone(),
            summary: cli.summary,
            ..Self::default()
        }
    }
}
