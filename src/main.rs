mod app;
mod consent;
mod settings;
mod speedtest;
mod ui;

use anyhow::Result;
use app::App;
use clap::{ArgAction, Parser};
use consent::{prompt_agreement, FileConsentStore};
use settings::{Settings, SummaryPolicy};
use speedtest::locate::LocateClient;
use speedtest::ndt7::Ndt7Client;
use speedtest::ping::SurgePinger;
use speedtest::session::Session;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Measure latency, download and upload speed against the nearest
/// Measurement Lab server.
#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    /// Overall time limit for ping, download and upload, in seconds.
    #[arg(long, default_value_t = 60, env = "SPEED_DEADLINE")]
    pub deadline: u64,

    /// Headline figure reported for each transfer.
    #[arg(long, value_enum, default_value_t = SummaryPolicy::LastSample)]
    pub summary: SummaryPolicy,

    /// Base URL of the locate service.
    #[arg(long, default_value = settings::LOCATE_URL, env = "SPEED_LOCATE_URL")]
    pub locate_url: String,

    /// Accept the data policy without prompting.
    #[arg(short, long)]
    pub yes: bool,

    /// Log more (repeat for more detail). RUST_LOG takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let store = FileConsentStore::user_default()?;
    if !prompt_agreement(&store, std::io::stdin().lock(), std::io::stdout(), cli.yes)? {
        return Ok(());
    }
    println!("\n✔ Agreed to privacy policy\n");

    let settings = Settings::from(&cli);
    let discovery = LocateClient::new(&settings.locate_url, &settings.client_name, &settings.client_version)?;
    let transfer = Ndt7Client::new(&settings.client_name, &settings.client_version);
    let session = Session::new(discovery, transfer, SurgePinger, settings);

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupted, finishing with partial results");
                cancel.cancel();
            }
        }
    });

    let (app_tx, app_rx) = watch::channel(App::default());
    let renderer = tokio::spawn(ui::render(app_rx, std::io::stdout()));

    let result = session.run(cancel, &app_tx).await;
    drop(app_tx);
    renderer.await??;

    let outcome = result?;
    info!(
        machine = %outcome.target.machine,
        rtt_ms = outcome.rtt_ms,
        download_bytes = outcome.download.total_bytes,
        download_mbps = outcome.download.summary_mbps,
        upload_bytes = outcome.upload.total_bytes,
        upload_mbps = outcome.upload.summary_mbps,
        truncated = outcome.truncated,
        "session complete"
    );
    Ok(())
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "error",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(format!("speed={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
