use super::monitor::run_phase;
use super::ping::average_rtt;
use super::{Direction, Discovery, EchoExchange, PhaseResult, SessionOutcome, Target, TestPhase, Transfer};
use crate::app::Reporter;
use crate::settings::Settings;
use anyhow::anyhow;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Conditions that abort a session. Timeouts and ping failures are not
/// among them.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("failed to locate nearest server: {0:#}")]
    Locate(anyhow::Error),
    #[error("no servers found")]
    NoServers,
    #[error("{direction} error: {error:#}")]
    Transfer {
        direction: Direction,
        error: anyhow::Error,
    },
}

/// Runs locate, ping, download and upload in order under one deadline.
pub struct Session<D, T, E> {
    discovery: D,
    transfer: T,
    echo: E,
    settings: Settings,
}

impl<D, T, E> Session<D, T, E>
where
    D: Discovery,
    T: Transfer,
    E: EchoExchange,
{
    pub fn new(discovery: D, transfer: T, echo: E, settings: Settings) -> Self {
        Self {
            discovery,
            transfer,
            echo,
            settings,
        }
    }

    /// Cancelling `cancel`, or reaching the session deadline, ends the active
    /// phase with its partial totals and skips the ones not yet started.
    pub async fn run<R: Reporter>(&self, cancel: CancellationToken, reporter: &R) -> Result<SessionOutcome, SessionError> {
        let token = cancel.child_token();
        let deadline = self.settings.session_deadline;
        let drive = self.drive(&token, reporter);
        tokio::pin!(drive);

        let finished = tokio::select! {
            outcome = &mut drive => Some(outcome),
            _ = tokio::time::sleep(deadline) => None,
        };
        let outcome = match finished {
            Some(outcome) => outcome,
            None => {
                warn!(?deadline, "session deadline elapsed");
                token.cancel();
                drive.await
            }
        };

        reporter.phase_changed(if outcome.is_ok() {
            TestPhase::Done
        } else {
            TestPhase::Failed
        });
        outcome
    }

    async fn drive<R: Reporter>(&self, token: &CancellationToken, reporter: &R) -> Result<SessionOutcome, SessionError> {
        reporter.phase_changed(TestPhase::LocateServer);
        let target = self.locate(token).await?;
        info!(machine = %target.machine, city = %target.location.city, country = %target.location.country, "server found");
        reporter.server_found(&target);

        reporter.phase_changed(TestPhase::Probe);
        let rtt_ms = average_rtt(
            &self.echo,
            &target.machine,
            self.settings.ping_count,
            self.settings.ping_timeout,
            token,
        )
        .await;
        reporter.ping(rtt_ms);

        let download = self.phase(Direction::Download, &target, token, reporter).await?;
        let upload = self.phase(Direction::Upload, &target, token, reporter).await?;

        Ok(SessionOutcome {
            target,
            rtt_ms,
            download,
            upload,
            truncated: token.is_cancelled(),
        })
    }

    async fn locate(&self, token: &CancellationToken) -> Result<Target, SessionError> {
        let targets = tokio::select! {
            _ = token.cancelled() => return Err(SessionError::Locate(anyhow!("cancelled before a server was found"))),
            targets = self.discovery.nearest(&self.settings.service) => targets.map_err(SessionError::Locate)?,
        };
        targets.into_iter().next().ok_or(SessionError::NoServers)
    }

    async fn phase<R: Reporter>(
        &self,
        direction: Direction,
        target: &Target,
        token: &CancellationToken,
        reporter: &R,
    ) -> Result<PhaseResult, SessionError> {
        if token.is_cancelled() {
            warn!(%direction, "no time left, skipping phase");
            return Ok(PhaseResult::default());
        }

        reporter.phase_changed(match direction {
            Direction::Download => TestPhase::Download,
            Direction::Upload => TestPhase::Upload,
        });

        let opened = tokio::select! {
            _ = token.cancelled() => {
                warn!(%direction, "cancelled while connecting, skipping phase");
                return Ok(PhaseResult::default());
            }
            opened = async {
                match direction {
                    Direction::Download => self.transfer.start_download(target, token.clone()).await,
                    Direction::Upload => self.transfer.start_upload(target, token.clone()).await,
                }
            } => opened,
        };
        let samples = opened.map_err(|error| SessionError::Transfer { direction, error })?;

        Ok(run_phase(direction, samples, token, self.settings.summary, reporter).await)
    }
}
