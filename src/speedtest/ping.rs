use super::{EchoExchange, EchoStats};
use anyhow::{Context, Result};
use std::net::IpAddr;
use std::time::Duration;
use surge_ping::{Client, Config, PingIdentifier, PingSequence, ICMP};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const PAYLOAD: [u8; 56] = [0; 56];

/// Slack past the echo deadline before a stuck exchange is abandoned, so the
/// replies it collected are not lost to the backstop.
const REPLY_GRACE: Duration = Duration::from_millis(500);

/// Average round-trip time to `host` in whole milliseconds. Every failure is
/// absorbed and reported as `0`.
pub async fn average_rtt<E: EchoExchange>(
    exchange: &E,
    host: &str,
    count: usize,
    timeout: Duration,
    cancel: &CancellationToken,
) -> u64 {
    let deadline = Instant::now() + timeout;
    let outcome = tokio::select! {
        _ = cancel.cancelled() => {
            warn!(host, "ping interrupted");
            return 0;
        }
        outcome = tokio::time::timeout_at(deadline + REPLY_GRACE, exchange.exchange(host, count, deadline)) => outcome,
    };

    match outcome {
        Ok(Ok(stats)) if stats.received > 0 => {
            debug!(host, sent = stats.sent, received = stats.received, avg = ?stats.avg_rtt, "ping finished");
            stats.avg_rtt.as_millis() as u64
        }
        Ok(Ok(stats)) => {
            warn!(host, sent = stats.sent, "no echo replies received");
            0
        }
        Ok(Err(e)) => {
            warn!(host, error = %e, "ping failed");
            0
        }
        Err(_) => {
            warn!(host, ?timeout, "ping timed out");
            0
        }
    }
}

/// Unprivileged ICMP echo using datagram sockets.
pub struct SurgePinger;

impl SurgePinger {
    async fn resolve(host: &str) -> Result<IpAddr> {
        let mut addrs = tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("failed to resolve {host}"))?;
        addrs
            .next()
            .map(|addr| addr.ip())
            .with_context(|| format!("no address found for {host}"))
    }
}

impl EchoExchange for SurgePinger {
    async fn exchange(&self, host: &str, count: usize, deadline: Instant) -> Result<EchoStats> {
        let ip = Self::resolve(host).await?;
        let config = match ip {
            IpAddr::V4(_) => Config::default(),
            IpAddr::V6(_) => Config::builder().kind(ICMP::V6).build(),
        };
        let client = Client::new(&config).context("failed to open ICMP socket")?;
        let mut pinger = client.pinger(ip, PingIdentifier(rand::random())).await;

        let mut samples = Vec::with_capacity(count);
        for seq in 0..count {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            pinger.timeout(remaining);
            match pinger.ping(PingSequence(seq as u16), &PAYLOAD).await {
                Ok((_, rtt)) => {
                    debug!(%ip, seq, ?rtt, "echo reply");
                    samples.push(rtt);
                }
                Err(e) => debug!(%ip, seq, error = %e, "echo failed"),
            }
        }

        Ok(calculate_stats(count, &samples))
    }
}

fn calculate_stats(sent: usize, samples: &[Duration]) -> EchoStats {
    if samples.is_empty() {
        return EchoStats {
            sent,
            ..EchoStats::default()
        };
    }

    let total: Duration = samples.iter().sum();
    EchoStats {
        sent,
        received: samples.len(),
        avg_rtt: total / samples.len() as u32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use tokio::time::{sleep, sleep_until};

    struct FixedExchange(Result<EchoStats, &'static str>);

    impl EchoExchange for FixedExchange {
        async fn exchange(&self, _host: &str, _count: usize, _deadline: Instant) -> Result<EchoStats> {
            self.0.map_err(|e| anyhow!(e))
        }
    }

    struct StalledExchange;

    impl EchoExchange for StalledExchange {
        async fn exchange(&self, _host: &str, _count: usize, _deadline: Instant) -> Result<EchoStats> {
            std::future::pending().await
        }
    }

    /// Resolves, gets one reply, then loses the next echo and waits for it
    /// until the deadline, the way `SurgePinger` does.
    struct LossyExchange;

    impl EchoExchange for LossyExchange {
        async fn exchange(&self, _host: &str, count: usize, deadline: Instant) -> Result<EchoStats> {
            sleep(Duration::from_millis(15)).await;
            let rtt = Duration::from_millis(20);
            sleep(rtt).await;
            sleep_until(deadline).await;
            Ok(calculate_stats(count, &[rtt]))
        }
    }

    const BUDGET: Duration = Duration::from_secs(3);

    #[test]
    fn stats_average_successful_replies() {
        let stats = calculate_stats(
            3,
            &[Duration::from_millis(10), Duration::from_millis(21)],
        );
        assert_eq!(stats.sent, 3);
        assert_eq!(stats.received, 2);
        assert_eq!(stats.avg_rtt, Duration::from_micros(15_500));
    }

    #[test]
    fn stats_without_replies() {
        let stats = calculate_stats(3, &[]);
        assert_eq!(stats.received, 0);
        assert_eq!(stats.avg_rtt, Duration::ZERO);
    }

    #[tokio::test]
    async fn rtt_truncates_to_millis() {
        let exchange = FixedExchange(Ok(EchoStats {
            sent: 3,
            received: 3,
            avg_rtt: Duration::from_micros(15_900),
        }));
        let rtt = average_rtt(&exchange, "example.org", 3, BUDGET, &CancellationToken::new()).await;
        assert_eq!(rtt, 15);
    }

    #[tokio::test]
    async fn rtt_absorbs_errors() {
        let exchange = FixedExchange(Err("operation not permitted"));
        let rtt = average_rtt(&exchange, "example.org", 3, BUDGET, &CancellationToken::new()).await;
        assert_eq!(rtt, 0);
    }

    #[tokio::test]
    async fn rtt_without_replies_is_zero() {
        let exchange = FixedExchange(Ok(EchoStats {
            sent: 3,
            received: 0,
            avg_rtt: Duration::from_millis(40),
        }));
        let rtt = average_rtt(&exchange, "example.org", 3, BUDGET, &CancellationToken::new()).await;
        assert_eq!(rtt, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn lost_echo_keeps_received_replies() {
        let start = Instant::now();
        let rtt = average_rtt(&LossyExchange, "example.org", 3, BUDGET, &CancellationToken::new()).await;
        assert_eq!(rtt, 20);
        assert!(start.elapsed() < BUDGET + REPLY_GRACE);
    }

    #[tokio::test(start_paused = true)]
    async fn rtt_gives_up_after_budget() {
        let start = Instant::now();
        let rtt = average_rtt(&StalledExchange, "example.org", 3, BUDGET, &CancellationToken::new()).await;
        assert_eq!(rtt, 0);
        assert!(start.elapsed() >= BUDGET + REPLY_GRACE);
    }

    #[tokio::test]
    async fn rtt_honours_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let rtt = average_rtt(&StalledExchange, "example.org", 3, BUDGET, &cancel).await;
        assert_eq!(rtt, 0);
    }
}
