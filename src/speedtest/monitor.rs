use super::rate::speed_mbps;
use super::{Direction, PhaseResult, SampleStream};
use crate::app::Reporter;
use crate::settings::SummaryPolicy;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Consumes one phase's sample stream in delivery order until the producer
/// closes it or `cancel` fires, then rolls the last known totals up into a
/// [`PhaseResult`].
pub async fn run_phase<R: Reporter>(
    direction: Direction,
    mut samples: SampleStream,
    cancel: &CancellationToken,
    policy: SummaryPolicy,
    reporter: &R,
) -> PhaseResult {
    let mut total_bytes: u64 = 0;
    let mut elapsed_micros: u64 = 0;
    let mut max_mbps: f64 = 0.0;
    let mut count: usize = 0;

    reporter.phase_started(direction);

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(%direction, "phase cancelled, finalizing with partial totals");
                break;
            }
            next = samples.recv() => next,
        };

        let Some(measurement) = next else {
            break;
        };
        let Some(app_info) = measurement.app_info else {
            trace!(%direction, "skipping housekeeping sample");
            continue;
        };

        total_bytes = app_info.num_bytes;
        elapsed_micros = app_info.elapsed_time;
        count += 1;

        let mbps = speed_mbps(total_bytes, elapsed_micros);
        max_mbps = max_mbps.max(mbps);
        debug!(%direction, total_bytes, elapsed_micros, mbps, "sample");
        reporter.progress(direction, mbps);
    }

    // Stop the producer if it is still running.
    samples.close();

    let summary_mbps = match policy {
        SummaryPolicy::LastSample => speed_mbps(total_bytes, elapsed_micros),
        SummaryPolicy::Maximum => max_mbps,
    };

    let result = PhaseResult {
        total_bytes,
        elapsed_micros,
        summary_mbps,
        samples: count,
    };
    info!(
        %direction,
        total_bytes = result.total_bytes,
        elapsed_micros = result.elapsed_micros,
        summary_mbps = result.summary_mbps,
        samples = result.samples,
        "phase finished"
    );
    reporter.phase_finished(direction, &result);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::testing::RecordingReporter;
    use crate::speedtest::Measurement;
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn sample(bytes: u64, elapsed: Duration) -> Measurement {
        Measurement::client(bytes, elapsed)
    }

    async fn feed(samples: Vec<Measurement>, policy: SummaryPolicy) -> (PhaseResult, RecordingReporter) {
        let (tx, rx) = mpsc::channel(samples.len().max(1));
        for s in samples {
            tx.send(s).await.unwrap();
        }
        drop(tx);

        let reporter = RecordingReporter::default();
        let cancel = CancellationToken::new();
        let result = run_phase(Direction::Download, rx, &cancel, policy, &reporter).await;
        (result, reporter)
    }

    #[tokio::test]
    async fn final_totals_follow_last_sample() {
        let (result, reporter) = feed(
            vec![
                sample(1_000_000, Duration::from_millis(100)),
                sample(5_000_000, Duration::from_millis(500)),
                sample(10_000_000, Duration::from_secs(1)),
            ],
            SummaryPolicy::LastSample,
        )
        .await;

        assert_eq!(reporter.progress_for(Direction::Download).len(), 3);
        assert_eq!(result.total_bytes, 10_000_000);
        assert_eq!(result.elapsed_micros, 1_000_000);
        assert_eq!(result.summary_mbps, 80.0);
        assert_eq!(result.samples, 3);
        assert_eq!(reporter.finished(Direction::Download), Some(result));
    }

    #[tokio::test]
    async fn empty_stream_yields_zero_result() {
        let (result, reporter) = feed(vec![], SummaryPolicy::LastSample).await;
        assert_eq!(result, PhaseResult::default());
        assert!(reporter.progress_for(Direction::Download).is_empty());
    }

    #[tokio::test]
    async fn housekeeping_samples_are_skipped() {
        let (result, reporter) = feed(
            vec![
                sample(2_000_000, Duration::from_secs(1)),
                Measurement::default(),
                Measurement::default(),
            ],
            SummaryPolicy::LastSample,
        )
        .await;

        assert_eq!(reporter.progress_for(Direction::Download), vec![16.0]);
        assert_eq!(result.total_bytes, 2_000_000);
        assert_eq!(result.samples, 1);
    }

    #[tokio::test]
    async fn maximum_policy_keeps_peak() {
        let (result, _) = feed(
            vec![
                sample(12_500_000, Duration::from_secs(1)),
                sample(15_000_000, Duration::from_secs(2)),
            ],
            SummaryPolicy::Maximum,
        )
        .await;

        assert_eq!(result.summary_mbps, 100.0);
        assert_eq!(result.total_bytes, 15_000_000);
    }

    #[tokio::test]
    async fn zero_elapsed_sample_reports_zero() {
        let (result, reporter) = feed(vec![sample(4096, Duration::ZERO)], SummaryPolicy::LastSample).await;
        assert_eq!(reporter.progress_for(Direction::Download), vec![0.0]);
        assert_eq!(result.summary_mbps, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_unblocks_open_stream() {
        let (tx, rx) = mpsc::channel(4);
        tx.send(sample(12_500_000, Duration::from_secs(1))).await.unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
            trigger.cancel();
        });

        let reporter = RecordingReporter::default();
        let result = run_phase(Direction::Upload, rx, &cancel, SummaryPolicy::LastSample, &reporter).await;

        assert_eq!(result.total_bytes, 12_500_000);
        assert_eq!(result.summary_mbps, 100.0);
        // The producer sees the stream closed once the phase is over.
        assert!(tx.send(Measurement::default()).await.is_err());
    }
}
