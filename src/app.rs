use crate::speedtest::{Direction, PhaseResult, Target, TestPhase};
use tokio::sync::watch;

/// Receives session progress. Every method must return without waiting on
/// the presentation layer.
pub trait Reporter {
    fn phase_changed(&self, phase: TestPhase);
    fn server_found(&self, target: &Target);
    fn ping(&self, rtt_ms: u64);
    fn phase_started(&self, direction: Direction);
    fn progress(&self, direction: Direction, mbps: f64);
    fn phase_finished(&self, direction: Direction, result: &PhaseResult);
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseView {
    pub started: bool,
    pub live_mbps: Option<f64>,
    pub summary_mbps: Option<f64>,
}

/// Presentation state of one session. The renderer only ever sees the most
/// recent snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct App {
    pub phase: TestPhase,
    pub target: Option<Target>,
    pub rtt_ms: Option<u64>,
    pub download: PhaseView,
    pub upload: PhaseView,
}

impl Default for App {
    fn default() -> Self {
        Self {
            phase: TestPhase::Idle,
            target: None,
            rtt_ms: None,
            download: PhaseView::default(),
            upload: PhaseView::default(),
        }
    }
}

impl App {
    pub fn view(&self, direction: Direction) -> &PhaseView {
        match direction {
            Direction::Download => &self.download,
            Direction::Upload => &self.upload,
        }
    }

    fn view_mut(&mut self, direction: Direction) -> &mut PhaseView {
        match direction {
            Direction::Download => &mut self.download,
            Direction::Upload => &mut self.upload,
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.phase, TestPhase::Done | TestPhase::Failed)
    }
}

impl Reporter for watch::Sender<App> {
    fn phase_changed(&self, phase: TestPhase) {
        self.send_modify(|app| app.phase = phase);
    }

    fn server_found(&self, target: &Target) {
        self.send_modify(|app| app.target = Some(target.clone()));
    }

    fn ping(&self, rtt_ms: u64) {
        self.send_modify(|app| app.rtt_ms = Some(rtt_ms));
    }

    fn phase_started(&self, direction: Direction) {
        self.send_modify(|app| app.view_mut(direction).started = true);
    }

    fn progress(&self, direction: Direction, mbps: f64) {
        self.send_modify(|app| app.view_mut(direction).live_mbps = Some(mbps));
    }

    fn phase_finished(&self, direction: Direction, result: &PhaseResult) {
        self.send_modify(|app| app.view_mut(direction).summary_mbps = Some(result.summary_mbps));
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_reporter_overwrites_live_speed() {
        let (tx, rx) = watch::channel(App::default());
        tx.phase_started(Direction::Download);
        tx.progress(Direction::Download, 10.0);
        tx.progress(Direction::Download, 42.5);

        let app = rx.borrow().clone();
        assert!(app.download.started);
        assert_eq!(app.download.live_mbps, Some(42.5));
        assert!(!app.upload.started);
    }

    #[test]
    fn watch_reporter_never_waits_for_a_reader() {
        let (tx, rx) = watch::channel(App::default());
        drop(rx);
        for i in 0..10_000 {
            tx.progress(Direction::Upload, i as f64);
        }
        tx.phase_finished(
            Direction::Upload,
            &PhaseResult {
                summary_mbps: 9.0,
                ..PhaseResult::default()
            },
        );
        assert_eq!(tx.borrow().upload.live_mbps, Some(9_999.0));
        assert_eq!(tx.borrow().upload.summary_mbps, Some(9.0));
    }

    #[test]
    fn finished_states() {
        let mut app = App::default();
        assert!(!app.is_finished());
        app.phase = TestPhase::Failed;
        assert!(app.is_finished());
    }
}
