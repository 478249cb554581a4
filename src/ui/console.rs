use crate::app::App;
use crate::speedtest::{Direction, TestPhase};
use anyhow::Result;
use crossterm::{
    queue,
    style::{Color, Print, ResetColor, SetForegroundColor, Stylize},
    terminal::{Clear, ClearType},
};
use std::io::Write;
use tokio::sync::watch;

const STATUS: Color = Color::Cyan;
const DONE: Color = Color::Green;

pub fn ping_line(rtt_ms: u64) -> String {
    format!("{} {:<18} {:>8} ms", "↔", "Ping (avg)    :", rtt_ms)
}

pub fn speed_line(direction: Direction, mbps: f64) -> String {
    format!("{} {:<18}{:>8.2} Mbps", direction.glyph(), direction.label(), mbps)
}

#[derive(Debug, Default)]
struct PhaseCursor {
    header: bool,
    last_live: Option<f64>,
    summary: bool,
}

/// Line-oriented renderer. Remembers what it already printed so a snapshot
/// can be drawn repeatedly and only new information reaches the terminal.
pub struct Console<W: Write> {
    out: W,
    status: bool,
    server: bool,
    ping: bool,
    download: PhaseCursor,
    upload: PhaseCursor,
    complete: bool,
}

impl<W: Write> Console<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            status: false,
            server: false,
            ping: false,
            download: PhaseCursor::default(),
            upload: PhaseCursor::default(),
            complete: false,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn draw(&mut self, app: &App) -> Result<()> {
        if app.phase == TestPhase::LocateServer && !self.status && app.target.is_none() {
            queue!(
                self.out,
                SetForegroundColor(STATUS),
                Print("Retrieving speedtest configuration..."),
                ResetColor
            )?;
            self.status = true;
        }

        if self.status && (app.target.is_some() || app.is_finished()) {
            queue!(self.out, Print("\r"), Clear(ClearType::CurrentLine))?;
            self.status = false;
        }

        if let Some(target) = app.target.as_ref().filter(|_| !self.server) {
            queue!(
                self.out,
                Print(format!(
                    "Server found: {} at {}, {}\n\n",
                    target.machine, target.location.city, target.location.country
                ))
            )?;
            self.server = true;
        }

        if let Some(rtt_ms) = app.rtt_ms.filter(|_| !self.ping) {
            queue!(self.out, Print(ping_line(rtt_ms)), Print("\n"))?;
            self.ping = true;
        }

        for direction in [Direction::Download, Direction::Upload] {
            self.draw_phase(app, direction)?;
        }

        if app.phase == TestPhase::Done && !self.complete {
            queue!(self.out, Print("\n"), Print("🚀 Test complete!".with(DONE)), Print("\n"))?;
            self.complete = true;
        }

        self.out.flush()?;
        Ok(())
    }

    fn draw_phase(&mut self, app: &App, direction: Direction) -> Result<()> {
        let view = app.view(direction);
        let cursor = match direction {
            Direction::Download => &mut self.download,
            Direction::Upload => &mut self.upload,
        };
        if !view.started || cursor.summary {
            return Ok(());
        }

        if let Some(summary) = view.summary_mbps {
            queue!(
                self.out,
                Print("\r"),
                Clear(ClearType::CurrentLine),
                Print(speed_line(direction, summary)),
                Print("\n")
            )?;
            cursor.summary = true;
        } else if let Some(live) = view.live_mbps.filter(|live| cursor.last_live != Some(*live)) {
            queue!(
                self.out,
                Print("\r"),
                Clear(ClearType::CurrentLine),
                Print(speed_line(direction, live))
            )?;
            cursor.last_live = Some(live);
            cursor.header = true;
        } else if !cursor.header {
            queue!(
                self.out,
                Print(format!("{} {:<18}", direction.glyph(), direction.label()))
            )?;
            cursor.header = true;
        }
        Ok(())
    }
}

/// Draws every snapshot published on `rx` until the session finishes or the
/// publisher goes away.
pub async fn render<W: Write>(mut rx: watch::Receiver<App>, out: W) -> Result<()> {
    let mut console = Console::new(out);
    loop {
        let changed = rx.changed().await;
        let app = rx.borrow_and_update().clone();
        console.draw(&app)?;
        if changed.is_err() || app.is_finished() {
            return Ok(());
        }
    }
}
