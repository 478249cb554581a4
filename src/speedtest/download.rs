use super::ndt7::{emit, server_message, WsStream, DOWNLOAD_TIMEOUT, UPDATE_INTERVAL};
use super::Measurement;
use anyhow::Result;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct DownloadTest {
    ws: WsStream,
}

impl DownloadTest {
    pub fn new(ws: WsStream) -> Self {
        Self { ws }
    }

    /// Reads everything the server sends until it closes the connection, the
    /// time limit passes or the session is cancelled.
    pub async fn run(mut self, tx: mpsc::Sender<Measurement>, cancel: CancellationToken) -> Result<()> {
        let start = Instant::now();
        let stop = sleep_until(start + DOWNLOAD_TIMEOUT);
        tokio::pin!(stop);
        let mut ticker = interval_at(start + UPDATE_INTERVAL, UPDATE_INTERVAL);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut downloaded: u64 = 0;
        let mut failure: Option<anyhow::Error> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = &mut stop => {
                    debug!("download time limit reached");
                    break;
                }
                _ = ticker.tick() => {
                    if !emit(&tx, Measurement::client(downloaded, start.elapsed()), &cancel).await {
                        break;
                    }
                }
                message = self.ws.next() => match message {
                    Some(Ok(Message::Binary(data))) => downloaded += data.len() as u64,
                    Some(Ok(Message::Text(text))) => {
                        downloaded += text.len() as u64;
                        if let Some(measurement) = server_message(&text) {
                            if !emit(&tx, measurement, &cancel).await {
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        failure = Some(e.into());
                        break;
                    }
                },
            }
        }

        debug!(downloaded, elapsed = ?start.elapsed(), "download finished");
        emit(&tx, Measurement::client(downloaded, start.elapsed()), &cancel).await;
        let _ = self.ws.close(None).await;
        failure.map_or(Ok(()), Err)
    }
}
