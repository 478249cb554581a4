use super::ndt7::{
    emit, next_message_size, server_message, WsStream, INITIAL_MESSAGE_SIZE, MAX_MESSAGE_SIZE, UPDATE_INTERVAL,
    UPLOAD_TIMEOUT,
};
use super::Measurement;
use anyhow::Result;
use bytes::Bytes;
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::debug;

pub struct UploadTest {
    ws: WsStream,
    data: Bytes,
}

impl UploadTest {
    pub fn new(ws: WsStream) -> Self {
        let mut rng = rand::rngs::StdRng::from_entropy();
        let data: Vec<u8> = (0..MAX_MESSAGE_SIZE).map(|_| rng.gen()).collect();
        Self {
            ws,
            data: Bytes::from(data),
        }
    }

    /// Sends random binary messages of growing size until the time limit
    /// passes or the session is cancelled.
    pub async fn run(self, tx: mpsc::Sender<Measurement>, cancel: CancellationToken) -> Result<()> {
        let (mut sink, stream) = self.ws.split();
        let reader = tokio::spawn(forward_server_messages(stream, tx.clone(), cancel.clone()));

        let start = Instant::now();
        let stop_at = start + UPLOAD_TIMEOUT;
        let mut next_update = start + UPDATE_INTERVAL;
        let mut uploaded: u64 = 0;
        let mut size = INITIAL_MESSAGE_SIZE;
        let mut failure: Option<anyhow::Error> = None;

        while !cancel.is_cancelled() && !tx.is_closed() {
            let message = Message::binary(self.data.slice(..size));
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep_until(stop_at) => {
                    debug!("upload time limit reached");
                    break;
                }
                sent = sink.send(message) => {
                    if let Err(e) = sent {
                        failure = Some(e.into());
                        break;
                    }
                }
            }

            uploaded += size as u64;
            size = next_message_size(size, uploaded);

            let now = Instant::now();
            if now >= next_update {
                if !emit(&tx, Measurement::client(uploaded, now - start), &cancel).await {
                    break;
                }
                next_update = now + UPDATE_INTERVAL;
            }
        }

        debug!(uploaded, elapsed = ?start.elapsed(), "upload finished");
        emit(&tx, Measurement::client(uploaded, start.elapsed()), &cancel).await;
        let _ = sink.close().await;
        reader.abort();
        failure.map_or(Ok(()), Err)
    }
}

async fn forward_server_messages(
    mut stream: SplitStream<WsStream>,
    tx: mpsc::Sender<Measurement>,
    cancel: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => return,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                if let Some(measurement) = server_message(&text) {
                    if !emit(&tx, measurement, &cancel).await {
                        return;
                    }
                }
            }
            Some(Ok(Message::Close(_))) | None => return,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                debug!(error = %e, "upload reader stopped");
                return;
            }
        }
    }
}
