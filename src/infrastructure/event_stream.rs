// Event stream - Server-sent events for committed readings
use crate::domain::reading::Reading;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use tokio::sync::broadcast::{self, error::RecvError};

/// One `reading` event per committed reading, with keep-alive comments.
pub fn reading_events(
    rx: broadcast::Receiver<Reading>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let events = readings(rx).filter_map(|reading| async move {
        match Event::default().event("reading").json_data(&reading) {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                tracing::warn!("Failed to encode reading event: {}", e);
                None
            }
        }
    });

    Sse::new(events).keep_alive(KeepAlive::default())
}

/// Readings from a subscription until the sampler goes away.
/// A lagging client skips what it missed and carries on.
pub fn readings(mut rx: broadcast::Receiver<Reading>) -> impl Stream<Item = Reading> {
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(reading) => yield reading,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged; skipped {} readings", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_stream_ends_when_sender_drops() {
        let (tx, rx) = broadcast::channel(8);
        tx.send(Reading::idle(Utc::now(), 12_000.0, 10)).unwrap();
        tx.send(Reading::idle(Utc::now(), 12_000.0, 11)).unwrap();
        drop(tx);

        let received: Vec<Reading> = readings(rx).collect().await;
        assert_eq!(received.iter().map(|r| r.percentage).collect::<Vec<_>>(), vec![10, 11]);
    }

    #[tokio::test]
    async fn test_lagging_subscriber_skips_ahead() {
        let (tx, rx) = broadcast::channel(1);
        for pct in [10, 20, 30] {
            tx.send(Reading::idle(Utc::now(), 12_000.0, pct)).unwrap();
        }
        drop(tx);

        let received: Vec<Reading> = readings(rx).collect().await;
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].percentage, 30);
    }
}
