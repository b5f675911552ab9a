//! Server-Sent Events support
//!
//! Streams completion notifications to operators.

use crate::state_machine::Notification;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Convert broadcast stream to SSE stream
pub fn sse_stream(
    broadcast_rx: tokio::sync::broadcast::Receiver<Notification>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // Lets clients know the stream is live before the first notification
    let init = futures::stream::once(async {
        Ok(Event::default()
            .event("init")
            .data(json!({"type": "init"}).to_string()))
    });

    let broadcasts = BroadcastStream::new(broadcast_rx).filter_map(|result| match result {
        Ok(notification) => Some(Ok(notification_to_axum(&notification))),
        Err(_) => None, // Skip lagged messages
    });

    Sse::new(init.chain(broadcasts)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn notification_to_axum(notification: &Notification) -> Event {
    let data = serde_json::to_string(notification).unwrap_or_else(|e| {
        json!({"type": "error", "message": e.to_string()}).to_string()
    });
    Event::default().event(notification.event_type()).data(data)
}
