//! Server-Sent Events (SSE) utilities shared by the backplane's observability routes.

use crate::events::{BackplaneEvent, EventBus};
use axum::response::sse::{Event, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info};

/// Create a heartbeat-only SSE stream for connection status monitoring, used where a
/// route wants a live connection but has no domain events to broadcast yet.
pub fn create_heartbeat_sse_stream(
    service_name: &'static str,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to {} general events", service_name);

    let stream = async_stream::stream! {
        info!("SSE: {} event stream started", service_name);

        yield Ok(Event::default()
            .event("ConnectionStatus")
            .data("connected"));

        loop {
            tokio::time::sleep(Duration::from_secs(15)).await;
            debug!("SSE: sending heartbeat");
            yield Ok(Event::default().comment("heartbeat"));
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}

/// Stream [`BackplaneEvent`]s from the bus as SSE, one event per message, JSON-encoded.
pub fn create_event_sse_stream(
    bus: EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = bus.subscribe();

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(evt) => {
                    let data = serde_json::to_string(&evt).unwrap_or_else(|_| "{}".to_string());
                    yield Ok(Event::default().event(evt.event_type()).data(data));
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE client lagged, skipped events");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
