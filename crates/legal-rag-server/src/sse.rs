//! Adapts the orchestrator's `EventStream` into the `axum` SSE wire shape
//! (§6): each `StreamEvent` is serialized as a single `data: <json>\n\n`
//! frame. Mirrors the teacher's `chat_stream` stub in shape (a
//! `futures::Stream<Item = Result<Event, Infallible>>`), but fed by a real
//! producer instead of a stub.

use std::convert::Infallible;

use axum::response::sse::Event;
use futures::{Stream, StreamExt};

use legal_rag::rag::EventStream;
use legal_rag::types::StreamEvent;

pub fn event_stream(events: EventStream) -> impl Stream<Item = Result<Event, Infallible>> {
    events.map(|event| Ok(to_sse_event(&event)))
}

fn to_sse_event(event: &StreamEvent) -> Event {
    match serde_json::to_string(event) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize stream event");
            Event::default().data("{\"type\":\"error\",\"kind\":\"internal\",\"message\":\"serialization failure\"}")
        }
    }
}
