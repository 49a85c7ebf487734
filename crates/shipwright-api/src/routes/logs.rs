//! Live log stream endpoints.
//!
//! Push-style SSE connections, one event per log line, no replay across
//! reconnects. Dropping the connection drops the channel receiver, which
//! cancels the engine's watches and follows.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{
    Router,
    extract::{Path, State},
    routing::get,
};
use futures::Stream;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use uuid::Uuid;

use shipwright_core::ResourceId;
use shipwright_db::{DeploymentRepo, ServiceRepo};
use shipwright_deployer::names;
use shipwright_logs::LogEvent;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/deployments/{id}/logs/build", get(build_logs))
        .route("/services/{id}/logs/runtime", get(runtime_logs))
}

async fn build_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let deployment = state.deployments.get(ResourceId::from_uuid(id)).await?;
    let service = state.services.get(deployment.service_id).await?;
    let namespace = names::namespace_for(service.environment_id);

    let (tx, rx) = mpsc::channel(256);
    let engine = state.logs.clone();
    tokio::spawn(async move {
        engine
            .stream_build_logs(&namespace, deployment.id, tx)
            .await;
    });

    Ok(sse_stream(rx))
}

async fn runtime_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let service = state.services.get(ResourceId::from_uuid(id)).await?;
    let namespace = names::namespace_for(service.environment_id);
    let service_id = service.id;

    let (tx, rx) = mpsc::channel(256);
    let engine = state.logs.clone();
    tokio::spawn(async move {
        engine
            .stream_runtime_logs(&namespace, service_id, tx)
            .await;
    });

    Ok(sse_stream(rx))
}

fn sse_stream(
    rx: mpsc::Receiver<LogEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = ReceiverStream::new(rx).map(|event| Ok(to_sse_event(&event)));
    Sse::new(stream).keep_alive(KeepAlive::default())
}

fn to_sse_event(event: &LogEvent) -> Event {
    let sse = Event::default().event(event.kind());
    match serde_json::to_string(event) {
        Ok(data) => sse.data(data),
        Err(_) => sse.data("{}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_events_carry_source_and_line() {
        let event = LogEvent::Line {
            source: "app".to_string(),
            line: "listening on 8080".to_string(),
        };
        // The SSE event name is the discriminator clients switch on.
        assert_eq!(event.kind(), "log");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["line"], "listening on 8080");
    }

    #[test]
    fn end_marker_is_distinct_from_error() {
        assert_ne!(LogEvent::End.kind(), LogEvent::Error { message: String::new() }.kind());
    }
}
