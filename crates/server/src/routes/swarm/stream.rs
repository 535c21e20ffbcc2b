//! Session Progress Streaming (SSE)
//!
//! Streams a session's progress events to the client as server-sent events.
//! The underlying publisher diffs database state, so connecting mid-session
//! replays what already happened before following along live.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    Extension,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use db::models::swarm_session::SwarmSession;
use futures::stream::Stream;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};

use crate::{AppState, error::ApiError};

/// GET /api/swarm/sessions/:id/stream
pub async fn session_stream(
    Extension(session): Extension<SwarmSession>,
    State(state): State<AppState>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let publisher =
        services::services::swarm::StreamPublisher::from_config(state.db_pool.clone()).await?;
    let receiver = publisher.stream(session.id);

    tracing::debug!(swarm_session_id = %session.id, "Opened progress stream");

    let stream = ReceiverStream::new(receiver).map(|event| {
        let sse_event = Event::default()
            .event(event.name())
            .data(event.data().to_string());
        Ok(sse_event)
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    ))
}
