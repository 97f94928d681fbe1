//! HTTP face of the background context for out-of-process viewers.

use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::background::BackgroundHandle;
use crate::protocol::{Ack, BackgroundRequest};
use crate::types::Result;

#[derive(Serialize)]
pub struct LivenessResponse {
    pub status: &'static str,
    pub live_sessions: usize,
    pub viewers: usize,
}

pub fn router(handle: BackgroundHandle) -> Router {
    Router::new()
        .route("/rpc", post(rpc))
        .route("/events", get(events))
        .route("/health", get(liveness))
        .layer(CorsLayer::permissive())
        .with_state(handle)
}

async fn rpc(
    State(handle): State<BackgroundHandle>,
    Json(request): Json<BackgroundRequest>,
) -> Result<Json<Ack>> {
    Ok(Json(handle.request(request).await?))
}

async fn events(
    State(handle): State<BackgroundHandle>,
) -> Sse<impl Stream<Item = std::result::Result<Event, Infallible>>> {
    let stream = handle.relay().event_stream().map(|event| {
        let data = match serde_json::to_string(&event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!("Failed to serialize lifecycle event: {}", e);
                String::new()
            }
        };
        Ok(Event::default().event(event.name()).data(data))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    )
}

pub async fn liveness(State(handle): State<BackgroundHandle>) -> Json<LivenessResponse> {
    Json(LivenessResponse {
        status: "ok",
        live_sessions: handle.registry().len(),
        viewers: handle.relay().viewer_count(),
    })
}
