use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::blocking::ApiFailure;
use crate::constants::{
    CANCELLED_MESSAGE, IDLE_TIMEOUT_MESSAGE, TASK_ID_HEADER, UNREADABLE_BODY_MESSAGE,
};
use crate::endpoint::{chat_messages_url, normalize_endpoint};
use crate::logging::StreamMetric;
use crate::protocol::{ChatRequest, LifecycleEvent, ResponseMode};
use crate::relay::Relay;
use crate::session::SessionRegistry;
use crate::sse::SseCodec;
use crate::types::{DecodedEvent, Result, SessionId, TaskId};

/// What a viewer asked the background context to stream.
#[derive(Debug, Clone)]
pub struct StreamRequest {
    pub endpoint: String,
    pub api_key: String,
    pub message: String,
    pub stream_id: SessionId,
}

/// How a session ended. Exactly one of these is produced per session and
/// turned into exactly one terminal lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    Failed(String),
    Cancelled,
}

impl StreamOutcome {
    fn label(&self) -> &'static str {
        match self {
            StreamOutcome::Completed => "completed",
            StreamOutcome::Failed(_) => "failed",
            StreamOutcome::Cancelled => "cancelled",
        }
    }

    fn into_event(self, stream_id: SessionId) -> LifecycleEvent {
        match self {
            StreamOutcome::Completed => LifecycleEvent::Done { stream_id },
            StreamOutcome::Failed(message) => LifecycleEvent::Error { stream_id, message },
            StreamOutcome::Cancelled => LifecycleEvent::Error {
                stream_id,
                message: CANCELLED_MESSAGE.to_string(),
            },
        }
    }
}

#[derive(Clone)]
pub struct StreamDriver {
    client: reqwest::Client,
    registry: Arc<SessionRegistry>,
    relay: Relay,
    principal: String,
    idle_timeout: Duration,
}

impl StreamDriver {
    pub fn new(
        client: reqwest::Client,
        registry: Arc<SessionRegistry>,
        relay: Relay,
        principal: String,
        idle_timeout: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            relay,
            principal,
            idle_timeout,
        }
    }

    /// Registers the session and spawns its read loop.
    ///
    /// The session is in the registry before this returns, so a cancel
    /// issued right after always finds it.
    pub fn start(&self, request: StreamRequest) -> Result<JoinHandle<StreamOutcome>> {
        let endpoint = normalize_endpoint(&request.endpoint);
        let cancel = CancellationToken::new();
        self.registry.create(
            request.stream_id.clone(),
            cancel.clone(),
            endpoint.clone(),
            request.api_key.clone(),
            self.principal.clone(),
        )?;

        let span = tracing::info_span!("stream", session = %request.stream_id.short());
        let driver = self.clone();
        Ok(tokio::spawn(
            async move { driver.drive(request, endpoint, cancel).await }.instrument(span),
        ))
    }

    async fn drive(
        &self,
        request: StreamRequest,
        endpoint: String,
        cancel: CancellationToken,
    ) -> StreamOutcome {
        let mut metric = StreamMetric::new();
        tracing::info!("[⚙️  -> ☁️ ] Opening stream to {}", endpoint);

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => StreamOutcome::Cancelled,
            outcome = self.read_stream(&request, &endpoint, &mut metric) => outcome,
        };

        self.registry.remove(&request.stream_id);
        metric.log_summary(&request.stream_id, outcome.label());
        if let StreamOutcome::Failed(message) = &outcome {
            tracing::warn!("[☁️  -> ⚙️ ] Stream failed: {}", message);
        }
        self.relay
            .publish(outcome.clone().into_event(request.stream_id.clone()));
        outcome
    }

    async fn read_stream(
        &self,
        request: &StreamRequest,
        endpoint: &str,
        metric: &mut StreamMetric,
    ) -> StreamOutcome {
        let id = &request.stream_id;
        let body = ChatRequest::new(&request.message, ResponseMode::Streaming, &self.principal);

        let response = match self
            .client
            .post(chat_messages_url(endpoint))
            .bearer_auth(&request.api_key)
            .json(&body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => return StreamOutcome::Failed(format!("network failure: {}", e)),
        };

        let status = response.status();
        tracing::info!("[☁️  -> ⚙️ ] Status: {}", status);

        if let Some(task_id) = response
            .headers()
            .get(TASK_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
        {
            self.registry
                .attach_remote_task_id(id, TaskId(task_id.to_string()));
        }

        if !status.is_success() {
            let error_body = match response.text().await {
                Ok(text) => text,
                Err(e) => format!("Upstream error (body unreadable): {}", e),
            };
            return StreamOutcome::Failed(ApiFailure::classify(status, &error_body).message);
        }

        if matches!(status, StatusCode::NO_CONTENT | StatusCode::RESET_CONTENT) {
            return StreamOutcome::Failed(UNREADABLE_BODY_MESSAGE.to_string());
        }

        let bytes_stream = response
            .bytes_stream()
            .map(|r| r.map_err(std::io::Error::other));
        let mut frames = FramedRead::new(
            tokio_util::io::StreamReader::new(bytes_stream),
            SseCodec::new(),
        );

        loop {
            let next = match tokio::time::timeout(self.idle_timeout, frames.next()).await {
                Ok(next) => next,
                Err(_) => return StreamOutcome::Failed(IDLE_TIMEOUT_MESSAGE.to_string()),
            };

            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => return StreamOutcome::Failed(format!("stream read failed: {}", e)),
                None => return StreamOutcome::Completed,
            };
            metric.record_frame();

            if let Some(task_id) = frame.signals.task_id.clone() {
                self.registry.attach_remote_task_id(id, task_id);
            }

            if let DecodedEvent::Chunk(text) = &frame.event {
                if !text.is_empty() {
                    metric.record_chunk(text);
                    self.relay.publish(LifecycleEvent::Chunk {
                        stream_id: id.clone(),
                        text: text.clone(),
                    });
                }
            }

            if frame.ends_stream() {
                tracing::debug!("[☁️  -> ⚙️ ] Stream end marker received");
                return StreamOutcome::Completed;
            }
        }
    }
}
