//! Messages exchanged between the background context and its viewers, plus
//! the request bodies sent to the chat provider.

use serde::{Deserialize, Serialize};

use crate::types::SessionId;

/// Requests a viewer sends to the background context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action")]
pub enum BackgroundRequest {
    #[serde(rename = "startStream")]
    StartStream {
        endpoint: String,
        #[serde(rename = "apiKey")]
        api_key: String,
        message: String,
        #[serde(rename = "streamId")]
        stream_id: SessionId,
    },
    #[serde(rename = "cancelStream")]
    CancelStream {
        #[serde(rename = "streamId")]
        stream_id: SessionId,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            success: true,
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
        }
    }
}

/// Push events published for every session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "action")]
pub enum LifecycleEvent {
    #[serde(rename = "streamChunk")]
    Chunk {
        #[serde(rename = "streamId")]
        stream_id: SessionId,
        text: String,
    },
    #[serde(rename = "streamDone")]
    Done {
        #[serde(rename = "streamId")]
        stream_id: SessionId,
    },
    #[serde(rename = "streamError")]
    Error {
        #[serde(rename = "streamId")]
        stream_id: SessionId,
        message: String,
    },
}

impl LifecycleEvent {
    pub fn stream_id(&self) -> &SessionId {
        match self {
            LifecycleEvent::Chunk { stream_id, .. }
            | LifecycleEvent::Done { stream_id }
            | LifecycleEvent::Error { stream_id, .. } => stream_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, LifecycleEvent::Chunk { .. })
    }

    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::Chunk { .. } => "streamChunk",
            LifecycleEvent::Done { .. } => "streamDone",
            LifecycleEvent::Error { .. } => "streamError",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Streaming,
    Blocking,
}

/// Body of `POST {endpoint}/chat-messages`.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub inputs: serde_json::Map<String, serde_json::Value>,
    pub query: &'a str,
    pub response_mode: ResponseMode,
    pub user: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<&'a str>,
}

impl<'a> ChatRequest<'a> {
    pub fn new(query: &'a str, response_mode: ResponseMode, user: &'a str) -> Self {
        Self {
            inputs: serde_json::Map::new(),
            query,
            response_mode,
            user,
            conversation_id: None,
        }
    }
}

/// Body of `POST {endpoint}/chat-messages/{task_id}/stop`.
#[derive(Debug, Clone, Serialize)]
pub struct StopRequest<'a> {
    pub user: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn start_request_uses_viewer_field_names() {
        let raw = json!({
            "action": "startStream",
            "endpoint": "https://api.x.com",
            "apiKey": "app-123",
            "message": "hi",
            "streamId": "s-1",
        });
        let parsed: BackgroundRequest = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed,
            BackgroundRequest::StartStream {
                endpoint: "https://api.x.com".to_string(),
                api_key: "app-123".to_string(),
                message: "hi".to_string(),
                stream_id: SessionId::from("s-1"),
            }
        );
    }

    #[test]
    fn lifecycle_events_are_tagged_by_action() {
        let event = LifecycleEvent::Error {
            stream_id: SessionId::from("s-1"),
            message: "request cancelled".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"action": "streamError", "streamId": "s-1", "message": "request cancelled"})
        );
        assert!(event.is_terminal());
        assert_eq!(event.name(), "streamError");
    }

    #[test]
    fn streaming_body_matches_provider_shape() {
        let body = ChatRequest::new("hello", ResponseMode::Streaming, "ai-sidebar-chatbot");
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            json!({
                "inputs": {},
                "query": "hello",
                "response_mode": "streaming",
                "user": "ai-sidebar-chatbot",
            })
        );
    }
}
