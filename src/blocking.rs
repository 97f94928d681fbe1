use axum::http::StatusCode;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;

use crate::constants::QUOTA_EXHAUSTED_PATTERN;
use crate::endpoint::{applications_url, chat_messages_url, normalize_endpoint};
use crate::protocol::{ChatRequest, ResponseMode};
use crate::types::{RelayError, Result};

lazy_static! {
    static ref QUOTA_REGEX: Regex =
        Regex::new(QUOTA_EXHAUSTED_PATTERN).expect("Invalid quota pattern");
}

const VALIDATION_PROBE: &str = "Hello, this is a connectivity check from sidestream";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    BadRequest,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    RateLimited,
    QuotaExhausted,
    ServerFault,
    Other,
}

/// A non-2xx answer from the provider, mapped to something a user can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: u16,
    pub category: FailureCategory,
    pub message: String,
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (HTTP {})", self.message, self.status)
    }
}

impl std::error::Error for ApiFailure {}

impl ApiFailure {
    pub fn classify(status: StatusCode, body: &str) -> Self {
        let detail = error_detail(body);

        if QUOTA_REGEX.is_match(&detail) {
            return Self {
                status: StatusCode::PAYMENT_REQUIRED.as_u16(),
                category: FailureCategory::QuotaExhausted,
                message: "model quota exhausted or request exceeds limits".to_string(),
            };
        }

        let (category, message) = match status {
            StatusCode::BAD_REQUEST => (
                FailureCategory::BadRequest,
                format!(
                    "malformed request, check the API address and parameters: {}",
                    if detail.is_empty() { "bad request" } else { detail.as_str() }
                ),
            ),
            StatusCode::UNAUTHORIZED => (
                FailureCategory::Unauthorized,
                "API key is invalid or expired".to_string(),
            ),
            StatusCode::FORBIDDEN => (
                FailureCategory::Forbidden,
                "API key lacks permission".to_string(),
            ),
            StatusCode::NOT_FOUND => (
                FailureCategory::NotFound,
                "API endpoint not found, check the address".to_string(),
            ),
            StatusCode::METHOD_NOT_ALLOWED => (
                FailureCategory::MethodNotAllowed,
                "HTTP method not allowed, check the address".to_string(),
            ),
            StatusCode::TOO_MANY_REQUESTS => (
                FailureCategory::RateLimited,
                "rate limit exceeded, try again later".to_string(),
            ),
            s if s.is_server_error() => (
                FailureCategory::ServerFault,
                "server internal error".to_string(),
            ),
            s => (
                FailureCategory::Other,
                if detail.is_empty() {
                    format!("HTTP {} error", s.as_u16())
                } else {
                    detail
                },
            ),
        };

        Self {
            status: status.as_u16(),
            category,
            message,
        }
    }
}

/// `message` or `error` from a JSON error body, otherwise the raw text.
fn error_detail(body: &str) -> String {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return body.trim().to_string();
    };
    for field in ["message", "error"] {
        match value.get(field) {
            Some(Value::String(s)) if !s.is_empty() => return s.clone(),
            Some(Value::Null) | None => {}
            Some(Value::String(_)) => {}
            Some(other) => return other.to_string(),
        }
    }
    String::new()
}

/// Sends one message with `response_mode: blocking` and returns the answer.
pub async fn send_blocking(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    message: &str,
    principal: &str,
) -> Result<String> {
    let root = normalize_endpoint(endpoint);
    let response = client
        .post(chat_messages_url(&root))
        .bearer_auth(api_key)
        .json(&ChatRequest::new(message, ResponseMode::Blocking, principal))
        .send()
        .await?;

    let status = response.status();
    let text = response.text().await?;
    if !status.is_success() {
        let failure = ApiFailure::classify(status, &text);
        tracing::warn!("Blocking chat failed: {}", failure);
        return Err(RelayError::Api(failure).into());
    }

    let body: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(_) => Value::Null,
    };
    Ok(crate::sse::extract_text(&body))
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct KeyValidation {
    pub valid: bool,
    pub message: String,
}

impl KeyValidation {
    fn valid(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            message: message.into(),
        }
    }

    fn invalid(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            message: message.into(),
        }
    }
}

/// Checks a key against `GET /applications`, falling back to a blocking
/// chat probe on deployments that do not expose that route.
pub async fn validate_api_key(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    principal: &str,
) -> KeyValidation {
    match probe_api_key(client, endpoint, api_key, principal).await {
        Ok(validation) => validation,
        Err(e) => {
            tracing::warn!("API key validation failed: {}", e.inner);
            KeyValidation::invalid(format!(
                "network failure, check the API address: {}",
                e.inner
            ))
        }
    }
}

async fn probe_api_key(
    client: &reqwest::Client,
    endpoint: &str,
    api_key: &str,
    principal: &str,
) -> Result<KeyValidation> {
    let root = normalize_endpoint(endpoint);

    let mut response = client
        .get(applications_url(&root))
        .bearer_auth(api_key)
        .send()
        .await?;

    if matches!(
        response.status(),
        StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED
    ) {
        tracing::debug!("applications route unavailable, probing chat-messages");
        let mut probe = ChatRequest::new(VALIDATION_PROBE, ResponseMode::Blocking, principal);
        probe.conversation_id = Some("");
        response = client
            .post(chat_messages_url(&root))
            .bearer_auth(api_key)
            .json(&probe)
            .send()
            .await?;
    }

    let status = response.status();
    if status.is_success() {
        return Ok(KeyValidation::valid("API key is valid"));
    }

    let body = response.text().await?;
    let failure = ApiFailure::classify(status, &body);
    tracing::info!(status = status.as_u16(), "API key rejected: {}", failure.message);
    if failure.category == FailureCategory::QuotaExhausted {
        return Ok(KeyValidation::valid(
            "API key is valid, but the model quota is exhausted or parameters exceed limits",
        ));
    }
    Ok(KeyValidation::invalid(failure.message))
}
