use crate::constants::{API_VERSION_SEGMENT, APPLICATIONS_PATH, CHAT_MESSAGES_PATH};
use crate::types::TaskId;

/// Canonical API root for a user-supplied base URL.
///
/// Trims surrounding whitespace and makes sure the result ends in exactly one
/// `/v1` segment. Malformed input still yields a string; the HTTP layer will
/// report the real problem.
pub fn normalize_endpoint(raw: &str) -> String {
    let trimmed = raw.trim();
    let suffix = format!("/{}", API_VERSION_SEGMENT);
    if trimmed.ends_with(&suffix) {
        return trimmed.to_string();
    }
    if trimmed.ends_with('/') {
        format!("{}{}", trimmed, API_VERSION_SEGMENT)
    } else {
        format!("{}{}", trimmed, suffix)
    }
}

pub fn chat_messages_url(root: &str) -> String {
    format!("{}/{}", root, CHAT_MESSAGES_PATH)
}

pub fn stop_url(root: &str, task_id: &TaskId) -> String {
    format!("{}/{}/{}/stop", root, CHAT_MESSAGES_PATH, task_id.0)
}

pub fn applications_url(root: &str) -> String {
    format!("{}/{}", root, APPLICATIONS_PATH)
}
