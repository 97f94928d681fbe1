/// Version segment every normalised endpoint ends with.
pub const API_VERSION_SEGMENT: &str = "v1";

pub const CHAT_MESSAGES_PATH: &str = "chat-messages";
pub const APPLICATIONS_PATH: &str = "applications";

/// Response header some deployments use to announce the remote task id early.
pub const TASK_ID_HEADER: &str = "x-task-id";

/// Principal sent as `user` on every outbound call.
pub const DEFAULT_PRINCIPAL: &str = "ai-sidebar-chatbot";

pub const SSE_DATA_PREFIX: &str = "data:";
pub const SSE_DONE_SENTINEL: &str = "[DONE]";

/// Payload `event` values that end a stream just like the sentinel does.
pub const TERMINAL_EVENT_TYPES: &[&str] = &["message_end", "completed"];

/// Candidate text fields, checked in order; nested ones live under `data`.
pub const TEXT_FIELDS: &[&str] = &["answer", "text"];

/// Upper bound for one carried SSE line.
pub const MAX_FRAME_LENGTH: usize = 1024 * 1024;

pub const THINK_OPEN: &str = "<think>";
pub const THINK_CLOSE: &str = "</think>";

pub const CANCELLED_MESSAGE: &str = "request cancelled";
pub const UNREADABLE_BODY_MESSAGE: &str = "response body is not readable";
pub const IDLE_TIMEOUT_MESSAGE: &str = "stream idle timeout";

/// Substring providers embed in error bodies when the model quota is spent,
/// regardless of the HTTP status they pick.
pub const QUOTA_EXHAUSTED_PATTERN: &str = r"status code 402";

/// Shown text of a selection-based prompt is cut to this many characters.
pub const PROMPT_PREVIEW_CHARS: usize = 800;
