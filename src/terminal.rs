use std::future::Future;
use std::io::Write;

use colored::Colorize;
use crate::background::BackgroundHandle;
use crate::protocol::{BackgroundRequest, LifecycleEvent};
use crate::splitter::pending_marker_len;
use crate::types::{RelayError, Result};
use crate::viewer::{ChatView, Message};

/// Prints a message incrementally as its projection grows.
///
/// Content is recomputed from the whole buffer on every chunk, so each call
/// only emits the part past what was already printed; a trailing fragment
/// that may still become a think marker is held back.
#[derive(Debug, Default)]
pub struct TerminalRenderer {
    printed_thoughts: usize,
    printed_answer: usize,
    in_thoughts: bool,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn render(&mut self, message: &Message) -> String {
        self.emit(message, true)
    }

    /// Last render of a finished turn: nothing can still grow into a
    /// marker, so held-back fragments are printed too.
    pub fn finish(&mut self, message: &Message) -> String {
        self.emit(message, false)
    }

    fn emit(&mut self, message: &Message, hold_back: bool) -> String {
        let mut out = String::new();

        let thoughts = visible(&message.thought_text, hold_back);
        if let Some(fresh) = fresh_suffix(thoughts, self.printed_thoughts) {
            if !self.in_thoughts {
                out.push_str(&format!("{}\n", "[thinking]".dimmed()));
                self.in_thoughts = true;
            }
            out.push_str(&fresh.dimmed().to_string());
            self.printed_thoughts = thoughts.len();
        }

        let answer = visible(&message.content, hold_back);
        if let Some(fresh) = fresh_suffix(answer, self.printed_answer) {
            if self.in_thoughts {
                out.push_str(&format!("\n{}\n", "[answer]".dimmed()));
                self.in_thoughts = false;
            }
            out.push_str(fresh);
            self.printed_answer = answer.len();
        }

        out
    }
}

/// What a streamed turn left behind.
#[derive(Debug, Clone)]
pub struct TurnResult {
    pub message: Message,
    /// Set when the turn ended with an error event, cancellation included.
    pub error: Option<String>,
}

/// One user turn as the terminal viewer sends it.
#[derive(Debug, Clone, Copy)]
pub struct Turn<'a> {
    pub endpoint: &'a str,
    pub api_key: &'a str,
    /// Shown as the user's side of the conversation.
    pub display: &'a str,
    /// Sent to the provider.
    pub prompt: &'a str,
}

/// Streams one turn through the background context and prints it while it
/// arrives. When `interrupt` resolves the turn is cancelled and the loop
/// keeps reading until the terminal event comes back.
pub async fn stream_turn<W, F>(
    handle: &BackgroundHandle,
    turn: Turn<'_>,
    out: &mut W,
    interrupt: F,
) -> Result<TurnResult>
where
    W: Write,
    F: Future<Output = ()>,
{
    let mut view = ChatView::new();
    let (stream_id, message_id) = view.begin_turn(turn.display);

    // The relay does not replay, so attach before the stream can emit.
    let mut events = handle.relay().subscribe();

    let ack = handle
        .request(BackgroundRequest::StartStream {
            endpoint: turn.endpoint.to_string(),
            api_key: turn.api_key.to_string(),
            message: turn.prompt.to_string(),
            stream_id: stream_id.clone(),
        })
        .await?;
    if !ack.success {
        view.fail_to_start(&stream_id);
        let reason = match ack.message {
            Some(m) => m,
            None => String::new(),
        };
        return Err(RelayError::Protocol(format!("failed to start request: {}", reason)).into());
    }

    let mut renderer = TerminalRenderer::new();
    let mut interrupted = false;
    tokio::pin!(interrupt);

    let terminal = loop {
        let received = tokio::select! {
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                tracing::info!(session = %stream_id.short(), "Interrupted, cancelling stream");
                handle
                    .request(BackgroundRequest::CancelStream {
                        stream_id: stream_id.clone(),
                    })
                    .await?;
                continue;
            }
            received = events.recv() => received,
        };

        let Some(event) = received else {
            return Err(RelayError::Internal("relay closed mid-stream".to_string()).into());
        };

        if !view.apply(&event) {
            continue;
        }
        if let Some(message) = view.message(&message_id) {
            let text = if event.is_terminal() {
                renderer.finish(message)
            } else {
                renderer.render(message)
            };
            write!(out, "{}", text)?;
            out.flush()?;
        }
        if event.is_terminal() {
            break event;
        }
    };
    writeln!(out)?;

    let message = view
        .message(&message_id)
        .cloned()
        .ok_or_else(|| RelayError::Internal("assistant message vanished".to_string()))?;
    let error = match terminal {
        LifecycleEvent::Error { message, .. } => Some(message),
        _ => None,
    };
    Ok(TurnResult { message, error })
}

fn visible(text: &str, hold_back: bool) -> &str {
    if hold_back {
        &text[..text.len() - pending_marker_len(text)]
    } else {
        text
    }
}

fn fresh_suffix(text: &str, printed: usize) -> Option<&str> {
    if text.len() > printed && text.is_char_boundary(printed) {
        Some(&text[printed..])
    } else {
        None
    }
}
