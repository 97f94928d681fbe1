use std::panic;

use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;

use crate::config::Args;
use crate::redaction::RedactingWriter;
use crate::types::SessionId;

const DEFAULT_FILTER: &str = "sidestream=info";

/// Installs the global subscriber. Keep the returned guard alive for the
/// lifetime of the process or buffered file logs are lost.
pub fn init_tracing(args: &Args) -> Option<WorkerGuard> {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => DEFAULT_FILTER.into(),
    };

    let (file_layer, guard) = match &args.log_dir {
        Some(dir) => {
            if let Err(e) = std::fs::create_dir_all(dir) {
                eprintln!("Cannot create log directory {}: {}", dir.display(), e);
            }
            let appender = tracing_appender::rolling::daily(dir, "sidestream.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(RedactingWriter::new(non_blocking))
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(|| RedactingWriter::new(std::io::stderr()))
                .with_target(false),
        )
        .with(file_layer)
        .with(tracing_error::ErrorLayer::default())
        .init();

    guard
}

/// Sets up a global panic hook that logs panics using tracing.
pub fn setup_panic_hook() {
    let original_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = std::backtrace::Backtrace::capture();

        let payload = panic_info.payload();
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            *s
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.as_str()
        } else {
            "Unknown panic payload"
        };

        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown location".to_string());

        error!(
            target: "panic",
            message = %message,
            location = %location,
            backtrace = %backtrace,
            "FATAL: Application panicked"
        );

        original_hook(panic_info);
    }));
}

/// Per-session counters, summarised once the session ends.
#[derive(Default)]
pub struct StreamMetric {
    pub frames: usize,
    pub chunks: usize,
    pub text_chars: usize,
    started: Option<std::time::Instant>,
}

impl StreamMetric {
    pub fn new() -> Self {
        Self {
            started: Some(std::time::Instant::now()),
            ..Self::default()
        }
    }

    pub fn record_frame(&mut self) {
        self.frames += 1;
    }

    pub fn record_chunk(&mut self, text: &str) {
        self.chunks += 1;
        self.text_chars += text.chars().count();
    }

    pub fn log_summary(&self, session: &SessionId, outcome: &str) {
        let elapsed_ms = match self.started {
            Some(t) => t.elapsed().as_millis(),
            None => 0,
        };
        info!(
            target: "flight_recorder",
            "[STREAM END] Session: {} | Outcome: {} | Frames: {} | Chunks: {} | Text: {} chars | {} ms",
            session.short(), outcome, self.frames, self.chunks, self.text_chars, elapsed_ms
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_counts_characters_not_bytes() {
        let mut metric = StreamMetric::new();
        metric.record_frame();
        metric.record_frame();
        metric.record_chunk("日本");
        assert_eq!(metric.frames, 2);
        assert_eq!(metric.chunks, 1);
        assert_eq!(metric.text_chars, 2);
    }
}
