//! Incremental decoding of `data: <json>` lines from a chunked response body.
//!
//! [`SseCodec`] plugs into `FramedRead` for the live stream; [`SseDecoder`]
//! exposes the same state machine as a push API (`feed` / `finish`) for
//! callers that already hold byte chunks.

use bytes::BytesMut;
use serde_json::Value;
use tokio_util::codec::Decoder;

use crate::constants::{
    MAX_FRAME_LENGTH, SSE_DATA_PREFIX, SSE_DONE_SENTINEL, TERMINAL_EVENT_TYPES, TEXT_FIELDS,
};
use crate::types::{DecodedEvent, RelayError, Result, TaskId};

/// Metadata carried by a payload next to its text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameSignals {
    pub task_id: Option<TaskId>,
    /// Payload `event` named a terminal type (`message_end`, `completed`).
    pub terminal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseFrame {
    pub event: DecodedEvent,
    pub signals: FrameSignals,
}

impl SseFrame {
    pub fn done() -> Self {
        Self {
            event: DecodedEvent::Done,
            signals: FrameSignals::default(),
        }
    }

    /// True when the driver should stop reading after this frame.
    pub fn ends_stream(&self) -> bool {
        self.event == DecodedEvent::Done || self.signals.terminal
    }
}

/// Decodes one complete line. Returns `None` for lines that are not data
/// lines at all (blank keep-alives, `event:`, comments).
pub fn decode_line(line: &str) -> Option<SseFrame> {
    let payload = line.trim().strip_prefix(SSE_DATA_PREFIX)?.trim();

    if payload == SSE_DONE_SENTINEL {
        return Some(SseFrame::done());
    }

    let value = match serde_json::from_str::<Value>(payload) {
        Ok(v) => v,
        Err(_) => {
            return Some(SseFrame {
                event: DecodedEvent::ParseFailure,
                signals: FrameSignals::default(),
            })
        }
    };

    Some(SseFrame {
        event: DecodedEvent::Chunk(extract_text(&value)),
        signals: FrameSignals {
            task_id: extract_task_id(&value),
            terminal: is_terminal_event(&value),
        },
    })
}

/// First non-empty of `answer`, `text`, `data.answer`, `data.text`.
pub fn extract_text(value: &Value) -> String {
    let nested = value.get("data");
    let candidates = TEXT_FIELDS
        .iter()
        .map(|field| value.get(*field))
        .chain(TEXT_FIELDS.iter().map(|field| nested.and_then(|d| d.get(*field))));

    for candidate in candidates {
        if let Some(text) = candidate.and_then(Value::as_str) {
            if !text.is_empty() {
                return text.to_string();
            }
        }
    }
    String::new()
}

fn extract_task_id(value: &Value) -> Option<TaskId> {
    value
        .get("task_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(|id| TaskId(id.to_string()))
}

fn is_terminal_event(value: &Value) -> bool {
    match value.get("event").and_then(Value::as_str) {
        Some(kind) => TERMINAL_EVENT_TYPES.contains(&kind),
        None => false,
    }
}

/// Line-oriented SSE codec.
///
/// Bytes stay in the read buffer until a `\n` completes the line, so a
/// multi-byte character split across reads is only ever decoded whole.
/// At end of input the trailing partial line is treated as terminated and,
/// unless the sentinel was already seen, an implicit `Done` is produced.
#[derive(Debug)]
pub struct SseCodec {
    next_index: usize,
    max_length: usize,
    done_seen: bool,
    flushed: bool,
}

impl SseCodec {
    pub fn new() -> Self {
        Self::with_max_length(MAX_FRAME_LENGTH)
    }

    pub fn with_max_length(max_length: usize) -> Self {
        Self {
            next_index: 0,
            max_length,
            done_seen: false,
            flushed: false,
        }
    }

    fn take_line(&mut self, raw: &[u8]) -> Option<SseFrame> {
        let text = String::from_utf8_lossy(raw);
        let frame = decode_line(&text)?;
        match frame.event {
            DecodedEvent::ParseFailure => {
                tracing::debug!(
                    "Dropping malformed SSE payload: {}",
                    crate::str_utils::prefix_chars(text.trim(), 120)
                );
                None
            }
            DecodedEvent::Done => {
                self.done_seen = true;
                Some(frame)
            }
            DecodedEvent::Chunk(_) => Some(frame),
        }
    }
}

impl Default for SseCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SseCodec {
    type Item = SseFrame;
    type Error = RelayError;

    fn decode(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<SseFrame>, RelayError> {
        loop {
            let newline = buf[self.next_index..].iter().position(|b| *b == b'\n');
            match newline {
                Some(offset) => {
                    let end = self.next_index + offset;
                    if end > self.max_length {
                        return Err(RelayError::FrameTooLong(self.max_length));
                    }
                    let line = buf.split_to(end + 1);
                    self.next_index = 0;
                    if let Some(frame) = self.take_line(&line[..end]) {
                        return Ok(Some(frame));
                    }
                }
                None => {
                    if buf.len() > self.max_length {
                        return Err(RelayError::FrameTooLong(self.max_length));
                    }
                    self.next_index = buf.len();
                    return Ok(None);
                }
            }
        }
    }

    fn decode_eof(
        &mut self,
        buf: &mut BytesMut,
    ) -> std::result::Result<Option<SseFrame>, RelayError> {
        if let Some(frame) = self.decode(buf)? {
            return Ok(Some(frame));
        }

        if !buf.is_empty() {
            let rest = buf.split();
            self.next_index = 0;
            if let Some(frame) = self.take_line(&rest) {
                return Ok(Some(frame));
            }
        }

        if !self.done_seen && !self.flushed {
            self.flushed = true;
            self.done_seen = true;
            return Ok(Some(SseFrame::done()));
        }

        Ok(None)
    }
}

/// Push-style wrapper around [`SseCodec`]; single use, bound to one stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    codec: SseCodec,
    buf: BytesMut,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<SseFrame>> {
        self.buf.extend_from_slice(bytes);
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode(&mut self.buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }

    /// Flushes the carried partial line and closes the stream.
    pub fn finish(mut self) -> Result<Vec<SseFrame>> {
        let mut frames = Vec::new();
        while let Some(frame) = self.codec.decode_eof(&mut self.buf)? {
            frames.push(frame);
        }
        Ok(frames)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = concat!(
        "data: {\"event\":\"message\",\"task_id\":\"task-1\",\"answer\":\"héllo \"}\n",
        "\n",
        "data: {\"event\":\"message\",\"answer\":\"wörld 日本\"}\r\n",
        "event: ping\n",
        "data: {not json\n",
        "data:{\"data\":{\"text\":\"!\"}}\n",
        "data: [DONE]\n",
    );

    fn events(frames: &[SseFrame]) -> Vec<DecodedEvent> {
        frames.iter().map(|f| f.event.clone()).collect()
    }

    fn decode_in_pieces(bytes: &[u8], cuts: &[usize]) -> Vec<SseFrame> {
        let mut decoder = SseDecoder::new();
        let mut frames = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            frames.extend(decoder.feed(&bytes[start..cut]).unwrap());
            start = cut;
        }
        frames.extend(decoder.feed(&bytes[start..]).unwrap());
        frames.extend(decoder.finish().unwrap());
        frames
    }

    #[test]
    fn whole_payload_decodes_in_order() {
        let frames = decode_in_pieces(PAYLOAD.as_bytes(), &[]);
        assert_eq!(
            events(&frames),
            vec![
                DecodedEvent::Chunk("héllo ".to_string()),
                DecodedEvent::Chunk("wörld 日本".to_string()),
                DecodedEvent::Chunk("!".to_string()),
                DecodedEvent::Done,
            ]
        );
        assert_eq!(frames[0].signals.task_id, Some(TaskId("task-1".to_string())));
        assert_eq!(frames[1].signals.task_id, None);
    }

    #[test]
    fn every_chunking_yields_the_same_frames() {
        let bytes = PAYLOAD.as_bytes();
        let expected = decode_in_pieces(bytes, &[]);
        for i in 0..=bytes.len() {
            for j in i..=bytes.len() {
                let frames = decode_in_pieces(bytes, &[i, j]);
                assert_eq!(frames, expected, "cuts at {} and {}", i, j);
            }
        }
    }

    #[test]
    fn split_multibyte_character_is_reassembled() {
        let line = "data: {\"answer\":\"日\"}\n".as_bytes();
        let cut = line.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(&line[..cut]).unwrap().is_empty());
        let frames = decoder.feed(&line[cut..]).unwrap();
        assert_eq!(events(&frames), vec![DecodedEvent::Chunk("日".to_string())]);
    }

    #[test]
    fn sentinel_yields_exactly_one_done() {
        let mut decoder = SseDecoder::new();
        let frames = decoder.feed(b"data: [DONE]\n").unwrap();
        assert_eq!(events(&frames), vec![DecodedEvent::Done]);
        assert!(decoder.finish().unwrap().is_empty());
    }

    #[test]
    fn malformed_line_is_dropped_without_corrupting_the_next() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"answer\": oops\n").unwrap().is_empty());
        let frames = decoder.feed(b"data: {\"answer\":\"ok\"}\n").unwrap();
        assert_eq!(events(&frames), vec![DecodedEvent::Chunk("ok".to_string())]);
    }

    #[test]
    fn partial_line_waits_for_completion() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"answer\":\"a").unwrap().is_empty());
        let frames = decoder.feed(b"b\"}\n").unwrap();
        assert_eq!(events(&frames), vec![DecodedEvent::Chunk("ab".to_string())]);
    }

    #[test]
    fn finish_flushes_unterminated_line_then_implicit_done() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.feed(b"data: {\"answer\":\"tail\"}").unwrap().is_empty());
        let frames = decoder.finish().unwrap();
        assert_eq!(
            events(&frames),
            vec![DecodedEvent::Chunk("tail".to_string()), DecodedEvent::Done]
        );
    }

    #[test]
    fn finish_on_empty_stream_is_just_done() {
        let frames = SseDecoder::new().finish().unwrap();
        assert_eq!(events(&frames), vec![DecodedEvent::Done]);
    }

    #[test]
    fn text_fields_checked_in_order() {
        let v: Value = serde_json::from_str(r#"{"answer":"","text":"t","data":{"answer":"d"}}"#)
            .unwrap();
        assert_eq!(extract_text(&v), "t");
        let v: Value = serde_json::from_str(r#"{"data":{"answer":"","text":"nested"}}"#).unwrap();
        assert_eq!(extract_text(&v), "nested");
        let v: Value = serde_json::from_str(r#"{"event":"workflow_started"}"#).unwrap();
        assert_eq!(extract_text(&v), "");
    }

    #[test]
    fn terminal_event_types_are_flagged() {
        let frame = decode_line(r#"data: {"event":"message_end","task_id":"t9"}"#).unwrap();
        assert!(frame.signals.terminal);
        assert!(frame.ends_stream());
        assert_eq!(frame.event, DecodedEvent::Chunk(String::new()));
        assert_eq!(frame.signals.task_id, Some(TaskId("t9".to_string())));
    }

    #[test]
    fn non_data_lines_are_ignored() {
        assert_eq!(decode_line("event: ping"), None);
        assert_eq!(decode_line(": keepalive"), None);
        assert_eq!(decode_line("   "), None);
    }

    #[test]
    fn overlong_line_is_an_error() {
        let mut codec = SseCodec::with_max_length(16);
        let mut buf = BytesMut::from(&b"data: {\"answer\":\"way too long\""[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RelayError::FrameTooLong(16))
        ));
    }

    #[test]
    fn overlong_line_with_its_newline_in_one_read_is_an_error() {
        let mut codec = SseCodec::with_max_length(16);
        let mut buf = BytesMut::from(&b"data: {\"answer\":\"way too long\"}\ndata: [DONE]\n"[..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(RelayError::FrameTooLong(16))
        ));

        let mut buf = BytesMut::from(&b"data: [DONE]\n"[..]);
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(SseFrame::done()));
    }
}
