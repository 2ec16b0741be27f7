//! Decoding of streamed completion responses.
//!
//! llama.cpp speaks server-sent events (`data: {...}` lines separated by blank
//! lines) and Ollama speaks newline-delimited JSON.  Both are handled as a
//! sequence of lines: a line is trimmed, an SSE `data:` prefix is removed when
//! present, and what remains is one JSON event.  Network chunks are free to
//! split lines, JSON objects and multi-byte characters anywhere; the line
//! framing reassembles them before anything is parsed.

use std::io;

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};
use serde_json::Value;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tokio_util::io::StreamReader;

use crate::error::{Error, Result};
use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_EVENTS};
use crate::types::{Dialect, StreamEvent};

/// End-of-stream sentinel sent by OpenAI-compatible servers.
const DONE_SENTINEL: &str = "[DONE]";

/// What a single payload contributes to the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// Nothing to emit; keep reading.
    Skip,

    /// A content delta; more may follow.
    Fragment(String),

    /// The provider is done, optionally after one final delta.
    Last(Option<String>),
}

/// Extract the JSON payload from one transport line.
///
/// Returns `None` for heartbeats and for SSE lines that carry no data (comments,
/// `event:`, `id:` and `retry:` fields).
pub fn extract_payload(line: &str) -> Option<&str> {
    let line = line.trim();
    if line.is_empty() || line.starts_with(':') {
        return None;
    }
    if let Some(data) = line.strip_prefix("data:") {
        let data = data.strip_prefix(' ').unwrap_or(data);
        return if data.is_empty() { None } else { Some(data) };
    }
    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| line.starts_with(field))
    {
        return None;
    }
    Some(line)
}

/// Decode one JSON payload according to `dialect`.
///
/// # Errors
///
/// Returns the JSON error when the payload is not valid JSON.
pub fn decode_payload(
    payload: &str,
    dialect: Dialect,
) -> std::result::Result<Decoded, serde_json::Error> {
    if payload == DONE_SENTINEL {
        return Ok(Decoded::Last(None));
    }
    let event: Value = serde_json::from_str(payload)?;
    if let Some(error) = event.get("error") {
        tracing::warn!(%error, "provider reported an error in the stream");
    }
    let decoded = match dialect {
        Dialect::LlamaCompletion => content_with_flag(&event, event.get("content"), "stop"),
        Dialect::OllamaGenerate => content_with_flag(&event, event.get("response"), "done"),
        Dialect::OllamaChat => {
            content_with_flag(&event, event.pointer("/message/content"), "done")
        }
        Dialect::OpenAiChat => match event.pointer("/choices/0") {
            None => Decoded::Last(None),
            Some(choice) => match choice.get("delta") {
                None => Decoded::Skip,
                Some(delta) => match delta.get("content") {
                    None => Decoded::Last(None),
                    Some(Value::String(text)) => Decoded::Fragment(text.clone()),
                    Some(_) => Decoded::Skip,
                },
            },
        },
    };
    Ok(decoded)
}

fn content_with_flag(event: &Value, content: Option<&Value>, flag: &str) -> Decoded {
    let finished = event.get(flag).and_then(Value::as_bool).unwrap_or(false);
    match content {
        None => Decoded::Last(None),
        Some(Value::String(text)) if finished => Decoded::Last(Some(text.clone())),
        Some(Value::String(text)) => Decoded::Fragment(text.clone()),
        Some(_) if finished => Decoded::Last(None),
        Some(_) => Decoded::Skip,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Ending,
    Done,
}

struct DecoderState<L> {
    lines: L,
    dialect: Dialect,
    partial: String,
    phase: Phase,
}

/// Decode a response body into a stream of [`StreamEvent`]s.
///
/// The stream yields fragments in arrival order and finishes with exactly one
/// [`StreamEvent::End`] when the provider signals completion or the body ends.
/// A malformed event yields one [`Error::StreamDecode`] carrying the text
/// decoded so far, after which the stream ends.  A failure reading the body
/// yields one [`Error::Transport`].
pub fn decode_stream<S, E>(
    byte_stream: S,
    dialect: Dialect,
) -> impl Stream<Item = Result<StreamEvent>> + Send + 'static
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: std::error::Error + Send + Sync + 'static,
{
    let bytes = Box::pin(byte_stream).map(|chunk| match chunk {
        Ok(bytes) => {
            STREAM_BYTES.count(bytes.len() as u64);
            Ok(bytes)
        }
        Err(e) => Err(io::Error::other(e)),
    });
    let lines = FramedRead::new(StreamReader::new(bytes), LinesCodec::new());
    let state = DecoderState {
        lines,
        dialect,
        partial: String::new(),
        phase: Phase::Streaming,
    };

    stream::unfold(state, |mut state| async move {
        match state.phase {
            Phase::Done => return None,
            Phase::Ending => {
                state.phase = Phase::Done;
                return Some((Ok(StreamEvent::End), state));
            }
            Phase::Streaming => {}
        }
        loop {
            let line = match state.lines.next().await {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    state.phase = Phase::Done;
                    STREAM_ERRORS.click();
                    return Some((Err(line_error(e, &state.partial)), state));
                }
                None => {
                    state.phase = Phase::Done;
                    return Some((Ok(StreamEvent::End), state));
                }
            };
            let Some(payload) = extract_payload(&line) else {
                continue;
            };
            match decode_payload(payload, state.dialect) {
                Ok(Decoded::Skip) => continue,
                Ok(Decoded::Fragment(text)) => {
                    STREAM_EVENTS.click();
                    state.partial.push_str(&text);
                    return Some((Ok(StreamEvent::Fragment(text)), state));
                }
                Ok(Decoded::Last(Some(text))) => {
                    STREAM_EVENTS.click();
                    state.partial.push_str(&text);
                    state.phase = Phase::Ending;
                    return Some((Ok(StreamEvent::Fragment(text)), state));
                }
                Ok(Decoded::Last(None)) => {
                    state.phase = Phase::Done;
                    return Some((Ok(StreamEvent::End), state));
                }
                Err(e) => {
                    state.phase = Phase::Done;
                    STREAM_ERRORS.click();
                    let err = Error::stream_decode(
                        format!("malformed event {payload:?}: {e}"),
                        state.partial.clone(),
                        Some(Box::new(e)),
                    );
                    return Some((Err(err), state));
                }
            }
        }
    })
}

fn line_error(err: LinesCodecError, partial: &str) -> Error {
    match err {
        LinesCodecError::Io(e) if e.kind() == io::ErrorKind::InvalidData => Error::stream_decode(
            format!("invalid UTF-8 in stream: {e}"),
            partial,
            Some(Box::new(e)),
        ),
        LinesCodecError::Io(e) => Error::transport(
            None,
            format!("error reading response body: {e}"),
            Some(Box::new(e)),
        ),
        LinesCodecError::MaxLineLengthExceeded => {
            Error::stream_decode("event line too long", partial, None)
        }
    }
}
