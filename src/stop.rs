//! Client-side suppression of stop markers and reasoning blocks.
//!
//! Servers are asked to stop on the configured markers, but they do not always
//! honor the request, and a marker can reach us split over several fragments.
//! [`StopFilter`] therefore withholds any text that could still turn out to be
//! the start of a marker and releases it only once it is proven safe.  Nothing
//! from the first character of a marker onwards is ever emitted.

use futures::stream::{self, Stream, StreamExt};

use crate::error::Result;
use crate::observability::STOP_MARKERS_SEEN;
use crate::types::StreamEvent;

/// Opening tag of a reasoning block.
pub const THINK_OPEN: &str = "<think>";

/// Closing tag of a reasoning block.
pub const THINK_CLOSE: &str = "</think>";

enum Scan {
    Emit,
    Withhold(usize),
    Halt(usize),
}

/// Withholds text that may be the beginning of a stop marker.
///
/// Markers are checked in the order given.  Once a marker is seen the filter
/// halts and discards everything it receives afterwards.  The withheld buffer
/// never spans a newline and is always a strict prefix of some marker, so it
/// holds fewer bytes than the longest marker.
#[derive(Debug, Clone, Default)]
pub struct StopFilter {
    markers: Vec<String>,
    buffer: String,
    halted: bool,
}

impl StopFilter {
    /// Create a filter for `markers`.  Empty markers are ignored.
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            markers: markers
                .into_iter()
                .map(Into::into)
                .filter(|m: &String| !m.is_empty())
                .collect(),
            buffer: String::new(),
            halted: false,
        }
    }

    /// The configured markers.
    pub fn markers(&self) -> &[String] {
        &self.markers
    }

    /// Whether a marker has been seen.
    pub fn is_halted(&self) -> bool {
        self.halted
    }

    /// Text currently withheld.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Feed one fragment and return the text that is now safe to emit.
    pub fn push(&mut self, fragment: &str) -> String {
        let mut out = String::new();
        self.feed(fragment, &mut out);
        out
    }

    /// Release whatever is still withheld at the clean end of a stream.
    ///
    /// Returns nothing once the filter has halted.
    pub fn finish(&mut self) -> String {
        if self.halted {
            String::new()
        } else {
            std::mem::take(&mut self.buffer)
        }
    }

    fn feed(&mut self, fragment: &str, out: &mut String) {
        if self.halted {
            return;
        }
        // Keep the buffering decision within a single line.
        if fragment.len() >= 2
            && let Some(idx) = fragment.find('\n')
        {
            let (head, tail) = (&fragment[..idx], &fragment[idx + 1..]);
            if !head.is_empty() {
                self.feed(head, out);
            }
            self.feed("\n", out);
            if !tail.is_empty() {
                self.feed(tail, out);
            }
            return;
        }

        self.buffer.push_str(fragment);
        match self.scan() {
            Scan::Emit => {
                out.push_str(&self.buffer);
                self.buffer.clear();
            }
            Scan::Withhold(at) => {
                out.push_str(&self.buffer[..at]);
                self.buffer.drain(..at);
            }
            Scan::Halt(at) => {
                out.push_str(&self.buffer[..at]);
                self.buffer.clear();
                self.halted = true;
                STOP_MARKERS_SEEN.click();
            }
        }
    }

    /// Find the earliest offset at which a marker starts or may start.
    fn scan(&self) -> Scan {
        for (at, _) in self.buffer.char_indices() {
            let tail = &self.buffer[at..];
            if self.markers.iter().any(|m| tail.starts_with(m.as_str())) {
                return Scan::Halt(at);
            }
            if self.markers.iter().any(|m| m.starts_with(tail)) {
                return Scan::Withhold(at);
            }
        }
        Scan::Emit
    }
}

/// Run decoded events through the optional `reasoning` filter and then `stop`.
///
/// Yields the safe text for each fragment (possibly empty), the released
/// remainder when the stream ends cleanly, and passes errors through.  The
/// output ends as soon as a marker is seen or an error is yielded.
pub fn filter_stream<S>(
    events: S,
    reasoning: Option<ReasoningFilter>,
    stop: StopFilter,
) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = Result<StreamEvent>>,
{
    let events = Box::pin(events);
    stream::unfold(Some((events, reasoning, stop)), |state| async move {
        let (mut events, mut reasoning, mut stop) = state?;
        match events.next().await {
            Some(Ok(StreamEvent::Fragment(text))) => {
                let visible = match reasoning.as_mut() {
                    Some(reasoning) => reasoning.push(&text),
                    None => text,
                };
                let safe = stop.push(&visible);
                let next = (!stop.is_halted()).then_some((events, reasoning, stop));
                Some((Ok(safe), next))
            }
            Some(Ok(StreamEvent::End)) | None => {
                let mut rest = match reasoning.as_mut() {
                    Some(reasoning) => stop.push(&reasoning.finish()),
                    None => String::new(),
                };
                rest.push_str(&stop.finish());
                Some((Ok(rest), None))
            }
            Some(Err(err)) => Some((Err(err), None)),
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReasoningState {
    Undecided,
    Thinking,
    Passing,
}

/// Hides a leading `<think>...</think>` block.
///
/// Unlike [`StopFilter`] this looks for the closing tag anywhere in the text
/// accumulated since the block opened.  Responses that do not open with
/// `<think>` pass through unchanged.
#[derive(Debug, Clone)]
pub struct ReasoningFilter {
    state: ReasoningState,
    buffer: String,
}

impl ReasoningFilter {
    /// Create a filter waiting for the start of the response.
    pub fn new() -> Self {
        Self {
            state: ReasoningState::Undecided,
            buffer: String::new(),
        }
    }

    /// Whether the filter is inside a reasoning block.
    pub fn is_thinking(&self) -> bool {
        self.state == ReasoningState::Thinking
    }

    /// Feed one fragment and return the visible part.
    pub fn push(&mut self, fragment: &str) -> String {
        match self.state {
            ReasoningState::Passing => fragment.to_string(),
            ReasoningState::Undecided => {
                self.buffer.push_str(fragment);
                let trimmed = self.buffer.trim_start();
                if trimmed.starts_with(THINK_OPEN) {
                    self.state = ReasoningState::Thinking;
                    self.close_block(self.buffer.len())
                } else if THINK_OPEN.starts_with(trimmed) {
                    String::new()
                } else {
                    self.state = ReasoningState::Passing;
                    std::mem::take(&mut self.buffer)
                }
            }
            ReasoningState::Thinking => {
                self.buffer.push_str(fragment);
                self.close_block(fragment.len() + THINK_CLOSE.len())
            }
        }
    }

    /// Release text held while deciding whether a block opens.
    ///
    /// An unterminated reasoning block stays hidden.
    pub fn finish(&mut self) -> String {
        match self.state {
            ReasoningState::Undecided => std::mem::take(&mut self.buffer),
            ReasoningState::Thinking | ReasoningState::Passing => String::new(),
        }
    }

    /// Look for the closing tag in the last `window` bytes of the buffer.
    fn close_block(&mut self, window: usize) -> String {
        let mut start = self.buffer.len().saturating_sub(window);
        while !self.buffer.is_char_boundary(start) {
            start -= 1;
        }
        let Some(idx) = self.buffer[start..].find(THINK_CLOSE) else {
            return String::new();
        };
        let rest = self.buffer[start + idx + THINK_CLOSE.len()..]
            .trim_start_matches(['\r', '\n'])
            .to_string();
        self.buffer.clear();
        self.state = ReasoningState::Passing;
        rest
    }
}

impl Default for ReasoningFilter {
    fn default() -> Self {
        Self::new()
    }
}
