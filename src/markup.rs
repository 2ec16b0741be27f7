//! Conversation markup.
//!
//! A prompt document is plain text in which a line may open a new turn with a
//! role marker:
//!
//! ```text
//! <sys> You are terse.
//! <usr>: Summarize this:
//! a long paragraph
//! that spans lines
//! <ai>
//! ```
//!
//! Markers are matched case-insensitively at the start of a line.  After the
//! marker an optional `:` and then a single optional space are consumed; the
//! remainder of the line (newline included) starts the turn's content.  Lines
//! without a marker continue the turn that is currently open.
//!
//! Parsing always yields a conversation the model can continue: it begins with
//! a system turn and ends with an assistant turn, either of which is
//! synthesized when the document does not provide it.

use crate::error::{Error, Result};
use crate::types::{Role, Turn};

/// System prompt used when the document does not open with a system turn.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant";

/// Directive appended when extended reasoning is disabled.
pub const NO_THINK_DIRECTIVE: &str = "\\no_think";

const ROLE_MARKERS: &[(&str, Role)] = &[
    ("<sys>", Role::System),
    ("<system>", Role::System),
    ("<usr>", Role::User),
    ("<user>", Role::User),
    ("<ai>", Role::Assistant),
    ("<assistant>", Role::Assistant),
];

/// Controls how a prompt document is turned into turns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkupOptions {
    /// Interpret role markers.  When false the whole document is one user turn.
    pub use_markup: bool,

    /// Append the no-think directive to the last turn.
    pub no_think: bool,
}

impl MarkupOptions {
    /// Markup enabled, reasoning left to the model.
    pub fn new() -> Self {
        Self {
            use_markup: true,
            no_think: false,
        }
    }

    /// Sets whether role markers are interpreted.
    pub fn with_markup(mut self, use_markup: bool) -> Self {
        self.use_markup = use_markup;
        self
    }

    /// Sets whether the no-think directive is appended.
    pub fn with_no_think(mut self, no_think: bool) -> Self {
        self.no_think = no_think;
        self
    }
}

impl Default for MarkupOptions {
    fn default() -> Self {
        Self::new()
    }
}

/// Match a role marker at the start of `line`.
///
/// Returns the role and the rest of the line with the marker, an optional `:`
/// and one optional space removed.
pub fn match_role_marker(line: &str) -> Option<(Role, &str)> {
    for (marker, role) in ROLE_MARKERS {
        let Some(head) = line.get(..marker.len()) else {
            continue;
        };
        if !head.eq_ignore_ascii_case(marker) {
            continue;
        }
        let rest = &line[marker.len()..];
        let rest = rest.strip_prefix(':').unwrap_or(rest);
        let rest = rest.strip_prefix(' ').unwrap_or(rest);
        return Some((*role, rest));
    }
    None
}

/// Parse a prompt document into an ordered list of turns.
///
/// # Errors
///
/// Returns [`Error::InvalidInput`] when the document is empty or contains only
/// whitespace.
pub fn parse(raw: &str, options: &MarkupOptions) -> Result<Vec<Turn>> {
    if raw.trim().is_empty() {
        return Err(Error::invalid_input("prompt is empty"));
    }
    if !options.use_markup {
        return Ok(vec![Turn::user(raw)]);
    }

    let mut turns: Vec<Turn> = Vec::new();
    for line in raw.split_inclusive('\n') {
        if let Some((role, rest)) = match_role_marker(line) {
            turns.push(Turn::new(role, rest));
        } else if let Some(open) = turns.last_mut() {
            open.content.push_str(line);
        } else {
            turns.push(Turn::user(line));
        }
    }

    if options.no_think
        && let Some(open) = turns.last_mut()
    {
        if !open.content.is_empty() && !open.content.ends_with('\n') {
            open.content.push('\n');
        }
        open.content.push_str(NO_THINK_DIRECTIVE);
    }

    if turns.first().map(|t| t.role) != Some(Role::System) {
        turns.insert(0, Turn::system(DEFAULT_SYSTEM_PROMPT));
    }
    if turns.last().map(|t| t.role) != Some(Role::Assistant) {
        turns.push(Turn::assistant(""));
    }
    Ok(turns)
}
