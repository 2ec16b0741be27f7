/// A discrete unit decoded from the response stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental piece of generated text.  May be empty, may contain newlines.
    Fragment(String),

    /// The provider signalled completion.
    End,
}

impl StreamEvent {
    /// Create a fragment event.
    pub fn fragment(text: impl Into<String>) -> Self {
        StreamEvent::Fragment(text.into())
    }

    /// The fragment text, if this is a fragment.
    pub fn text(&self) -> Option<&str> {
        match self {
            StreamEvent::Fragment(text) => Some(text),
            StreamEvent::End => None,
        }
    }
}
