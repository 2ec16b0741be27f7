//! Conversations that ask the model to rewrite part of a document.
//!
//! The selected lines are fenced with [`REWRITE_START`] and [`REWRITE_END`]
//! inside the full document, and the assistant turn is pre-filled with an
//! acknowledgement that ends in [`REWRITE_START`], so the model's reply is the
//! replacement text followed by [`REWRITE_END`].  That closing tag is the only
//! stop marker.

use crate::error::{Error, Result};
use crate::types::Turn;

/// Opens the section to rewrite.
pub const REWRITE_START: &str = "<|rewrite-start|>";

/// Closes the section to rewrite; also the stop marker for the reply.
pub const REWRITE_END: &str = "<|rewrite-end|>";

const SYSTEM: &str = "You are a helpful assistant.";

const ACKNOWLEDGEMENT: &str = "I understood I need to rewrite the text. Here is the new version\n";

/// A document and the template used to ask for a rewrite of some of its lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewriteTemplate {
    filename: String,
    lines: Vec<String>,
    todo: Option<String>,
}

impl RewriteTemplate {
    /// Wrap `document`, shown to the model under `filename`.
    pub fn new(filename: impl Into<String>, document: &str) -> Self {
        Self {
            filename: filename.into(),
            lines: document.lines().map(str::to_string).collect(),
            todo: None,
        }
    }

    /// Override the placeholder inserted into an empty section.
    ///
    /// The default is `// TODO: {instruction}`.
    pub fn with_todo(mut self, todo: Option<String>) -> Self {
        self.todo = todo;
        self
    }

    /// Number of lines in the document.
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Stop markers for the reply.
    pub fn stop(&self) -> Vec<String> {
        vec![REWRITE_END.to_string()]
    }

    fn placeholder(&self, instruction: &str) -> String {
        match &self.todo {
            Some(todo) => todo.clone(),
            None => format!("// TODO: {instruction}"),
        }
    }

    /// Build the conversation asking to rewrite lines `start..end`.
    ///
    /// Lines are numbered from 1 and `end` is excluded.  The line at `end`
    /// must exist because the closing tag is placed in front of it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] when the range is empty, starts at
    /// zero or runs past the document.
    pub fn turns(&self, start: usize, end: usize, instruction: &str) -> Result<Vec<Turn>> {
        if start == 0 || start >= end || end > self.lines.len() {
            return Err(Error::invalid_config(
                format!(
                    "invalid line range {start}..{end} for a document of {} lines",
                    self.lines.len()
                ),
                Some("rewrite".to_string()),
            ));
        }
        let (start, end) = (start - 1, end - 1);

        let mut lines = self.lines.clone();
        let mut raw_section = lines[start..end].join("\n");
        if raw_section.trim().is_empty() {
            lines[start].push_str(&self.placeholder(instruction));
            raw_section = lines[start..end].join("\n");
        }
        let section = format!("{REWRITE_START}\n{raw_section}\n{REWRITE_END}");
        lines[start] = format!("{REWRITE_START}\n{}", lines[start]);
        lines[end] = format!("{REWRITE_END}\n{}", lines[end]);
        let content = lines.join("\n");

        let user = format!(
            "* You will be given a document named `{filename}` whose content will be placed between `<|document-start|>` and `<|document-end|>` tags.\n\
             * Your task is to rewrite a part of the given document according to the instruction that will be placed between `<|instruction-start|>` and `<|instruction-end|>` tags.\n\
             * The part that needs to be rewritten is marked with `{REWRITE_START}` and `{REWRITE_END}` tags.\n\
             * Examine the context of the document before and after the part that needs to be rewritten.\n\
             * Your reply must start with an acknowledgement of the task, followed by `{REWRITE_START}`.\n\
             * Your reply must end with `{REWRITE_END}`.\n\
             * Your reply must contain only the rewritten part. No additional commentary is required.\n\
             * Rewrite only the selected section, not the text before or after it.\n\
             * The output will be pasted in place of the original part.\n\
             \n\
             <|document-start|>\n\
             {content}\n\
             <|document-end|>\n\
             \n\
             Instruction:\n\
             <|instruction-start|>\n\
             {instruction}\n\
             <|instruction-end|>\n\
             \n\
             Section to rewrite:\n\
             {section}",
            filename = self.filename,
        );
        tracing::debug!(filename = %self.filename, start, end, "built rewrite prompt");

        Ok(vec![
            Turn::system(SYSTEM),
            Turn::user(user),
            Turn::assistant(format!("{ACKNOWLEDGEMENT}{REWRITE_START}\n")),
        ])
    }
}

/// Parse a `START..END` line range.
pub fn parse_range(range: &str) -> Result<(usize, usize)> {
    let invalid = || {
        Error::invalid_config(
            format!("expected START..END, got {range:?}"),
            Some("rewrite".to_string()),
        )
    };
    let (start, end) = range.split_once("..").ok_or_else(invalid)?;
    let start = start.trim().parse::<usize>().map_err(|_| invalid())?;
    let end = end.trim().parse::<usize>().map_err(|_| invalid())?;
    Ok((start, end))
}
