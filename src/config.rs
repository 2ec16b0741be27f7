//! Command-line arguments and the configuration derived from them.
//!
//! [`Args`] is what `arrrg` parses.  [`Config`] is built from it once, together
//! with the environment, validated, and then only read.

use std::path::PathBuf;

use arrrg_derive::CommandLine;
use url::Url;

use crate::audit::JsonlAuditLog;
use crate::builder::{ChatTemplate, RequestOptions};
use crate::client::base_url_from_env;
use crate::error::{Error, Result};
use crate::markup::MarkupOptions;
use crate::rewrite::parse_range;
use crate::types::{Backend, Mode};

/// Environment variable overriding the placeholder for empty rewrite sections.
pub const TODO_ENV: &str = "TEEPROMPT_TODO";

/// Usage line shown by `--help`.
pub const USAGE: &str = "teeprompt [OPTIONS] [PROMPT]";

/// Output format for `--history`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// One human-readable block per record.
    #[default]
    Text,
    /// A JSON array.
    Json,
    /// A YAML sequence.
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    /// Accepts "text", "json", "yaml", or "yml" (case-insensitive).
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            _ => Err(format!(
                "Invalid output format: {}. Valid options: text, json, yaml",
                s
            )),
        }
    }
}

/// Command-line arguments for teeprompt.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct Args {
    /// Server family.
    #[arrrg(optional, "Backend: llama or ollama (default: llama)", "BACKEND")]
    pub backend: Option<String>,

    /// Model name.
    #[arrrg(optional, "Model name (required for ollama)", "MODEL")]
    pub model: Option<String>,

    /// Completion mode without markup.
    #[arrrg(flag, "Send the prompt as a raw completion")]
    pub raw: bool,

    /// Chat mode without markup.
    #[arrrg(flag, "Send the whole prompt as one user message")]
    pub no_markup: bool,

    /// Append the `\no_think` directive.
    #[arrrg(flag, "Ask the model to skip extended reasoning")]
    pub no_think: bool,

    /// Prompt file.
    #[arrrg(optional, "Read the prompt from FILE", "FILE")]
    pub file: Option<String>,

    /// Tee mode.
    #[arrrg(flag, "Append the response to --file")]
    pub tee: bool,

    /// Response length cap.
    #[arrrg(optional, "Maximum tokens to generate (0: server default)", "TOKENS")]
    pub max_tokens: Option<u32>,

    /// Stop marker.
    #[arrrg(optional, "Stop generating at MARKER", "MARKER")]
    pub stop: Option<String>,

    /// Hide reasoning.
    #[arrrg(flag, "Hide a leading <think> block")]
    pub hide_thinking: bool,

    /// Line range to rewrite.
    #[arrrg(optional, "Rewrite lines START..END of --file; PROMPT is the instruction", "RANGE")]
    pub rewrite: Option<String>,

    /// Template for completion mode with markup.
    #[arrrg(optional, "Apply a chat template to --raw prompts: chatml, plain", "TEMPLATE")]
    pub template: Option<String>,

    /// Show recent audit records instead of prompting.
    #[arrrg(optional, "Print the last N audit records", "N")]
    pub history: Option<usize>,

    /// Output format for --history.
    #[arrrg(optional, "History format: text, json, yaml", "FORMAT")]
    pub format: Option<String>,

    /// Plain console output.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Echo the generated rewrite prompt.
    #[arrrg(flag, "Show the prompt built for --rewrite and fence the reply")]
    pub verbose: bool,
}

/// Where the prompt comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptSource {
    /// Given on the command line.
    Literal(String),

    /// Read from a file, optionally teeing the response back into it.
    File {
        /// The prompt file.
        path: PathBuf,
        /// Append the response to the file.
        tee: bool,
    },

    /// Rewrite a line range of a file.
    Rewrite {
        /// The document.
        path: PathBuf,
        /// First line, 1-based.
        start: usize,
        /// Line after the last one rewritten, 1-based.
        end: usize,
        /// What to do with the lines.
        instruction: String,
    },
}

/// What the invocation does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Send a prompt and stream the response.
    Prompt(PromptSource),

    /// Print recent audit records.
    History {
        /// Number of records.
        count: usize,
        /// Output format.
        format: OutputFormat,
    },
}

/// Validated configuration for one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// What to do.
    pub action: Action,
    /// Server family.
    pub backend: Backend,
    /// Completion or chat.
    pub mode: Mode,
    /// Model name.
    pub model: Option<String>,
    /// Markup interpretation.
    pub markup: MarkupOptions,
    /// Template for completion mode, when markup applies there.
    pub template: Option<ChatTemplate>,
    /// Response length cap.
    pub max_tokens: Option<u32>,
    /// Stop markers from the command line.
    pub stop: Vec<String>,
    /// Hide a leading reasoning block.
    pub hide_thinking: bool,
    /// Server base URL.
    pub base_url: Url,
    /// Audit log, if auditing is enabled.
    pub audit: Option<JsonlAuditLog>,
    /// Placeholder override for empty rewrite sections.
    pub todo: Option<String>,
    /// Use ANSI colors on the console.
    pub use_color: bool,
    /// Echo generated prompts.
    pub verbose: bool,
}

fn nonempty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl Config {
    /// Validate `args` and the free arguments, resolving the rest from `env`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for conflicting or missing options.
    pub fn from_args(
        args: Args,
        free: Vec<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let invalid =
            |message: &str, param: &str| Error::invalid_config(message, Some(param.to_string()));

        let backend = match args.backend.as_deref() {
            Some(backend) => backend
                .parse::<Backend>()
                .map_err(|e| invalid(&e, "backend"))?,
            None => Backend::default(),
        };
        let format = match args.format.as_deref() {
            Some(format) => format
                .parse::<OutputFormat>()
                .map_err(|e| invalid(&e, "format"))?,
            None => OutputFormat::default(),
        };
        let template = match args.template.as_deref() {
            Some(template) => Some(
                template
                    .parse::<ChatTemplate>()
                    .map_err(|e| invalid(&e, "template"))?,
            ),
            None => None,
        };
        if template.is_some() && !args.raw {
            return Err(invalid("--template only applies with --raw", "template"));
        }
        if args.verbose && args.rewrite.is_none() {
            return Err(invalid("--verbose only applies with --rewrite", "verbose"));
        }
        if args.raw && args.no_markup {
            return Err(invalid("--raw already disables markup", "no-markup"));
        }
        let stop = match args.stop {
            Some(stop) if stop.is_empty() => {
                return Err(invalid("stop markers must not be empty", "stop"));
            }
            Some(stop) => vec![stop],
            None => Vec::new(),
        };

        let literal = if free.is_empty() {
            None
        } else {
            Some(free.join(" "))
        };
        let file = nonempty(args.file).map(PathBuf::from);

        let action = if let Some(count) = args.history {
            if literal.is_some() || file.is_some() || args.rewrite.is_some() {
                return Err(invalid("--history does not take a prompt", "history"));
            }
            Action::History { count, format }
        } else if let Some(range) = args.rewrite {
            let (start, end) = parse_range(&range)?;
            let Some(path) = file else {
                return Err(invalid("--rewrite needs --file", "rewrite"));
            };
            let Some(instruction) = literal else {
                return Err(invalid("--rewrite needs an instruction", "rewrite"));
            };
            if args.raw {
                return Err(invalid("--rewrite uses chat mode", "raw"));
            }
            if args.tee {
                return Err(invalid("--rewrite cannot be combined with --tee", "tee"));
            }
            Action::Prompt(PromptSource::Rewrite {
                path,
                start,
                end,
                instruction,
            })
        } else {
            match (literal, file) {
                (Some(_), Some(_)) => {
                    return Err(invalid(
                        "a literal prompt and --file are mutually exclusive",
                        "file",
                    ));
                }
                (Some(_), None) if args.tee => {
                    return Err(invalid("--tee needs --file", "tee"));
                }
                (Some(text), None) => Action::Prompt(PromptSource::Literal(text)),
                (None, Some(path)) => Action::Prompt(PromptSource::File {
                    path,
                    tee: args.tee,
                }),
                (None, None) => {
                    return Err(invalid("no prompt given; pass PROMPT or --file", "file"));
                }
            }
        };

        let mode = if args.raw { Mode::Completion } else { Mode::Chat };
        let use_markup = if args.raw {
            template.is_some()
        } else {
            !args.no_markup
        };
        let markup = MarkupOptions::new()
            .with_markup(use_markup)
            .with_no_think(args.no_think);

        Ok(Self {
            action,
            backend,
            mode,
            model: nonempty(args.model),
            markup,
            template,
            max_tokens: args.max_tokens,
            stop,
            hide_thinking: args.hide_thinking,
            base_url: base_url_from_env(backend, &env)?,
            audit: JsonlAuditLog::from_env(&env),
            todo: nonempty(env(TODO_ENV)),
            use_color: !args.no_color,
            verbose: args.verbose,
        })
    }

    /// Request options for this configuration, with `extra_stop` appended.
    pub fn request_options(&self, extra_stop: &[String]) -> RequestOptions {
        let mut stop = self.stop.clone();
        stop.extend(extra_stop.iter().cloned());
        RequestOptions::new(self.backend, self.mode)
            .with_model(self.model.clone())
            .with_max_tokens(self.max_tokens)
            .with_stop(stop)
            .with_template(self.template.unwrap_or_default())
    }
}
