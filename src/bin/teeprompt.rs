//! Send a prompt to a local llama.cpp or Ollama server and stream the reply.
//!
//! # Usage
//!
//! ```bash
//! # Ask a question
//! teeprompt who is Marisa
//!
//! # Continue a conversation kept in a file, appending the reply to it
//! teeprompt --file chat.txt --tee
//!
//! # Raw completion against Ollama
//! teeprompt --backend ollama --model qwen3 --raw "Once upon a time"
//!
//! # Rewrite lines 10..14 of a source file
//! teeprompt --file src/main.rs --rewrite 10..14 "use a match instead"
//!
//! # The same, showing the prompt and fencing the reply
//! teeprompt --file src/main.rs --rewrite 10..14 --verbose "use a match instead"
//!
//! # Show the last five audit records as YAML
//! TEEPROMPT_AUDIT_PATH=~/.teeprompt.jsonl teeprompt --history 5 --format yaml
//! ```
//!
//! Ctrl-C stops the response; whatever arrived so far is kept.

use std::error::Error as StdError;
use std::fs;
use std::path::Path;
use std::sync::Arc;

use arrrg::CommandLine;
use tracing_subscriber::EnvFilter;

use teeprompt::config::USAGE;
use teeprompt::utils::time;
use teeprompt::{
    Action, Args, AuditLog, AuditRecord, Config, Error, HttpProvider, Interrupt, Mode,
    OutputFormat, PlainTextRenderer, PromptSource, Renderer, RewriteTemplate, Role, Session,
    SessionConfig, TeeFile,
};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let (args, free) = Args::from_command_line_relaxed(USAGE);
    let code = match run(args, free).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err}");
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args, free: Vec<String>) -> Result<i32, Box<dyn StdError>> {
    let config = Config::from_args(args, free, |key| std::env::var(key).ok())?;
    match &config.action {
        Action::History { count, format } => {
            print_history(&config, *count, *format)?;
            Ok(0)
        }
        Action::Prompt(source) => prompt(&config, source).await,
    }
}

fn read_prompt_file(path: &Path) -> teeprompt::Result<String> {
    fs::read_to_string(path)
        .map_err(|err| Error::io(format!("cannot read {}: {err}", path.display()), err))
}

async fn prompt(config: &Config, source: &PromptSource) -> Result<i32, Box<dyn StdError>> {
    let provider = HttpProvider::new(
        config.backend,
        config.base_url.clone(),
        config.model.clone(),
    )?;
    let audit = config
        .audit
        .clone()
        .map(|log| Arc::new(log) as Arc<dyn AuditLog>);

    let interrupt = Interrupt::new();
    let handler = interrupt.clone();
    ctrlc::set_handler(move || handler.trigger())?;

    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let session_config = SessionConfig::from(config);

    let outcome = match source {
        PromptSource::Literal(text) => {
            let session = Session::new(provider, session_config).with_audit(audit);
            session.run(text, &mut renderer, None, &interrupt).await?
        }
        PromptSource::File { path, tee } => {
            let mut raw = read_prompt_file(path)?;
            if config.mode == Mode::Completion && raw.ends_with('\n') {
                raw.pop();
                if *tee {
                    fs::write(path, &raw).map_err(|err| {
                        Error::io(format!("cannot write {}: {err}", path.display()), err)
                    })?;
                }
            }
            let mut tee_file = if *tee {
                Some(TeeFile::open(path)?)
            } else {
                None
            };
            let session = Session::new(provider, session_config).with_audit(audit);
            session
                .run(&raw, &mut renderer, tee_file.as_mut(), &interrupt)
                .await?
        }
        PromptSource::Rewrite {
            path,
            start,
            end,
            instruction,
        } => {
            let document = read_prompt_file(path)?;
            let template = RewriteTemplate::new(path.display().to_string(), &document)
                .with_todo(config.todo.clone());
            let turns = template.turns(*start, *end, instruction)?;
            if config.verbose
                && let Some(user) = turns.iter().find(|turn| turn.role == Role::User)
            {
                renderer.print_info(&format!("```\n{}\n```\n\ngoes to\n```", user.content));
            }
            let session = Session::new(provider, session_config.with_stop(template.stop()))
                .with_audit(audit);
            let request = format!("{}:{start}..{end}: {instruction}", path.display());
            let outcome = session
                .run_turns(&request, turns, &mut renderer, None, &interrupt)
                .await?;
            if config.verbose {
                renderer.print_info("```");
            }
            outcome
        }
    };
    Ok(if outcome.is_success() { 0 } else { 1 })
}

fn print_history(config: &Config, count: usize, format: OutputFormat) -> teeprompt::Result<()> {
    let Some(audit) = &config.audit else {
        return Err(Error::invalid_config(
            "no audit log configured",
            Some(teeprompt::audit::AUDIT_PATH_ENV.to_string()),
        ));
    };
    let records = audit.recent(count)?;
    match format {
        OutputFormat::Text => {
            for record in &records {
                print_record(record);
            }
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&records)?);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(&records).map_err(|err| {
                Error::logging(format!("YAML error: {err}"), Some(Box::new(err)))
            })?;
            print!("{yaml}");
        }
    }
    Ok(())
}

fn print_record(record: &AuditRecord) {
    let result = &record.result;
    println!(
        "=== {} {} ({}) ===",
        time::format(&record.created_at),
        result.model,
        result.mode
    );
    println!("{}", result.request.trim_end());
    println!("---");
    if let Some(response) = &result.response {
        println!("{}", response.trim_end());
    }
    if let Some(error) = &result.error {
        println!("Error: {error}");
    }
    if result.interrupted {
        println!("[interrupted]");
    }
    println!();
}
