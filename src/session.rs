//! One prompt/response exchange.
//!
//! A [`Session`] parses the prompt, builds the request, streams the response
//! through the reasoning and stop filters to the console (and the tee file when
//! there is one), and finally hands a [`SessionResult`] to the audit log.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use futures::StreamExt;
use tokio::sync::Notify;

use crate::audit::{AuditLog, record_best_effort};
use crate::builder::{RequestInput, RequestOptions, build};
use crate::client::{Provider, UNKNOWN_MODEL};
use crate::config::Config;
use crate::error::{Error, Result};
use crate::markup::{MarkupOptions, parse};
use crate::observability::{
    SESSIONS, SESSIONS_FAILED, SESSIONS_INTERRUPTED, STREAM_DURATION, STREAM_TTFB,
};
use crate::render::{INTERRUPTED_MARKER, Renderer, TeeFile};
use crate::stop::{ReasoningFilter, StopFilter, filter_stream};
use crate::types::{Mode, Request, SessionResult, Turn};

/// A cancellation signal shared between a Ctrl-C handler and a running session.
///
/// Triggering is sticky: once set, every later wait returns immediately.
#[derive(Clone, Debug, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Interrupt {
    /// A signal that has not fired.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire the signal.  Safe to call from any thread.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Whether the signal has fired.
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Wait until the signal fires.
    pub async fn wait(&self) {
        if self.is_triggered() {
            return;
        }
        self.notify.notified().await;
    }
}

/// How a session shapes its requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Markup interpretation of the prompt.
    pub markup: MarkupOptions,

    /// Request payload options; the stop markers also drive the stop filter.
    pub request: RequestOptions,

    /// Hide a leading reasoning block.
    pub hide_thinking: bool,
}

impl SessionConfig {
    /// A configuration with default markup for `request`.
    pub fn new(request: RequestOptions) -> Self {
        Self {
            markup: MarkupOptions::default(),
            request,
            hide_thinking: false,
        }
    }

    /// Sets the markup options.
    pub fn with_markup(mut self, markup: MarkupOptions) -> Self {
        self.markup = markup;
        self
    }

    /// Sets whether a leading reasoning block is hidden.
    pub fn with_hide_thinking(mut self, hide_thinking: bool) -> Self {
        self.hide_thinking = hide_thinking;
        self
    }

    /// Adds stop markers.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        self.request.stop.extend(stop);
        self
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        SessionConfig::new(config.request_options(&[]))
            .with_markup(config.markup)
            .with_hide_thinking(config.hide_thinking)
    }
}

/// What happened in an exchange.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    /// The record handed to the audit log.
    pub result: SessionResult,

    /// The failure that ended the exchange, if any.
    pub error: Option<Error>,
}

impl SessionOutcome {
    /// Everything delivered to the user.
    pub fn text(&self) -> &str {
        self.result.response.as_deref().unwrap_or_default()
    }

    /// Whether the user cancelled the exchange.
    pub fn is_interrupted(&self) -> bool {
        self.result.interrupted
    }

    /// Whether the exchange ended without error.  Interruption is not an error.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Runs exchanges against a provider.
pub struct Session<P: Provider> {
    provider: P,
    config: SessionConfig,
    audit: Option<Arc<dyn AuditLog>>,
}

impl<P: Provider> Session<P> {
    /// A session without auditing.
    pub fn new(provider: P, config: SessionConfig) -> Self {
        Self {
            provider,
            config,
            audit: None,
        }
    }

    /// Sets the audit log.
    pub fn with_audit(mut self, audit: Option<Arc<dyn AuditLog>>) -> Self {
        self.audit = audit;
        self
    }

    /// The session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run one exchange for the prompt document `raw`.
    ///
    /// # Errors
    ///
    /// Invalid input or configuration is returned before any network activity
    /// and is not audited.  Every later failure is reported in the outcome.
    pub async fn run(
        &self,
        raw: &str,
        renderer: &mut dyn Renderer,
        tee: Option<&mut TeeFile>,
        interrupt: &Interrupt,
    ) -> Result<SessionOutcome> {
        let turns = parse(raw, &self.config.markup)?;
        let raw_completion =
            self.config.request.mode == Mode::Completion && !self.config.markup.use_markup;
        let input = if raw_completion {
            RequestInput::Raw(raw.to_string())
        } else {
            RequestInput::Turns(turns)
        };
        self.exchange(raw, input, renderer, tee, interrupt).await
    }

    /// Run one exchange for a conversation built elsewhere.
    ///
    /// `request_text` is what gets recorded as the request.
    pub async fn run_turns(
        &self,
        request_text: &str,
        turns: Vec<Turn>,
        renderer: &mut dyn Renderer,
        tee: Option<&mut TeeFile>,
        interrupt: &Interrupt,
    ) -> Result<SessionOutcome> {
        self.exchange(
            request_text,
            RequestInput::Turns(turns),
            renderer,
            tee,
            interrupt,
        )
        .await
    }

    async fn exchange(
        &self,
        request_text: &str,
        input: RequestInput,
        renderer: &mut dyn Renderer,
        tee: Option<&mut TeeFile>,
        interrupt: &Interrupt,
    ) -> Result<SessionOutcome> {
        let request = build(input, &self.config.request)?;
        SESSIONS.click();
        let model = tokio::select! {
            biased;
            _ = interrupt.wait() => UNKNOWN_MODEL.to_string(),
            model = self.provider.model_name() => model,
        };
        tracing::debug!(%model, mode = %request.mode(), "starting exchange");

        if request.mode() == Mode::Completion {
            renderer.print_prompt(request_text);
        }

        let mut delivered = String::new();
        let start = Instant::now();
        let pumped = self
            .pump(&request, renderer, tee, interrupt, &mut delivered)
            .await;
        STREAM_DURATION.add(start.elapsed().as_secs_f64());

        let (error, interrupted) = match pumped {
            Ok(()) => (None, false),
            Err(Error::Interrupted) => (None, true),
            Err(err) => (Some(err), false),
        };
        renderer.finish_response();
        if interrupted {
            SESSIONS_INTERRUPTED.click();
        }
        if let Some(err) = &error {
            SESSIONS_FAILED.click();
            tracing::debug!(error = %err, delivered = delivered.len(), "exchange failed");
            renderer.print_error(&err.to_string());
        }

        let response = if delivered.is_empty() && error.is_some() {
            None
        } else {
            Some(delivered)
        };
        let result = SessionResult {
            model,
            mode: request.mode(),
            request: request_text.to_string(),
            response,
            error: error.as_ref().map(ToString::to_string),
            interrupted,
        };
        if let Some(audit) = &self.audit {
            record_best_effort(audit.as_ref(), &result);
        }
        Ok(SessionOutcome { result, error })
    }

    /// Stream the response to the sinks.
    ///
    /// Fails with [`Error::Interrupted`] once the user cancels, whether the
    /// response has started or not.
    async fn pump(
        &self,
        request: &Request,
        renderer: &mut dyn Renderer,
        mut tee: Option<&mut TeeFile>,
        interrupt: &Interrupt,
        delivered: &mut String,
    ) -> Result<()> {
        let start = Instant::now();
        let events = tokio::select! {
            biased;
            _ = interrupt.wait() => None,
            events = self.provider.stream(request) => Some(events),
        };
        let Some(events) = events else {
            return Err(mark_interrupted(renderer, &mut tee, delivered));
        };
        let mut text = Box::pin(filter_stream(
            events?,
            self.config.hide_thinking.then(ReasoningFilter::new),
            StopFilter::new(self.config.request.stop.iter().cloned()),
        ));
        let mut first = true;

        loop {
            let next = tokio::select! {
                biased;
                _ = interrupt.wait() => None,
                item = text.next() => Some(item),
            };
            match next {
                None => return Err(mark_interrupted(renderer, &mut tee, delivered)),
                Some(Some(Ok(safe))) => {
                    if first {
                        STREAM_TTFB.add(start.elapsed().as_secs_f64());
                        first = false;
                    }
                    deliver(&safe, renderer, &mut tee, delivered)?;
                }
                Some(Some(Err(err))) => return Err(err),
                Some(None) => return Ok(()),
            }
        }
    }
}

/// Send `text` to every sink and record it as delivered.
fn deliver(
    text: &str,
    renderer: &mut dyn Renderer,
    tee: &mut Option<&mut TeeFile>,
    delivered: &mut String,
) -> Result<()> {
    if text.is_empty() {
        return Ok(());
    }
    renderer.print_text(text);
    if let Some(tee) = tee.as_deref_mut() {
        tee.write(text)?;
    }
    delivered.push_str(text);
    Ok(())
}

/// Append the interruption marker to every sink.
///
/// Returns [`Error::Interrupted`], or the tee failure if the marker could not
/// be written there.  Withheld text is dropped.
fn mark_interrupted(
    renderer: &mut dyn Renderer,
    tee: &mut Option<&mut TeeFile>,
    delivered: &mut String,
) -> Error {
    tracing::debug!("interrupted by user");
    renderer.print_interrupted();
    delivered.push_str(INTERRUPTED_MARKER);
    if let Some(tee) = tee.as_deref_mut()
        && let Err(err) = tee.write(INTERRUPTED_MARKER)
    {
        return err;
    }
    Error::Interrupted
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::{future, stream};

    use super::*;
    use crate::client::EventStream;
    use crate::render::PlainTextRenderer;
    use crate::types::{Backend, Role, StreamEvent};

    #[derive(Default)]
    struct FakeProvider {
        fragments: Vec<&'static str>,
        fail: Option<Error>,
        fail_after: Option<Error>,
        hang: bool,
        stall_headers: bool,
        stall_model: bool,
        seen: Mutex<Vec<Request>>,
    }

    impl FakeProvider {
        fn with_fragments(fragments: &[&'static str]) -> Self {
            Self {
                fragments: fragments.to_vec(),
                ..Default::default()
            }
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        async fn stream(&self, request: &Request) -> Result<EventStream> {
            self.seen.lock().unwrap().push(request.clone());
            if self.stall_headers {
                future::pending::<()>().await;
            }
            if let Some(err) = &self.fail {
                return Err(err.clone());
            }
            let events = stream::iter(
                self.fragments
                    .iter()
                    .map(|f| Ok::<_, Error>(StreamEvent::fragment(*f)))
                    .collect::<Vec<_>>(),
            );
            let tail: EventStream = if self.hang {
                Box::pin(stream::pending::<Result<StreamEvent>>())
            } else if let Some(err) = &self.fail_after {
                Box::pin(stream::iter(vec![Err::<StreamEvent, _>(err.clone())]))
            } else {
                Box::pin(stream::iter(vec![Ok::<_, Error>(StreamEvent::End)]))
            };
            Ok(Box::pin(events.chain(tail)))
        }

        async fn model_name(&self) -> String {
            if self.stall_model {
                future::pending::<()>().await;
            }
            "fake-model".to_string()
        }
    }

    #[derive(Default)]
    struct MemoryLog(Mutex<Vec<SessionResult>>);

    impl AuditLog for MemoryLog {
        fn record(&self, result: &SessionResult) -> Result<()> {
            self.0.lock().unwrap().push(result.clone());
            Ok(())
        }
    }

    struct FailingLog;

    impl AuditLog for FailingLog {
        fn record(&self, _: &SessionResult) -> Result<()> {
            Err(Error::logging("disk full", None))
        }
    }

    fn chat() -> SessionConfig {
        SessionConfig::new(RequestOptions::new(Backend::LlamaCpp, Mode::Chat))
    }

    fn console() -> PlainTextRenderer<Vec<u8>> {
        PlainTextRenderer::with_writer(Vec::new(), false)
    }

    fn printed(renderer: &PlainTextRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.get_ref().clone()).unwrap()
    }

    #[tokio::test]
    async fn chat_exchange_is_audited() {
        let provider = FakeProvider::with_fragments(&["Marisa is", " a witch."]);
        let log = Arc::new(MemoryLog::default());
        let session = Session::new(provider, chat()).with_audit(Some(log.clone()));
        let mut renderer = console();

        let outcome = session
            .run("who is Marisa", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.text(), "Marisa is a witch.");
        assert_eq!(printed(&renderer), "Marisa is a witch.\n");

        let records = log.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].model, "fake-model");
        assert_eq!(records[0].mode, Mode::Chat);
        assert_eq!(records[0].request, "who is Marisa");
        assert_eq!(records[0].response.as_deref(), Some("Marisa is a witch."));
        assert!(!records[0].interrupted);

        let seen = session.provider.seen.lock().unwrap();
        let Request::Chat(chat) = &seen[0] else {
            panic!("expected a chat request");
        };
        let roles: Vec<Role> = chat.messages.iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn stop_marker_ends_output() {
        let provider =
            FakeProvider::with_fragments(&["The cat", " sat", "<|rew", "rite-end|>", " ignored"]);
        let config = chat().with_stop(vec!["<|rewrite-end|>".to_string()]);
        let session = Session::new(provider, config);
        let mut renderer = console();
        let outcome = session
            .run("story", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(outcome.text(), "The cat sat");
        assert_eq!(printed(&renderer), "The cat sat\n");
    }

    #[tokio::test]
    async fn completion_mode_echoes_prompt() {
        let provider = FakeProvider::with_fragments(&[" there was", " a cat."]);
        let config = SessionConfig::new(RequestOptions::new(Backend::LlamaCpp, Mode::Completion))
            .with_markup(MarkupOptions::new().with_markup(false));
        let session = Session::new(provider, config);
        let mut renderer = console();
        let outcome = session
            .run("Once upon a time", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(outcome.text(), " there was a cat.");
        assert_eq!(outcome.result.mode, Mode::Completion);
        assert_eq!(printed(&renderer), "Once upon a time there was a cat.\n");

        let seen = session.provider.seen.lock().unwrap();
        let Request::Completion(completion) = &seen[0] else {
            panic!("expected a completion request");
        };
        assert_eq!(completion.prompt, "Once upon a time");
    }

    #[tokio::test]
    async fn interrupt_appends_marker_and_drops_withheld_text() {
        let provider = FakeProvider {
            fragments: vec!["Hello ", "<|re"],
            hang: true,
            ..Default::default()
        };
        let config = chat().with_stop(vec!["<|rewrite-end|>".to_string()]);
        let log = Arc::new(MemoryLog::default());
        let session = Session::new(provider, config).with_audit(Some(log.clone()));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "<usr> hi\n<ai>").unwrap();
        let mut tee = TeeFile::open(&path).unwrap();

        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let mut renderer = console();
        let outcome = session
            .run("<usr> hi\n<ai>", &mut renderer, Some(&mut tee), &interrupt)
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.is_interrupted());
        assert_eq!(outcome.text(), "Hello \n[interrupted]\n");
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "<usr> hi\n<ai>Hello \n[interrupted]\n"
        );
        assert!(log.0.lock().unwrap()[0].interrupted);
    }

    #[tokio::test]
    async fn transport_error_is_reported_and_audited() {
        let provider = FakeProvider {
            fail: Some(Error::transport(Some(500), "model not loaded", None)),
            ..Default::default()
        };
        let log = Arc::new(MemoryLog::default());
        let session = Session::new(provider, chat()).with_audit(Some(log.clone()));
        let mut renderer = console();
        let outcome = session
            .run("hi", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap();
        let err = outcome.error.as_ref().unwrap();
        assert_eq!(err.status_code(), Some(500));
        assert_eq!(outcome.result.response, None);

        let records = log.0.lock().unwrap();
        assert_eq!(
            records[0].error.as_deref(),
            Some("Transport error: HTTP 500: model not loaded")
        );
    }

    #[tokio::test]
    async fn audit_failures_are_swallowed() {
        let provider = FakeProvider::with_fragments(&["ok"]);
        let session = Session::new(provider, chat()).with_audit(Some(Arc::new(FailingLog)));
        let mut renderer = console();
        let outcome = session
            .run("hi", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.text(), "ok");
    }

    #[tokio::test]
    async fn invalid_input_fails_before_the_request() {
        let session = Session::new(FakeProvider::default(), chat());
        let mut renderer = console();
        let err = session
            .run("  \n", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap_err();
        assert!(err.is_invalid_input());
        assert!(session.provider.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hidden_reasoning_runs_before_stop_filter() {
        let provider = FakeProvider::with_fragments(&[
            "<think>maybe END here</think>\n",
            "Four",
            "END",
            "more",
        ]);
        let config = chat()
            .with_stop(vec!["END".to_string()])
            .with_hide_thinking(true);
        let session = Session::new(provider, config);
        let mut renderer = console();
        let outcome = session
            .run("2+2?", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap();
        assert_eq!(outcome.text(), "Four");
    }

    #[test]
    fn interrupt_wait_pends_until_triggered() {
        let interrupt = Interrupt::new();
        let mut wait = tokio_test::task::spawn(interrupt.wait());
        tokio_test::assert_pending!(wait.poll());
        interrupt.trigger();
        assert!(wait.is_woken());
        tokio_test::assert_ready!(wait.poll());
    }

    #[tokio::test]
    async fn interrupt_before_start_delivers_only_marker() {
        let provider = FakeProvider::with_fragments(&["never shown"]);
        let session = Session::new(provider, chat());
        let interrupt = Interrupt::new();
        interrupt.trigger();
        assert!(interrupt.is_triggered());
        let mut renderer = console();
        let outcome = session
            .run("hi", &mut renderer, None, &interrupt)
            .await
            .unwrap();
        assert_eq!(outcome.text(), INTERRUPTED_MARKER);
    }

    #[tokio::test]
    async fn interrupt_while_waiting_for_headers() {
        let provider = FakeProvider {
            stall_headers: true,
            ..Default::default()
        };
        let log = Arc::new(MemoryLog::default());
        let session = Session::new(provider, chat()).with_audit(Some(log.clone()));

        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let mut renderer = console();
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            session.run("hi", &mut renderer, None, &interrupt),
        )
        .await
        .expect("the interrupt ends the exchange")
        .unwrap();
        assert!(outcome.is_success());
        assert!(outcome.is_interrupted());
        assert_eq!(outcome.text(), INTERRUPTED_MARKER);
        assert_eq!(session.provider.seen.lock().unwrap().len(), 1);

        let records = log.0.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert!(records[0].interrupted);
        assert_eq!(records[0].model, "fake-model");
    }

    #[tokio::test]
    async fn interrupt_during_model_lookup() {
        let provider = FakeProvider {
            stall_model: true,
            fragments: vec!["never shown"],
            ..Default::default()
        };
        let log = Arc::new(MemoryLog::default());
        let session = Session::new(provider, chat()).with_audit(Some(log.clone()));

        let interrupt = Interrupt::new();
        let trigger = interrupt.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.trigger();
        });

        let mut renderer = console();
        let outcome = tokio::time::timeout(
            Duration::from_secs(2),
            session.run("hi", &mut renderer, None, &interrupt),
        )
        .await
        .expect("the interrupt ends the exchange")
        .unwrap();
        assert!(outcome.is_interrupted());
        assert_eq!(outcome.text(), INTERRUPTED_MARKER);
        assert_eq!(outcome.result.model, UNKNOWN_MODEL);
        assert!(session.provider.seen.lock().unwrap().is_empty());
        assert_eq!(log.0.lock().unwrap()[0].model, UNKNOWN_MODEL);
    }

    #[tokio::test]
    async fn decode_error_keeps_partial_response() {
        let provider = FakeProvider {
            fragments: vec!["The cat", " sat"],
            fail_after: Some(Error::stream_decode("bad json", "The cat sat", None)),
            ..Default::default()
        };
        let log = Arc::new(MemoryLog::default());
        let session = Session::new(provider, chat()).with_audit(Some(log.clone()));
        let mut renderer = console();
        let outcome = session
            .run("story", &mut renderer, None, &Interrupt::new())
            .await
            .unwrap();

        assert!(!outcome.is_success());
        assert!(!outcome.is_interrupted());
        assert!(outcome.error.as_ref().unwrap().is_stream_decode());
        assert_eq!(outcome.text(), "The cat sat");
        assert_eq!(printed(&renderer), "The cat sat\n");

        let records = log.0.lock().unwrap();
        assert_eq!(records[0].response.as_deref(), Some("The cat sat"));
        assert_eq!(
            records[0].error.as_deref(),
            Some("Stream decode error: bad json")
        );
    }
}
