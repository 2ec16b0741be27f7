use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::Stream;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use url::Url;

use crate::error::{Error, Result};
use crate::observability::{
    CLIENT_DISCOVERY_FAILURES, CLIENT_REQUEST_DURATION, CLIENT_REQUEST_ERRORS, CLIENT_REQUESTS,
};
use crate::sse::decode_stream;
use crate::types::{Backend, ModelInfo, Request, StreamEvent};

/// Environment variable holding a full base URL that overrides the port lookup.
pub const BASE_URL_ENV: &str = "TEEPROMPT_BASE_URL";

/// Model name recorded when the provider cannot tell us.
pub const UNKNOWN_MODEL: &str = "unknown";

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// A boxed stream of decoded events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;

/// Something that can run a request and stream back the generated text.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send `request` and return the decoded event stream.
    ///
    /// Fails with a transport error if the server cannot be reached or does not
    /// answer with a success status.
    async fn stream(&self, request: &Request) -> Result<EventStream>;

    /// The model identifier used to attribute audit records.
    ///
    /// Never fails; falls back to [`UNKNOWN_MODEL`].
    async fn model_name(&self) -> String;
}

/// Resolve the base URL for `backend`.
///
/// [`BASE_URL_ENV`] wins when set; otherwise `http://localhost:{port}/` where
/// the port comes from the backend's port variable or its default.
pub fn base_url_from_env(
    backend: Backend,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Url> {
    if let Some(base) = lookup(BASE_URL_ENV).filter(|b| !b.trim().is_empty()) {
        return Ok(Url::parse(base.trim())?);
    }
    let port = match lookup(backend.port_env()).filter(|p| !p.trim().is_empty()) {
        Some(port) => port.trim().parse::<u16>().map_err(|_| {
            Error::invalid_config(
                format!("invalid port {port:?}"),
                Some(backend.port_env().to_string()),
            )
        })?,
        None => backend.default_port(),
    };
    Ok(Url::parse(&format!("http://localhost:{port}/"))?)
}

/// Client for a llama.cpp or Ollama server.
#[derive(Debug, Clone)]
pub struct HttpProvider {
    client: ReqwestClient,
    backend: Backend,
    base_url: Url,
    model: Option<String>,
}

impl HttpProvider {
    /// Create a client for `backend` at `base_url`.
    ///
    /// Only the connect phase is bounded by a timeout; generation may stream
    /// for as long as the model keeps producing text.
    pub fn new(backend: Backend, base_url: Url, model: Option<String>) -> Result<Self> {
        let client = ReqwestClient::builder()
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::transport(
                    None,
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Ok(Self {
            client,
            backend,
            base_url,
            model,
        })
    }

    /// The server family this client talks to.
    pub fn backend(&self) -> Backend {
        self.backend
    }

    /// The base URL, always ending in `/`.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn url(&self, path: &str) -> Result<Url> {
        Ok(self.base_url.join(path)?)
    }

    fn default_headers() -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers
    }

    fn send_error(e: reqwest::Error) -> Error {
        if e.is_connect() {
            Error::transport(None, format!("Connection error: {e}"), Some(Box::new(e)))
        } else if e.is_timeout() {
            Error::transport(None, format!("Request timed out: {e}"), Some(Box::new(e)))
        } else {
            Error::transport(None, format!("Request failed: {e}"), Some(Box::new(e)))
        }
    }

    /// Turn a non-success response into a transport error carrying the body.
    async fn process_error_response(response: Response) -> Error {
        let status = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) if !body.trim().is_empty() => body,
            Ok(_) => format!("HTTP {status} with empty body"),
            Err(e) => format!("failed to read error body: {e}"),
        };
        Error::transport(Some(status), body, None)
    }

    async fn discover_model(&self) -> Result<ModelInfo> {
        let response = self
            .client
            .get(self.url("props")?)
            .send()
            .await
            .map_err(Self::send_error)?;
        if !response.status().is_success() {
            return Err(Self::process_error_response(response).await);
        }
        response.json::<ModelInfo>().await.map_err(|e| {
            Error::transport(
                None,
                format!("Failed to parse model properties: {e}"),
                Some(Box::new(e)),
            )
        })
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn stream(&self, request: &Request) -> Result<EventStream> {
        if !request.is_streaming() {
            return Err(Error::invalid_config(
                "streaming requests must set stream to true",
                Some("stream".to_string()),
            ));
        }
        let mode = request.mode();
        let url = self.url(self.backend.endpoint(mode))?;
        let dialect = self.backend.dialect(mode);

        CLIENT_REQUESTS.click();
        let start = Instant::now();
        tracing::debug!(%url, backend = %self.backend, %mode, "sending request");
        let response = self
            .client
            .post(url)
            .headers(Self::default_headers())
            .json(request)
            .send()
            .await
            .map_err(|e| {
                CLIENT_REQUEST_ERRORS.click();
                Self::send_error(e)
            })?;
        CLIENT_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        if !response.status().is_success() {
            CLIENT_REQUEST_ERRORS.click();
            return Err(Self::process_error_response(response).await);
        }

        Ok(Box::pin(decode_stream(response.bytes_stream(), dialect)))
    }

    async fn model_name(&self) -> String {
        let configured = self.model.clone().filter(|m| !m.is_empty());
        if self.backend == Backend::Ollama {
            return configured.unwrap_or_else(|| UNKNOWN_MODEL.to_string());
        }
        match self.discover_model().await {
            Ok(info) => info
                .identifier()
                .or(configured)
                .unwrap_or_else(|| UNKNOWN_MODEL.to_string()),
            Err(err) => {
                CLIENT_DISCOVERY_FAILURES.click();
                tracing::debug!(error = %err, "model discovery failed");
                configured.unwrap_or_else(|| UNKNOWN_MODEL.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{RequestInput, RequestOptions, build};
    use crate::types::Mode;

    fn env<'a>(pairs: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn default_base_urls() {
        let url = base_url_from_env(Backend::LlamaCpp, env(&[])).unwrap();
        assert_eq!(url.as_str(), "http://localhost:10000/");
        let url = base_url_from_env(Backend::Ollama, env(&[])).unwrap();
        assert_eq!(url.as_str(), "http://localhost:11434/");
    }

    #[test]
    fn port_override() {
        let url = base_url_from_env(Backend::LlamaCpp, env(&[("LLAMA_CPP_PORT", "8080")])).unwrap();
        assert_eq!(url.as_str(), "http://localhost:8080/");
        let url = base_url_from_env(
            Backend::Ollama,
            env(&[("LLAMA_CPP_PORT", "8080"), ("OLLAMA_PORT", "9999")]),
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://localhost:9999/");

        let err = base_url_from_env(Backend::LlamaCpp, env(&[("LLAMA_CPP_PORT", "http")]))
            .unwrap_err();
        assert!(err.is_invalid_config());
    }

    #[test]
    fn base_url_override_wins() {
        let url = base_url_from_env(
            Backend::LlamaCpp,
            env(&[
                ("TEEPROMPT_BASE_URL", "http://gpu-box:8000/llama"),
                ("LLAMA_CPP_PORT", "8080"),
            ]),
        )
        .unwrap();
        assert_eq!(url.as_str(), "http://gpu-box:8000/llama");

        let err = base_url_from_env(Backend::LlamaCpp, env(&[("TEEPROMPT_BASE_URL", "::")]))
            .unwrap_err();
        assert!(err.is_invalid_config());
    }

    #[test]
    fn endpoints_join_under_base_path() {
        let base = Url::parse("http://gpu-box:8000/llama").unwrap();
        let provider = HttpProvider::new(Backend::LlamaCpp, base, None).unwrap();
        assert_eq!(provider.base_url().as_str(), "http://gpu-box:8000/llama/");
        assert_eq!(
            provider.url("v1/chat/completions").unwrap().as_str(),
            "http://gpu-box:8000/llama/v1/chat/completions"
        );
        assert_eq!(provider.backend(), Backend::LlamaCpp);
    }

    #[tokio::test]
    async fn ollama_model_name_is_configured() {
        let base = Url::parse("http://localhost:1/").unwrap();
        let provider =
            HttpProvider::new(Backend::Ollama, base.clone(), Some("qwen3".to_string())).unwrap();
        assert_eq!(provider.model_name().await, "qwen3");
        let provider = HttpProvider::new(Backend::Ollama, base, None).unwrap();
        assert_eq!(provider.model_name().await, UNKNOWN_MODEL);
    }

    #[tokio::test]
    async fn non_streaming_request_is_rejected() {
        let base = Url::parse("http://localhost:1/").unwrap();
        let provider = HttpProvider::new(Backend::LlamaCpp, base, None).unwrap();
        let options = RequestOptions::new(Backend::LlamaCpp, Mode::Chat);
        let mut request = build(RequestInput::Raw("hi".to_string()), &options).unwrap();
        if let Request::Chat(chat) = &mut request {
            chat.stream = false;
        }
        let err = match provider.stream(&request).await {
            Ok(_) => panic!("expected a configuration error"),
            Err(err) => err,
        };
        assert!(err.is_invalid_config());
    }
}
