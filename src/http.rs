//! HTTP fetch layer.
//!
//! [`HttpClient::fetch`] is the single entry point every route uses to talk
//! to a site. It builds the request from [`FetchOptions`] (method, headers,
//! query string, one payload mode, response parsing mode, optional shared
//! cookie jar) and maps failures onto the crate error taxonomy:
//!
//! - connection failures and non-2xx statuses become [`Error::Upstream`]
//! - request timeouts become [`Error::Timeout`]
//! - bodies the caller wants as JSON but that do not parse become [`Error::Parse`]
//!
//! Nothing is retried here; a failed fetch is retried by the next request.

use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use reqwest::header::{CONTENT_TYPE, COOKIE, SET_COOKIE};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, warn};
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// How the response body should be read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseKind {
    /// JSON when the body looks like JSON and parses, text otherwise.
    #[default]
    Parsed,
    Text,
    Bytes,
}

/// Request payload. The modes are mutually exclusive.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Payload {
    #[default]
    Empty,
    Text(String),
    Form(Vec<(String, String)>),
    Json(Value),
}

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub payload: Payload,
    pub search_params: Vec<(String, String)>,
    pub response: ResponseKind,
    pub cookie_jar: Option<Arc<CookieJar>>,
    pub timeout: Option<Duration>,
    /// Return non-2xx responses instead of failing with [`Error::Upstream`].
    pub allow_error_status: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            headers: Vec::new(),
            payload: Payload::Empty,
            search_params: Vec::new(),
            response: ResponseKind::Parsed,
            cookie_jar: None,
            timeout: None,
            allow_error_status: false,
        }
    }
}

impl FetchOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn post() -> Self {
        Self::default().method(Method::POST)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.search_params.push((name.into(), value.into()));
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.payload = Payload::Text(body.into());
        self
    }

    pub fn form(mut self, pairs: Vec<(String, String)>) -> Self {
        self.payload = Payload::Form(pairs);
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.payload = Payload::Json(body);
        self
    }

    pub fn response(mut self, kind: ResponseKind) -> Self {
        self.response = kind;
        self
    }

    pub fn cookies(mut self, jar: Arc<CookieJar>) -> Self {
        self.cookie_jar = Some(jar);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn allow_error_status(mut self) -> Self {
        self.allow_error_status = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Body {
    Json(Value),
    Text(String),
    Bytes(Vec<u8>),
}

#[derive(Debug, Clone)]
pub struct FetchResponse {
    pub status: u16,
    /// Final URL after redirects.
    pub url: Url,
    pub body: Body,
}

impl FetchResponse {
    /// Deserialize the body as JSON, whatever mode it was read in.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        let parsed = match &self.body {
            Body::Json(value) => serde_json::from_value(value.clone()),
            Body::Text(text) => serde_json::from_str(text),
            Body::Bytes(bytes) => serde_json::from_slice(bytes),
        };
        parsed.map_err(|e| Error::parse(format!("{}: {e}", self.url)))
    }

    /// The body as text; JSON bodies are re-serialized.
    pub fn text(&self) -> String {
        match &self.body {
            Body::Json(value) => value.to_string(),
            Body::Text(text) => text.clone(),
            Body::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Cheap-to-clone handle over a shared connection pool.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
}

impl HttpClient {
    pub fn new(user_agent: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client: {e}")))?;
        Ok(Self { client })
    }

    #[instrument(level = "debug", skip_all, fields(%target, method = %options.method))]
    pub async fn fetch(&self, target: &str, options: FetchOptions) -> Result<FetchResponse> {
        let t0 = Instant::now();
        let url = build_url(target, &options.search_params)?;
        let mut request = self.client.request(options.method.clone(), url.clone());

        for (name, value) in &options.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(jar) = &options.cookie_jar {
            if let Some(cookie) = jar.header_for(&url) {
                request = request.header(COOKIE, cookie);
            }
        }
        request = match options.payload {
            Payload::Empty => request,
            Payload::Text(body) => request.body(body),
            Payload::Form(pairs) => request
                .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
                .body(encode_form(&pairs)),
            Payload::Json(body) => request.json(&body),
        };
        if let Some(timeout) = options.timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout {
                    what: format!("{} {url}", options.method),
                    after_ms: t0.elapsed().as_millis(),
                }
            } else {
                Error::upstream(url.as_str(), e)
            }
        })?;

        let status = response.status();
        let final_url = response.url().clone();
        if final_url != url {
            debug!(from = %url, to = %final_url, "Followed redirect");
        }
        if let Some(jar) = &options.cookie_jar {
            jar.store_response_cookies(response.headers().get_all(SET_COOKIE).iter(), &final_url);
        }
        if !status.is_success() && !options.allow_error_status {
            warn!(url = %final_url, %status, "Upstream returned error status");
            return Err(Error::upstream(final_url.as_str(), format!("status {status}")));
        }

        let body = match options.response {
            ResponseKind::Bytes => Body::Bytes(response.bytes().await?.to_vec()),
            ResponseKind::Text => Body::Text(response.text().await?),
            ResponseKind::Parsed => parse_body(response.text().await?),
        };
        debug!(
            status = status.as_u16(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "Fetched"
        );

        Ok(FetchResponse {
            status: status.as_u16(),
            url: final_url,
            body,
        })
    }

    pub async fn get_text(&self, target: &str) -> Result<String> {
        let response = self
            .fetch(target, FetchOptions::get().response(ResponseKind::Text))
            .await?;
        Ok(response.text())
    }

    pub async fn get_json<T: DeserializeOwned>(&self, target: &str) -> Result<T> {
        self.fetch(target, FetchOptions::get()).await?.json()
    }
}

/// Parse `target` and append `search_params` to its query string.
pub fn build_url(target: &str, search_params: &[(String, String)]) -> Result<Url> {
    let mut url = Url::parse(target)?;
    if !search_params.is_empty() {
        url.query_pairs_mut().extend_pairs(search_params);
    }
    Ok(url)
}

fn encode_form(pairs: &[(String, String)]) -> String {
    url::form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs)
        .finish()
}

/// Structured parse: JSON objects and arrays become [`Body::Json`], anything
/// else stays text.
fn parse_body(text: String) -> Body {
    let trimmed = text.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return Body::Json(value);
        }
    }
    Body::Text(text)
}
