//! W3C WebDriver client.
//!
//! Each [`BrowserPage`] is one WebDriver session. Commands are plain JSON
//! over HTTP, sent through the crate's [`HttpClient`]:
//!
//! | Operation | Endpoint |
//! |---|---|
//! | open | `POST /session` |
//! | goto | `POST /session/{id}/url` |
//! | wait_for_selector | `POST /session/{id}/elements` (polled) |
//! | evaluate | `POST /session/{id}/execute/sync` |
//! | set_cookies | `POST /session/{id}/cookie` |
//! | close | `DELETE /session/{id}` |

use super::{Browser, BrowserCookie, BrowserPage};
use crate::error::{Error, Result};
use crate::http::{FetchOptions, FetchResponse, HttpClient};
use async_trait::async_trait;
use reqwest::Method;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

const POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct WebDriver {
    http: HttpClient,
    endpoint: String,
    capabilities: Value,
}

impl WebDriver {
    /// A headless Chrome session factory talking to `endpoint`.
    pub fn new(endpoint: &str, http: HttpClient) -> Self {
        Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            capabilities: json!({
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--headless=new", "--no-sandbox", "--disable-gpu"]
                    }
                }
            }),
        }
    }
}

#[async_trait]
impl Browser for WebDriver {
    #[instrument(level = "debug", skip_all, fields(endpoint = %self.endpoint))]
    async fn open_page(&self) -> Result<Arc<dyn BrowserPage>> {
        let url = format!("{}/session", self.endpoint);
        let value = command(
            &self.http,
            Method::POST,
            &url,
            Some(json!({ "capabilities": self.capabilities })),
        )
        .await?;
        let session_id = session_id(&value)?;
        info!(%session_id, "Opened WebDriver session");
        Ok(Arc::new(WebDriverPage {
            http: self.http.clone(),
            base: format!("{url}/{session_id}"),
        }))
    }
}

pub struct WebDriverPage {
    http: HttpClient,
    base: String,
}

impl WebDriverPage {
    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        command(
            &self.http,
            Method::POST,
            &format!("{}/{path}", self.base),
            Some(body),
        )
        .await
    }
}

#[async_trait]
impl BrowserPage for WebDriverPage {
    async fn goto(&self, url: &str) -> Result<()> {
        debug!(%url, "Navigating");
        self.post("url", json!({ "url": url })).await?;
        Ok(())
    }

    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let found = self
                .post(
                    "elements",
                    json!({ "using": "css selector", "value": selector }),
                )
                .await?;
            if found.as_array().is_some_and(|elements| !elements.is_empty()) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(Error::Timeout {
                    what: format!("selector `{selector}`"),
                    after_ms: timeout.as_millis(),
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn evaluate(&self, script: &str) -> Result<Value> {
        self.post("execute/sync", json!({ "script": script, "args": [] }))
            .await
    }

    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<()> {
        for cookie in cookies {
            self.post("cookie", json!({ "cookie": cookie })).await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        command(&self.http, Method::DELETE, &self.base, None).await?;
        debug!(session = %self.base, "Closed WebDriver session");
        Ok(())
    }
}

/// Send one command and unwrap the `value` member of the reply.
async fn command(http: &HttpClient, method: Method, url: &str, body: Option<Value>) -> Result<Value> {
    let mut options = FetchOptions::get().method(method).allow_error_status();
    if let Some(body) = body {
        options = options.json(body);
    }
    let response = http.fetch(url, options).await?;
    unwrap_reply(reply_json(url, &response)?)
}

/// Error replies are normally JSON too; a driver that answers an error
/// status with anything else is reported by status.
fn reply_json(url: &str, response: &FetchResponse) -> Result<Value> {
    response.json().map_err(|e| {
        if response.is_success() {
            e
        } else {
            Error::Browser(format!("{url}: status {}", response.status))
        }
    })
}

fn unwrap_reply(mut reply: Value) -> Result<Value> {
    let value = reply
        .get_mut("value")
        .map(Value::take)
        .unwrap_or(Value::Null);
    if let Some(error) = value.get("error").and_then(Value::as_str) {
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        return Err(Error::Browser(format!("{error}: {message}")));
    }
    Ok(value)
}

fn session_id(value: &Value) -> Result<String> {
    value
        .get("sessionId")
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| Error::Browser("new session reply has no sessionId".to_string()))
}
