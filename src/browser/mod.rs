//! Headless browser access for JavaScript-rendered or bot-protected sites.
//!
//! Routes only see the [`Browser`] and [`BrowserPage`] traits. Pages are
//! always opened through [`with_page`], which owns the page for the duration
//! of one unit of work and closes it on every exit path, including when the
//! calling future is dropped.
//!
//! # Submodules
//!
//! - [`webdriver`]: W3C WebDriver client (chromedriver, geckodriver, Selenium)

pub mod webdriver;

use crate::cookies::CookieJar;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

pub use webdriver::WebDriver;

/// A cookie in the shape WebDriver expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrowserCookie {
    pub name: String,
    pub value: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_site: Option<String>,
}

impl BrowserCookie {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            path: "/".to_string(),
            domain: None,
            secure: false,
            http_only: false,
            expiry: None,
            same_site: None,
        }
    }
}

/// Copy the cookies `jar` would send to `url` into browser form.
pub fn cookies_from_jar(jar: &CookieJar, url: &Url) -> Vec<BrowserCookie> {
    jar.pairs_for(url)
        .into_iter()
        .map(|(name, value)| BrowserCookie {
            secure: url.scheme() == "https",
            ..BrowserCookie::new(name, value)
        })
        .collect()
}

#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<()>;

    /// Wait until at least one element matches `selector`.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration) -> Result<()>;

    /// Run `script` as a function body in the page and return its result.
    async fn evaluate(&self, script: &str) -> Result<Value>;

    /// Add cookies for the page's current origin.
    async fn set_cookies(&self, cookies: &[BrowserCookie]) -> Result<()>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Browser: Send + Sync {
    async fn open_page(&self) -> Result<Arc<dyn BrowserPage>>;
}

/// Closes the page on drop unless released.
struct PageGuard {
    page: Option<Arc<dyn BrowserPage>>,
}

impl PageGuard {
    fn new(page: Arc<dyn BrowserPage>) -> Self {
        Self { page: Some(page) }
    }

    fn release(&mut self) -> Option<Arc<dyn BrowserPage>> {
        self.page.take()
    }
}

impl Drop for PageGuard {
    fn drop(&mut self) {
        let Some(page) = self.page.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                debug!("Page dropped mid-use; closing in background");
                handle.spawn(async move {
                    if let Err(e) = page.close().await {
                        warn!(error = %e, "Failed to close abandoned page");
                    }
                });
            }
            Err(_) => warn!("Page dropped outside a runtime; leaking it"),
        }
    }
}

/// Open a page, load `url` with `cookies` in place, run `f` on it and close
/// the page afterwards.
///
/// Cookies are set after first visiting the origin of `url`, since browsers
/// only accept cookies for the document's own origin.
pub async fn with_page<T, F, Fut>(
    browser: &dyn Browser,
    url: &str,
    cookies: &[BrowserCookie],
    f: F,
) -> Result<T>
where
    F: FnOnce(Arc<dyn BrowserPage>) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let target = Url::parse(url)?;
    let page = browser.open_page().await?;
    let mut guard = PageGuard::new(Arc::clone(&page));

    let outcome = async {
        if !cookies.is_empty() {
            page.goto(&target.origin().ascii_serialization()).await?;
            page.set_cookies(cookies).await?;
        }
        page.goto(target.as_str()).await?;
        f(Arc::clone(&page)).await
    }
    .await;

    if let Some(page) = guard.release() {
        if let Err(e) = page.close().await {
            warn!(%url, error = %e, "Failed to close page");
        }
    }
    outcome
}


#[cfg(test)]
mod tests {
    use super::testing::FakeBrowser;
    use super::*;
    use crate::error::Error;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_with_page_closes_after_success() {
        let browser = FakeBrowser::default();
        let out = with_page(&browser, "https://x999x.me/forum.php", &[], |page| async move {
            page.wait_for_selector("#postlist", Duration::from_secs(1)).await?;
            Ok(7)
        })
        .await
        .unwrap();

        assert_eq!(out, 7);
        assert_eq!(
            browser.calls(),
            vec!["open", "goto https://x999x.me/forum.php", "wait #postlist", "close"]
        );
    }

    #[tokio::test]
    async fn test_with_page_closes_after_failure() {
        let browser = FakeBrowser {
            missing_selectors: vec!["#postlist".to_string()],
            ..FakeBrowser::default()
        };
        let err = with_page(&browser, "https://x999x.me/t", &[], |page| async move {
            page.wait_for_selector("#postlist", Duration::from_secs(1)).await
        })
        .await
        .unwrap_err();

        assert!(matches!(err, Error::Timeout { .. }));
        assert_eq!(browser.calls().last().map(String::as_str), Some("close"));
    }

    #[tokio::test]
    async fn test_cookies_set_on_origin_before_navigation() {
        let browser = FakeBrowser::default();
        let cookies = vec![BrowserCookie::new("sid", "abc")];
        with_page(&browser, "https://x999x.me/forum.php?fid=1", &cookies, |_| async {
            Ok(())
        })
        .await
        .unwrap();

        assert_eq!(
            browser.calls(),
            vec![
                "open",
                "goto https://x999x.me",
                "cookies 1",
                "goto https://x999x.me/forum.php?fid=1",
                "close"
            ]
        );
    }

    #[tokio::test]
    async fn test_cancelled_work_still_closes_page() {
        let browser = FakeBrowser::default();
        let work = with_page(&browser, "https://x999x.me/", &[], |_| async {
            std::future::pending::<Result<()>>().await
        });
        assert!(
            tokio::time::timeout(Duration::from_millis(20), work)
                .await
                .is_err()
        );
        // the close runs on a spawned task
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(browser.calls().last().map(String::as_str), Some("close"));
    }

    #[test]
    fn test_cookies_from_jar() {
        let jar = CookieJar::new();
        jar.set_cookie("x999x.me", Some("sid"), "abc").unwrap();
        let cookies = cookies_from_jar(&jar, &Url::parse("https://x999x.me/forum.php").unwrap());
        assert_eq!(
            cookies,
            vec![BrowserCookie {
                secure: true,
                ..BrowserCookie::new("sid", "abc")
            }]
        );
    }

    #[test]
    fn test_browser_cookie_wire_shape() {
        let json = serde_json::to_value(BrowserCookie {
            http_only: true,
            ..BrowserCookie::new("a", "1")
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "name": "a", "value": "1", "path": "/", "secure": false, "httpOnly": true
            })
        );
    }
}
