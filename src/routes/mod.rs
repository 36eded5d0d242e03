//! Site routes.
//!
//! A route turns a site (HTML pages, JSONP, undocumented mobile APIs, or a
//! headless browser session) into a [`FeedEnvelope`]. Every route follows
//! the same two-phase pattern, driven by [`run`]:
//!
//! 1. **Listing**: [`Route::fetch_listing`] fetches the index and returns
//!    ordered [`Stub`]s plus feed metadata
//! 2. **Enrichment**: each stub's detail is fetched through the shared cache
//!    by [`Route::fetch_detail`], keyed by [`Route::detail_key`]
//!
//! # Supported Routes
//!
//! | Route | Module | Params | Detail | Failure policy |
//! |-------|--------|--------|--------|----------------|
//! | `ali213` | [`ali213`] | `news/:type` | JSON detail API | strict |
//! | `gamersky` | [`gamersky`] | `news/:nodeId` | POST detail API | strict |
//! | `cnjxol` | [`cnjxol`] | `:category/:id?` | HTML page | strict |
//! | `nikkei` | [`nikkei`] | `:language?/:path*` `?limit` | print view | strict |
//! | `javdb` | [`javdb`] | `:path*` `?domain&limit` | HTML page with cookies | lenient |
//! | `sukebei` | [`sukebei`] | `:category/:query` | thumbnail lookup | lenient |
//! | `onejav` | [`onejav`] | `:query*` | none | – |
//! | `zodgame` | [`zodgame`] | `forum/:fid` | mobile API with cookies | lenient |
//! | `x1080x` | [`x1080x`] | `forum/:fid` | headless browser | lenient |

pub mod ali213;
pub mod cnjxol;
pub mod gamersky;
pub mod javdb;
pub mod nikkei;
pub mod onejav;
pub mod sukebei;
pub mod x1080x;
pub mod zodgame;

use crate::browser::{Browser, WebDriver};
use crate::cache::Cache;
use crate::config::Config;
use crate::cookie_cloud::CookieCloud;
use crate::cookies::CookieJar;
use crate::enrich::{Enricher, FailurePolicy};
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::models::{FeedEnvelope, FullItem, Stub};
use async_trait::async_trait;
use itertools::Itertools;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument};

/// Positional path parameters and query pairs of one invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams {
    pub path: Vec<String>,
    pub query: Vec<(String, String)>,
}

impl RouteParams {
    pub fn new(path: Vec<String>, query: Vec<(String, String)>) -> Self {
        Self { path, query }
    }

    #[cfg(test)]
    pub fn from_path(path: &[&str]) -> Self {
        Self {
            path: path.iter().map(|s| s.to_string()).collect(),
            query: Vec::new(),
        }
    }

    pub fn path(&self, index: usize) -> Option<&str> {
        self.path
            .get(index)
            .map(String::as_str)
            .filter(|s| !s.is_empty())
    }

    /// Path segments from `index` on, joined with `/`.
    pub fn rest(&self, index: usize) -> String {
        self.path.iter().skip(index).join("/")
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Require `path[0] == literal`, the fixed segment of routes like
    /// `news/:type` or `forum/:fid`.
    pub fn expect_segment(&self, literal: &str) -> Result<()> {
        match self.path(0) {
            Some(segment) if segment == literal => Ok(()),
            other => Err(Error::InvalidParameter(format!(
                "expected `{literal}/...`, got `{}`",
                other.unwrap_or_default()
            ))),
        }
    }
}

/// What a listing fetch produces.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Listing {
    pub title: String,
    pub link: String,
    pub description: Option<String>,
    pub stubs: Vec<Stub>,
}

/// Shared collaborators handed to every route.
#[derive(Clone)]
pub struct RouteContext {
    pub http: HttpClient,
    pub cache: Cache,
    pub cookies: Arc<CookieJar>,
    pub cookie_cloud: Arc<CookieCloud>,
    pub config: Arc<Config>,
    pub browser: Option<Arc<dyn Browser>>,
}

impl std::fmt::Debug for RouteContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RouteContext")
            .field("cache", &self.cache)
            .field("browser", &self.browser.is_some())
            .finish()
    }
}

impl RouteContext {
    /// Build the process-wide context from configuration.
    pub fn new(config: Config) -> Result<Self> {
        let http = HttpClient::new(
            &config.http.user_agent,
            Duration::from_secs(config.http.timeout_secs),
        )?;
        let cookies = Arc::new(CookieJar::new());
        let cookie_cloud = Arc::new(CookieCloud::new(Arc::clone(&cookies), http.clone()));
        let browser = config
            .webdriver_url
            .as_deref()
            .map(|endpoint| Arc::new(WebDriver::new(endpoint, http.clone())) as Arc<dyn Browser>);
        Ok(Self {
            cache: Cache::new(config.cache.settings()),
            http,
            cookies,
            cookie_cloud,
            browser,
            config: Arc::new(config),
        })
    }

    #[cfg(test)]
    pub fn with_browser(mut self, browser: Arc<dyn Browser>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Start cookie-cloud sync if it is configured.
    pub async fn sync_cookies(&self) -> Result<()> {
        match &self.config.cookie_cloud {
            Some(cloud) => self.cookie_cloud.initial(cloud).await,
            None => Ok(()),
        }
    }

    /// Start cookie-cloud sync, failing when it is not configured. For routes
    /// that return nothing useful without a logged-in session.
    pub async fn require_cookies(&self) -> Result<()> {
        let cloud = self.config.require_cookie_cloud()?;
        self.cookie_cloud.initial(cloud).await
    }

    pub fn browser(&self) -> Result<&dyn Browser> {
        self.browser
            .as_deref()
            .ok_or_else(|| Error::Config("this route needs `webdriver_url`".to_string()))
    }

    /// The enrichment pipeline as configured for `route`.
    pub fn enricher(&self, route: &dyn Route) -> Enricher {
        Enricher::new(self.cache.clone())
            .with_policy(route.failure_policy())
            .with_item_timeout(Duration::from_secs(self.config.enrich.item_timeout_secs))
            .with_concurrency(route.concurrency().unwrap_or(self.config.enrich.concurrency))
    }
}

#[async_trait]
pub trait Route: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// One-paragraph help shown by `--list-routes`.
    fn describe(&self) -> String;

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Strict
    }

    /// Detail-fetch concurrency, when the site needs less than the default.
    fn concurrency(&self) -> Option<usize> {
        None
    }

    /// Listing-only routes return `false` and skip the detail phase.
    fn enriches(&self) -> bool {
        true
    }

    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing>;

    fn detail_key(&self, stub: &Stub) -> String {
        stub.identity().to_string()
    }

    async fn fetch_detail(&self, _ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        Ok(FullItem::from(stub))
    }
}

/// Every route, in `--list-routes` order.
pub fn registry() -> Vec<Arc<dyn Route>> {
    vec![
        Arc::new(ali213::Ali213),
        Arc::new(gamersky::Gamersky),
        Arc::new(cnjxol::Cnjxol),
        Arc::new(nikkei::Nikkei),
        Arc::new(javdb::Javdb),
        Arc::new(sukebei::Sukebei),
        Arc::new(onejav::OneJav),
        Arc::new(zodgame::Zodgame),
        Arc::new(x1080x::X1080x),
    ]
}

pub fn find(name: &str) -> Option<Arc<dyn Route>> {
    registry().into_iter().find(|route| route.name() == name)
}

/// Run one route: listing, enrichment through the cache, envelope.
///
/// Items keep listing order; a repeated guid/link keeps its first occurrence.
#[instrument(level = "info", skip_all, fields(route = route.name(), params = ?params.path))]
pub async fn run(
    route: Arc<dyn Route>,
    ctx: &RouteContext,
    params: &RouteParams,
) -> Result<FeedEnvelope> {
    let listing = route.fetch_listing(ctx, params).await?;
    info!(stubs = listing.stubs.len(), "Fetched listing");

    let items = if route.enriches() {
        let detail_route = Arc::clone(&route);
        let detail_ctx = ctx.clone();
        ctx.enricher(route.as_ref())
            .enrich(
                listing.stubs,
                |stub| route.detail_key(stub),
                move |stub| {
                    let route = Arc::clone(&detail_route);
                    let ctx = detail_ctx.clone();
                    async move { route.fetch_detail(&ctx, stub).await }
                },
            )
            .await?
    } else {
        listing.stubs.into_iter().map(FullItem::from).collect()
    };

    let total = items.len();
    let items: Vec<FullItem> = items
        .into_iter()
        .unique_by(|item| item.identity().to_string())
        .collect();
    if items.len() < total {
        info!(duplicates = total - items.len(), "Dropped duplicate items");
    }

    Ok(FeedEnvelope {
        title: listing.title,
        link: listing.link,
        description: listing.description,
        item: items,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    struct Scripted {
        stubs: Vec<Stub>,
        enriches: bool,
        policy: FailurePolicy,
        failing: Vec<String>,
        fetched: Mutex<Vec<String>>,
    }

    impl Scripted {
        fn new(links: &[&str]) -> Self {
            Self {
                stubs: links.iter().map(|l| Stub::new(format!("t {l}"), *l)).collect(),
                enriches: true,
                policy: FailurePolicy::Strict,
                failing: Vec::new(),
                fetched: Mutex::new(Vec::new()),
            }
        }

        fn fetched(&self) -> Vec<String> {
            self.fetched.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Route for Scripted {
        fn name(&self) -> &'static str {
            "scripted"
        }

        fn describe(&self) -> String {
            String::new()
        }

        fn failure_policy(&self) -> FailurePolicy {
            self.policy
        }

        fn enriches(&self) -> bool {
            self.enriches
        }

        async fn fetch_listing(&self, _ctx: &RouteContext, _params: &RouteParams) -> Result<Listing> {
            Ok(Listing {
                title: "Scripted".to_string(),
                link: "https://scripted.test/".to_string(),
                description: None,
                stubs: self.stubs.clone(),
            })
        }

        async fn fetch_detail(&self, _ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
            self.fetched.lock().unwrap().push(stub.link.clone());
            if self.failing.contains(&stub.link) {
                return Err(Error::upstream(stub.link.as_str(), "status 500"));
            }
            let body = format!("<p>{}</p>", stub.link);
            Ok(FullItem::from(stub).with_description(body))
        }
    }

    fn context() -> RouteContext {
        RouteContext::new(Config::default()).unwrap()
    }

    #[tokio::test]
    async fn test_run_enriches_in_order_and_dedupes() {
        let ctx = context();
        let route = Arc::new(Scripted::new(&["https://a/1", "https://a/2", "https://a/1"]));
        let feed = run(route.clone(), &ctx, &RouteParams::default()).await.unwrap();

        let links: Vec<&str> = feed.item.iter().map(|i| i.link.as_str()).collect();
        assert_eq!(links, vec!["https://a/1", "https://a/2"]);
        assert_eq!(feed.item[1].description, "<p>https://a/2</p>");
        assert_eq!(feed.title, "Scripted");
        // the duplicate stub joined the cached computation
        assert_eq!(route.fetched().len(), 2);
    }

    #[tokio::test]
    async fn test_repeat_run_is_served_from_cache() {
        let ctx = context();
        let route = Arc::new(Scripted::new(&["https://a/1", "https://a/2"]));
        let first = run(route.clone(), &ctx, &RouteParams::default()).await.unwrap();
        let second = run(route.clone(), &ctx, &RouteParams::default()).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(route.fetched().len(), 2);
    }

    #[tokio::test]
    async fn test_listing_only_route_skips_details() {
        let ctx = context();
        let route = Arc::new(Scripted {
            enriches: false,
            ..Scripted::new(&["https://a/1"])
        });
        let feed = run(route.clone(), &ctx, &RouteParams::default()).await.unwrap();
        assert_eq!(feed.item.len(), 1);
        assert!(route.fetched().is_empty());
        assert!(ctx.cache.is_empty());
    }

    #[tokio::test]
    async fn test_route_policy_is_applied() {
        let ctx = context();
        let lenient = Arc::new(Scripted {
            policy: FailurePolicy::Lenient,
            failing: vec!["https://a/2".to_string()],
            ..Scripted::new(&["https://a/1", "https://a/2", "https://a/3"])
        });
        let feed = run(lenient, &ctx, &RouteParams::default()).await.unwrap();
        assert_eq!(feed.item.len(), 2);

        let strict = Arc::new(Scripted {
            failing: vec!["https://b/2".to_string()],
            ..Scripted::new(&["https://b/1", "https://b/2"])
        });
        assert!(matches!(
            run(strict, &ctx, &RouteParams::default()).await,
            Err(Error::Upstream { .. })
        ));
    }

    #[test]
    fn test_route_params() {
        let params = RouteParams::new(
            vec!["forum".to_string(), "13".to_string(), String::new()],
            vec![("limit".to_string(), "5".to_string())],
        );
        assert!(params.expect_segment("forum").is_ok());
        assert!(matches!(
            params.expect_segment("news"),
            Err(Error::InvalidParameter(_))
        ));
        assert_eq!(params.path(1), Some("13"));
        assert_eq!(params.path(2), None);
        assert_eq!(params.rest(1), "13/");
        assert_eq!(params.query("limit"), Some("5"));
        assert_eq!(params.query("domain"), None);
    }

    #[test]
    fn test_registry_names_are_unique() {
        let names: Vec<&str> = registry().iter().map(|r| r.name()).collect();
        assert_eq!(names.len(), names.iter().unique().count());
        assert!(find("zodgame").is_some());
        assert!(find("coolapk").is_none());
    }

    #[test]
    fn test_browser_required() {
        assert!(matches!(context().browser(), Err(Error::Config(_))));
    }
}
