//! JavDB listings (rankings, tags, actors, search) with magnet enclosures.
//!
//! Pages are fetched with the shared cookie jar (kept fresh by cookie-cloud)
//! since most listings need a logged-in or age-verified session. The host can
//! be switched with `?domain=`; only the site's own mirrors are accepted
//! unless `allow_user_supply_unsafe_domain` is set.

use super::{Listing, Route, RouteContext, RouteParams};
use crate::enrich::FailurePolicy;
use crate::error::{Error, Result};
use crate::http::{FetchOptions, ResponseKind};
use crate::models::{Enclosure, FullItem, Stub};
use crate::render::Fragment;
use crate::utils::parse_local_datetime;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use std::sync::Arc;
use tracing::{debug, instrument};
use url::Url;

const ALLOWED_DOMAINS: &[&str] = &["javdb.com", "javdb36.com", "javdb007.com", "javdb521.com"];
const DEFAULT_LIMIT: usize = 20;

static ITEMS: Lazy<Selector> = Lazy::new(|| Selector::parse("div.item").unwrap());
static VIDEO_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse(".video-title").unwrap());
static BOX: Lazy<Selector> = Lazy::new(|| Selector::parse(".box").unwrap());
static META: Lazy<Selector> = Lazy::new(|| Selector::parse(".meta").unwrap());
static PAGE_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static MAGNET: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#magnets-content button[data-clipboard-text]").unwrap());
static CATEGORY_LINKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".panel-block .value a").unwrap());
static PANEL_VALUES: Lazy<Selector> = Lazy::new(|| Selector::parse(".panel-block .value").unwrap());
static VALUE_LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse(".value a").unwrap());
static COVER: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".cover-container, .column-video-cover").unwrap());
static PANEL_INFO: Lazy<Selector> = Lazy::new(|| Selector::parse(".movie-panel-info").unwrap());
static MAGNETS: Lazy<Selector> = Lazy::new(|| Selector::parse("#magnets-content").unwrap());
static PREVIEWS: Lazy<Selector> = Lazy::new(|| Selector::parse(".preview-images").unwrap());
static PREVIEW_IMAGES: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".preview-images img").unwrap());
static JUNK: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(
        "icon, #modal-review-watched, #modal-comment-warning, #modal-save-list, \
         .review-buttons, .copy-to-clipboard, .preview-video-container, .play-button, \
         .tags, .tag-can-play, .over18-modal",
    )
    .unwrap()
});

pub struct Javdb;

/// Resolve the listing URL, enforcing the domain allow-list.
pub fn listing_url(path: &str, domain: &str, allow_any_domain: bool) -> Result<Url> {
    let base = Url::parse(&format!("https://{domain}"))?;
    let url = base.join(&format!("/{}", path.trim_start_matches('/')))?;
    let host = url.host_str().unwrap_or_default();
    if !allow_any_domain && !ALLOWED_DOMAINS.contains(&host) {
        return Err(Error::Config(
            "This RSS is disabled unless 'allow_user_supply_unsafe_domain' is set to 'true'."
                .to_string(),
        ));
    }
    Ok(url)
}

pub fn parse_listing(html: &str, root: &str, limit: usize) -> (Vec<Stub>, Option<String>) {
    let document = Html::parse_document(html);
    let stubs = document
        .select(&ITEMS)
        .take(limit)
        .filter_map(|item| {
            let href = item.select(&BOX).next()?.value().attr("href")?;
            Some(Stub {
                pub_date: item
                    .select(&META)
                    .next()
                    .and_then(|m| parse_local_datetime(&m.text().collect::<String>(), 0)),
                ..Stub::new(text(item.select(&VIDEO_TITLE).next()), format!("{root}{href}"))
            })
        })
        .collect();
    let subject = document
        .select(&PAGE_TITLE)
        .next()
        .map(|t| t.text().collect::<String>())
        .and_then(|title| title.split_once('|').map(|(subject, _)| subject.trim().to_string()))
        .filter(|subject| !subject.is_empty());
    (stubs, subject)
}

fn text(element: Option<ElementRef>) -> String {
    element
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

fn clean(page: &str) -> String {
    Fragment::parse(page)
        .remove(&JUNK)
        .rewrite_attrs(&PREVIEW_IMAGES, |img| {
            let href = img
                .parent()
                .and_then(ElementRef::wrap)
                .and_then(|a| a.value().attr("href"))
                .unwrap_or_default()
                .to_string();
            let mut attrs: Vec<(String, String)> = img
                .value()
                .attrs()
                .filter(|(name, _)| *name != "data-src" && *name != "src")
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            attrs.insert(0, ("src".to_string(), href));
            attrs
        })
        .into_html()
}

/// Movie page: magnet enclosure, tags, first credited name and the cover,
/// info, magnet and preview sections as description.
pub fn parse_detail(stub: Stub, html: &str) -> FullItem {
    let document = Html::parse_document(html);
    let magnet = document
        .select(&MAGNET)
        .next()
        .and_then(|b| b.value().attr("data-clipboard-text"))
        .map(str::to_owned);
    let category = document
        .select(&CATEGORY_LINKS)
        .map(|a| a.text().collect::<String>().trim().to_string())
        .collect();
    let author = document
        .select(&PANEL_VALUES)
        .last()
        .and_then(|value| value.parent().and_then(ElementRef::wrap))
        .map(|block| text(block.select(&VALUE_LINKS).next()))
        .filter(|a| !a.is_empty());
    let cleaned = Html::parse_fragment(&clean(html));
    let description: String = [&*COVER, &*PANEL_INFO, &*MAGNETS, &*PREVIEWS]
        .into_iter()
        .filter_map(|selector| cleaned.select(selector).next())
        .map(|section| section.inner_html())
        .collect();

    FullItem {
        enclosure: magnet.map(|url| Enclosure {
            url,
            mime_type: "application/x-bittorrent".to_string(),
            length: None,
        }),
        category,
        author,
        description,
        ..FullItem::from(stub)
    }
}

#[async_trait]
impl Route for Javdb {
    fn name(&self) -> &'static str {
        "javdb"
    }

    fn describe(&self) -> String {
        "JavDB. Params: :path* (site path, e.g. rankings/movies), query domain, limit".to_string()
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Lenient
    }

    #[instrument(level = "info", skip_all, fields(route = "javdb"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        ctx.sync_cookies().await?;
        let domain = params.query("domain").unwrap_or("javdb.com");
        let mut url = listing_url(
            &params.rest(0),
            domain,
            ctx.config.allow_user_supply_unsafe_domain,
        )?;
        let site_query: Vec<&(String, String)> = params
            .query
            .iter()
            .filter(|(key, _)| key != "domain" && key != "limit")
            .collect();
        if !site_query.is_empty() {
            url.query_pairs_mut().extend_pairs(site_query);
        }
        let limit = params
            .query("limit")
            .map(|l| {
                l.parse::<usize>()
                    .map_err(|_| Error::InvalidParameter(format!("limit `{l}` is not a number")))
            })
            .transpose()?
            .unwrap_or(DEFAULT_LIMIT);

        let html = ctx
            .http
            .fetch(
                url.as_str(),
                FetchOptions::get()
                    .cookies(Arc::clone(&ctx.cookies))
                    .response(ResponseKind::Text),
            )
            .await?
            .text();
        let (stubs, subject) = parse_listing(&html, &format!("https://{domain}"), limit);
        debug!(count = stubs.len(), "Parsed javdb listing");

        Ok(Listing {
            title: match subject {
                Some(subject) => format!("{subject} - JavDB"),
                None => "JavDB".to_string(),
            },
            link: url.to_string(),
            description: None,
            stubs,
        })
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let html = ctx
            .http
            .fetch(
                &stub.link,
                FetchOptions::get()
                    .cookies(Arc::clone(&ctx.cookies))
                    .response(ResponseKind::Text),
            )
            .await?
            .text();
        Ok(parse_detail(stub, &html))
    }
}
