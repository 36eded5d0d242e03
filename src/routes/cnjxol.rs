//! Jiaxing newspapers (嘉兴日报 / 南湖晚报) e-paper editions.
//!
//! The layout page links to today's edition; each page of the edition lists
//! its articles. With an `id` only that page is read, otherwise every page
//! of the edition is.

use super::{Listing, Route, RouteContext, RouteParams};
use crate::error::{Error, Result};
use crate::http::{FetchOptions, ResponseKind};
use crate::models::{FullItem, Stub};
use crate::render::article_description;
use crate::utils::{CHINA_OFFSET_HOURS, parse_local_datetime};
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use tracing::{debug, instrument};

const CATEGORIES: &[(&str, &str)] = &[("jxrb", "嘉兴日报"), ("nhwb", "南湖晚报")];

/// Pages fetched at once when reading a whole edition.
const PAGE_CONCURRENCY: usize = 8;

static EDITION_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d{6}/\d{2}").unwrap());
static ANCHORS: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static PAGE_LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("#list li a").unwrap());
static ARTICLE_LINKS: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#articlelist .clearfix a").unwrap());
static PAGE_NAME: Lazy<Selector> = Lazy::new(|| Selector::parse("#layout").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("#Title").unwrap());
static DATE: Lazy<Selector> = Lazy::new(|| Selector::parse("date").unwrap());
static ATTACHMENT: Lazy<Selector> = Lazy::new(|| Selector::parse(".attachment").unwrap());
static CONTENT: Lazy<Selector> = Lazy::new(|| Selector::parse("founder-content").unwrap());

pub struct Cnjxol;

fn layout_url(category: &str) -> String {
    format!("https://{category}.cnjxol.com/{category}Paper/pc/layout")
}

/// `yyyymm/dd` of the current edition, from the first link of the layout page.
pub fn edition_date(layout_html: &str) -> Result<String> {
    let document = Html::parse_document(layout_html);
    document
        .select(&ANCHORS)
        .next()
        .and_then(|a| a.value().attr("href"))
        .and_then(|href| EDITION_DATE.find(href))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| Error::parse("cnjxol: no edition date on layout page"))
}

/// Relative page links of the edition.
pub fn page_links(layout_html: &str) -> Vec<String> {
    let document = Html::parse_document(layout_html);
    document
        .select(&PAGE_LINKS)
        .filter_map(|a| a.value().attr("href").map(str::to_owned))
        .collect()
}

/// Absolute article URLs of one page, plus the page's name.
pub fn article_links(page_html: &str, layout: &str) -> (Vec<String>, String) {
    let document = Html::parse_document(page_html);
    let links = document
        .select(&ARTICLE_LINKS)
        .filter_map(|a| a.value().attr("href"))
        .map(|href| format!("{layout}/{href}").replace("layout/../../../", ""))
        .collect();
    let name = document
        .select(&PAGE_NAME)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default();
    (links, name)
}

pub fn parse_article(link: &str, html: &str) -> Result<FullItem> {
    let document = Html::parse_document(html);
    let text_of = |selector: &Selector| {
        document
            .select(selector)
            .next()
            .map(|e| e.text().collect::<String>().trim().to_string())
    };
    let inner_of = |selector: &Selector| document.select(selector).next().map(|e| e.inner_html());

    let attachment = inner_of(&ATTACHMENT);
    let content = inner_of(&CONTENT);
    Ok(FullItem {
        title: text_of(&TITLE).unwrap_or_default(),
        link: link.to_string(),
        pub_date: text_of(&DATE).and_then(|d| parse_local_datetime(&d, CHINA_OFFSET_HOURS)),
        description: article_description(attachment.as_deref(), content.as_deref())?,
        ..FullItem::default()
    })
}

#[async_trait]
impl Route for Cnjxol {
    fn name(&self) -> &'static str {
        "cnjxol"
    }

    fn describe(&self) -> String {
        "嘉兴日报 / 南湖晚报. Params: :category(jxrb|nhwb)/:id? (page id; all pages when omitted)"
            .to_string()
    }

    #[instrument(level = "info", skip_all, fields(route = "cnjxol"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        let category = params.path(0).unwrap_or("jxrb");
        let (_, paper) = CATEGORIES
            .iter()
            .find(|(c, _)| *c == category)
            .ok_or_else(|| Error::InvalidParameter("Invalid category".to_string()))?;
        let layout = layout_url(category);

        let layout_html = ctx.http.get_text(&layout).await?;
        let date = edition_date(&layout_html)?;

        let (links, title) = match params.path(1) {
            Some(id) => {
                let page = ctx
                    .http
                    .get_text(&format!("{layout}/{date}/node_{id}.html"))
                    .await?;
                let (links, name) = article_links(&page, &layout);
                (links, format!("{paper} - {name}"))
            }
            None => {
                let pages: Vec<String> = stream::iter(page_links(&layout_html))
                    .map(|href| {
                        let url = format!("{layout}/{href}");
                        async move {
                            ctx.http
                                .fetch(&url, FetchOptions::get().response(ResponseKind::Text))
                                .await
                                .map(|r| r.text())
                        }
                    })
                    .buffered(PAGE_CONCURRENCY)
                    .try_collect()
                    .await?;
                let links = pages
                    .iter()
                    .flat_map(|page| article_links(page, &layout).0)
                    .collect();
                (links, paper.to_string())
            }
        };
        debug!(count = links.len(), %date, "Collected cnjxol articles");

        Ok(Listing {
            title,
            link: layout,
            description: None,
            stubs: links.into_iter().map(|link| Stub::new("", link)).collect(),
        })
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let html = ctx.http.get_text(&stub.link).await?;
        parse_article(&stub.link, &html)
    }
}
