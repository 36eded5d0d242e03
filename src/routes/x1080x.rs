//! x1080x forum threads.
//!
//! The board sits behind a JavaScript challenge, so both the thread list and
//! each thread are read in a headless browser with the cookie-cloud session
//! copied in. Detail pages are opened one at a time.

use super::{Listing, Route, RouteContext, RouteParams};
use crate::browser::{BrowserPage, cookies_from_jar, with_page};
use crate::enrich::FailurePolicy;
use crate::error::{Error, Result};
use crate::models::{FullItem, Stub};
use crate::render::forum_post;
use crate::utils::{CHINA_OFFSET_HOURS, parse_local_datetime};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

const ROOT_URL: &str = "https://x999x.me";
const LIST_SELECTOR: &str = "tbody > tr > th > a";
const POST_SELECTOR: &str = "#postlist .t_f";
const LIST_WAIT: Duration = Duration::from_secs(8);
const POST_WAIT: Duration = Duration::from_secs(15);

/// Thread rows of a board page: first `th a` of each row plus the author and
/// date cells (class-based first, positional as fallback).
const THREAD_ROWS_SCRIPT: &str = r#"
return Array.from(document.querySelectorAll('tbody > tr')).map((row) => {
    const a = row.querySelector('th a');
    if (!a) {
        return null;
    }
    const pick = (selectors) => {
        for (const s of selectors) {
            const el = row.querySelector(s);
            if (el) {
                return (el.textContent || '').trim();
            }
        }
        return '';
    };
    return {
        href: a.href,
        title: (a.textContent || '').trim(),
        author: pick(['td.by cite a', 'td:nth-child(3) a', 'td.by cite', 'td:nth-child(3)']),
        pubDate: pick(['td.by em a', 'td.by em span', 'td:nth-child(5) em a', 'td:nth-child(5) em', 'td:nth-child(5)']),
    };
}).filter((row) => row !== null);
"#;

const FIRST_POST_SCRIPT: &str = r#"
const post = document.querySelector('#postlist .t_f');
return post ? post.innerHTML : '';
"#;

static TID: Lazy<Regex> = Lazy::new(|| Regex::new(r"tid=(\d+)").unwrap());

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ThreadRow {
    href: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    author: String,
    #[serde(default)]
    pub_date: String,
}

pub struct X1080x;

pub fn board_url(fid: &str) -> String {
    format!("{ROOT_URL}/forum.php?mod=forumdisplay&fid={fid}&orderby=dateline")
}

/// Stubs from the rows returned by the thread-list script. Rows whose link
/// carries no thread id (sticky ads, separators) are dropped.
pub fn parse_rows(rows: serde_json::Value) -> Result<Vec<Stub>> {
    let rows: Vec<ThreadRow> = serde_json::from_value(rows)?;
    Ok(rows
        .into_iter()
        .filter_map(|row| {
            let tid = TID.captures(&row.href)?.get(1)?.as_str().to_string();
            Some(Stub {
                id: Some(tid.clone()),
                guid: Some(tid),
                author: Some(row.author).filter(|a| !a.is_empty()),
                pub_date: parse_local_datetime(&row.pub_date, CHINA_OFFSET_HOURS),
                ..Stub::new(row.title, row.href)
            })
        })
        .collect())
}

async fn read_threads(page: Arc<dyn BrowserPage>) -> Result<serde_json::Value> {
    page.wait_for_selector(LIST_SELECTOR, LIST_WAIT).await?;
    page.evaluate(THREAD_ROWS_SCRIPT).await
}

async fn read_first_post(page: Arc<dyn BrowserPage>) -> Result<String> {
    page.wait_for_selector(POST_SELECTOR, POST_WAIT).await?;
    let html = page.evaluate(FIRST_POST_SCRIPT).await?;
    Ok(html.as_str().unwrap_or_default().to_string())
}

#[async_trait]
impl Route for X1080x {
    fn name(&self) -> &'static str {
        "x1080x"
    }

    fn describe(&self) -> String {
        "x1080x论坛. Params: forum/:fid (forum id, from the board URL). Needs webdriver_url"
            .to_string()
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Lenient
    }

    fn concurrency(&self) -> Option<usize> {
        Some(1)
    }

    #[instrument(level = "info", skip_all, fields(route = "x1080x"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        let browser = ctx.browser()?;
        ctx.sync_cookies().await?;
        params.expect_segment("forum")?;
        let fid = params
            .path(1)
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| Error::InvalidParameter("fid must be numeric".to_string()))?;

        let url = board_url(fid);
        let cookies = cookies_from_jar(&ctx.cookies, &Url::parse(ROOT_URL)?);
        let rows = with_page(browser, &url, &cookies, read_threads).await?;
        let stubs = parse_rows(rows)?;
        debug!(count = stubs.len(), "Parsed x1080x threads");

        Ok(Listing {
            title: format!("{fid} - x1080x论坛"),
            link: format!("{ROOT_URL}/forum.php?mod=forumdisplay&fid={fid}"),
            description: None,
            stubs,
        })
    }

    fn detail_key(&self, stub: &Stub) -> String {
        format!("x1080x:{}", stub.identity())
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let browser = ctx.browser()?;
        let cookies = cookies_from_jar(&ctx.cookies, &Url::parse(ROOT_URL)?);
        let content = with_page(browser, &stub.link, &cookies, read_first_post).await?;

        let item = FullItem::from(stub);
        Ok(if content.is_empty() {
            item
        } else {
            item.with_description(forum_post(&content)?)
        })
    }
}
