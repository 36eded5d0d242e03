//! Gamersky (游民星空) news.
//!
//! The listing is a JSONP endpoint whose `body` is an HTML `<ul>`; article
//! bodies come from the Android app's post endpoint, which takes the article
//! URL and returns the rendered content.

use super::{Listing, Route, RouteContext, RouteParams};
use crate::error::{Error, Result};
use crate::http::{FetchOptions, ResponseKind};
use crate::models::{FullItem, Stub};
use crate::render::Fragment;
use crate::utils::{CHINA_OFFSET_HOURS, parse_local_datetime, truncate_for_log};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

const POST_ENDPOINT: &str = "https://router3.gamersky.com/@/postPage/index/6.16.40/0/App_Android";

static JSONP: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\((.+)\);").unwrap());
static ITEMS: Lazy<Selector> = Lazy::new(|| Selector::parse("li").unwrap());
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse(".tt").unwrap());
static ANY_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static TIME: Lazy<Selector> = Lazy::new(|| Selector::parse(".time").unwrap());
static TEXT: Lazy<Selector> = Lazy::new(|| Selector::parse(".txt").unwrap());
static WIDGETS: Lazy<Selector> =
    Lazy::new(|| Selector::parse(".appGameBuyCardIframe, .GSAppButton, .Mid2L_down").unwrap());
static IMAGES: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());
static STYLED: Lazy<Selector> = Lazy::new(|| Selector::parse("[style]").unwrap());

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LabelList {
    #[serde(default)]
    body: String,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    post: Post,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Post {
    #[serde(default)]
    content_in_html: String,
}

pub struct Gamersky;

/// Unwrap `callback({...});` into the listing's HTML body.
pub fn unwrap_jsonp(text: &str) -> Result<String> {
    let inner = JSONP
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or("{}");
    let list: LabelList = serde_json::from_str(inner).map_err(|e| {
        Error::parse(format!(
            "gamersky jsonp: {e} in {}",
            truncate_for_log(text, 120)
        ))
    })?;
    Ok(list.body)
}

pub fn parse_article_list(body: &str) -> Vec<Stub> {
    let document = Html::parse_fragment(body);
    document
        .select(&ITEMS)
        .filter_map(|li| {
            let anchor = li
                .select(&TITLE_LINK)
                .next()
                .or_else(|| li.select(&ANY_LINK).next())?;
            let link = anchor.value().attr("href")?;
            let text_of = |selector: &Selector| {
                li.select(selector)
                    .next()
                    .map(|e| e.text().collect::<String>().trim().to_string())
                    .unwrap_or_default()
            };
            Some(Stub {
                pub_date: parse_local_datetime(&text_of(&TIME), CHINA_OFFSET_HOURS),
                summary: Some(text_of(&TEXT)).filter(|s| !s.is_empty()),
                ..Stub::new(anchor.text().collect::<String>().trim(), link)
            })
        })
        .collect()
}

/// App HTML with widgets dropped, script links blanked, images resolved from
/// `imageurl` and inline styles cleared.
pub fn clean_post(content: &str) -> String {
    Fragment::parse(content)
        .remove(&WIDGETS)
        .set_attr(&ANY_LINK, "href", |a| {
            let href = a.value().attr("href").unwrap_or_default();
            if href == "javascript:void(0);" {
                String::new()
            } else {
                href.to_string()
            }
        })
        .set_attr(&IMAGES, "src", |img| {
            img.value()
                .attr("imageurl")
                .or_else(|| img.value().attr("src"))
                .unwrap_or_default()
                .to_string()
        })
        .set_attr(&STYLED, "style", |_| String::new())
        .into_html()
}

#[async_trait]
impl Route for Gamersky {
    fn name(&self) -> &'static str {
        "gamersky"
    }

    fn describe(&self) -> String {
        "游民星空资讯. Params: news/:nodeId (numeric node id from the site's section URLs)".to_string()
    }

    #[instrument(level = "info", skip_all, fields(route = "gamersky"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        params.expect_segment("news")?;
        let node_id = params
            .path(1)
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| Error::InvalidParameter("nodeId must be numeric".to_string()))?;

        let jsondata = json!({
            "type": "updatenodelabel",
            "isCache": true,
            "cacheTime": 60,
            "nodeId": node_id,
            "isNodeId": "true",
            "page": 1,
        });
        let text = ctx
            .http
            .fetch(
                "https://db2.gamersky.com/LabelJsonpAjax.aspx",
                FetchOptions::get()
                    .query("jsondata", jsondata.to_string())
                    .response(ResponseKind::Text),
            )
            .await?
            .text();
        let stubs = parse_article_list(&unwrap_jsonp(&text)?);
        debug!(count = stubs.len(), "Parsed gamersky list");

        Ok(Listing {
            title: format!("游民星空 - {node_id}"),
            link: "https://www.gamersky.com/news/".to_string(),
            description: None,
            stubs,
        })
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let response: PostResponse = ctx
            .http
            .fetch(
                POST_ENDPOINT,
                FetchOptions::post()
                    .header("Content-Type", "application/json; charset=utf-8")
                    .json(json!({ "postUrl": stub.link })),
            )
            .await?
            .json()?;
        let html = clean_post(&response.post.content_in_html);
        let item = FullItem::from(stub);
        Ok(if html.trim().is_empty() {
            item
        } else {
            item.with_description(html)
        })
    }
}
