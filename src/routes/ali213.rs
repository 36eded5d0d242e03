//! Ali213 (游侠网) news via the mobile app API.
//!
//! The listing comes from the app's recommendation feed; each article body
//! comes from the app's detail endpoint, which answers JSON with the article
//! HTML in `Content`. Images in that HTML are lazy-loaded (`data-original`).

use super::{Listing, Route, RouteContext, RouteParams};
use crate::error::{Error, Result};
use crate::http::{FetchOptions, ResponseKind};
use crate::models::{FullItem, Stub};
use crate::render::Fragment;
use crate::utils::{from_unix_secs, json_string, md_table_builder};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::Selector;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

/// `(type, label, navId)`
const NEWS_TYPES: &[(&str, &str, &str)] = &[
    ("today", "推荐", "1"),
    ("game", "游戏", "2"),
    ("tech", "科技", "67689"),
];

static LINKS: Lazy<Selector> = Lazy::new(|| Selector::parse("a").unwrap());
static IMAGES: Lazy<Selector> = Lazy::new(|| Selector::parse("img").unwrap());

#[derive(Debug, Deserialize)]
struct ListResponse {
    data: ListData,
}

#[derive(Debug, Deserialize)]
struct ListData {
    #[serde(default)]
    list: Vec<ListEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListEntry {
    #[serde(default)]
    label: String,
    #[serde(default)]
    jump_url: Value,
    #[serde(default)]
    create_time: Value,
    #[serde(default)]
    pic: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct DetailResponse {
    #[serde(rename = "Content", default)]
    content: String,
}

pub struct Ali213;

pub fn detail_url(id: &str) -> String {
    format!("https://3g.ali213.net/app/news/newsdetailV?v=1&id={id}&token=")
}

/// Stubs from the recommendation feed; entries without an id are dropped.
pub fn parse_article_list(payload: &Value) -> Result<Vec<Stub>> {
    let response: ListResponse = serde_json::from_value(payload.clone())
        .map_err(|e| Error::parse(format!("ali213 list: {e}")))?;
    Ok(response
        .data
        .list
        .into_iter()
        .filter_map(|entry| {
            let id = json_string(&entry.jump_url)?;
            let created = json_string(&entry.create_time)
                .and_then(|secs| secs.parse::<i64>().ok())
                .and_then(from_unix_secs);
            Some(Stub {
                id: Some(id.clone()),
                pub_date: created,
                image: entry.pic.into_iter().next(),
                ..Stub::new(entry.label, format!("https://3g.ali213.net/news/html/{id}.html"))
            })
        })
        .collect())
}

/// Article HTML with script links blanked and lazy images resolved.
pub fn clean_article(content: &str) -> String {
    Fragment::parse(content)
        .set_attr(&LINKS, "href", |a| {
            let href = a.value().attr("href").unwrap_or_default();
            if href == "javascript:void(0);" {
                String::new()
            } else {
                href.to_string()
            }
        })
        .set_attr(&IMAGES, "src", |img| {
            img.value()
                .attr("data-original")
                .or_else(|| img.value().attr("src"))
                .unwrap_or_default()
                .to_string()
        })
        .into_html()
}

#[async_trait]
impl Route for Ali213 {
    fn name(&self) -> &'static str {
        "ali213"
    }

    fn describe(&self) -> String {
        let table: Vec<(&str, &str)> = NEWS_TYPES.iter().map(|(t, label, _)| (*t, *label)).collect();
        format!("游侠网资讯. Params: news/:type (default today)\n{}", md_table_builder(&table))
    }

    #[instrument(level = "info", skip_all, fields(route = "ali213"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        params.expect_segment("news")?;
        let kind = params.path(1).unwrap_or("today");
        let (_, label, nav_id) = NEWS_TYPES
            .iter()
            .find(|(t, _, _)| *t == kind)
            .ok_or_else(|| Error::InvalidParameter(format!("Invalid type: {kind}")))?;

        let payload: Value = ctx
            .http
            .fetch(
                "https://newapi.ali213.net/app/v1/recommendList",
                FetchOptions::get()
                    .query("navId", *nav_id)
                    .query("pageNum", "20")
                    .query("pageNo", "1")
                    .query("confirmNo", "31"),
            )
            .await?
            .json()?;
        let stubs = parse_article_list(&payload)?;
        debug!(count = stubs.len(), "Parsed ali213 list");

        Ok(Listing {
            title: format!("游侠网 - {label}"),
            link: "https://www.ali213.net/news/".to_string(),
            description: None,
            stubs,
        })
    }

    fn detail_key(&self, stub: &Stub) -> String {
        detail_url(stub.id.as_deref().unwrap_or_default())
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let url = self.detail_key(&stub);
        // served as text/html, parsed as JSON regardless
        let detail: DetailResponse = ctx
            .http
            .fetch(&url, FetchOptions::get().response(ResponseKind::Text))
            .await?
            .json()?;
        Ok(FullItem::from(stub).with_description(clean_article(&detail.content)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_article_list() {
        let payload = json!({
            "data": {
                "list": [
                    { "label": "新游速递", "jumpUrl": "1234", "createTime": "1746532800", "pic": ["https://img/1.jpg"] },
                    { "label": "no id", "createTime": "1746532800" },
                    { "label": "数字 id", "jumpUrl": 5678, "createTime": 1746532800 }
                ]
            }
        });
        let stubs = parse_article_list(&payload).unwrap();
        assert_eq!(stubs.len(), 2);
        assert_eq!(stubs[0].title, "新游速递");
        assert_eq!(stubs[0].link, "https://3g.ali213.net/news/html/1234.html");
        assert_eq!(stubs[0].image.as_deref(), Some("https://img/1.jpg"));
        assert_eq!(
            stubs[0].pub_date.map(|d| d.to_rfc3339()),
            Some("2025-05-06T12:00:00+00:00".to_string())
        );
        assert_eq!(stubs[1].id.as_deref(), Some("5678"));
        assert_eq!(stubs[1].image, None);
    }

    #[test]
    fn test_parse_article_list_rejects_shape() {
        assert!(matches!(
            parse_article_list(&json!({ "code": 500 })),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn test_detail_key_uses_id() {
        let stub = Stub {
            id: Some("1234".to_string()),
            ..Stub::new("t", "https://3g.ali213.net/news/html/1234.html")
        };
        assert_eq!(
            Ali213.detail_key(&stub),
            "https://3g.ali213.net/app/news/newsdetailV?v=1&id=1234&token="
        );
    }

    #[test]
    fn test_clean_article() {
        let html = clean_article(
            "<p><a href=\"javascript:void(0);\">下载</a><img src=\"loading.gif\" data-original=\"https://img/2.jpg\"></p>",
        );
        assert_eq!(
            html,
            "<p><a href=\"\">下载</a><img src=\"https://img/2.jpg\" data-original=\"https://img/2.jpg\"></p>"
        );
    }

    #[test]
    fn test_describe_lists_types() {
        assert!(Ali213.describe().contains("|today|game|tech|"));
    }
}
