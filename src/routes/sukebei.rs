//! Sukebei (nyaa) search feed with thumbnails.
//!
//! The site already serves RSS; items are taken from it as-is and each one
//! gets a thumbnail from a third-party lookup service. Most torrents have no
//! thumbnail, so the lookup result is cached even when it is empty.

use super::{Listing, Route, RouteContext, RouteParams};
use crate::enrich::FailurePolicy;
use crate::error::{Error, Result};
use crate::http::{FetchOptions, ResponseKind, build_url};
use crate::models::{FullItem, Stub};
use crate::utils::parse_rfc2822;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument};

const CATEGORIES: &[(&str, &str)] = &[("av", "2_2"), ("games", "1_3"), ("anime", "1_1")];
const MAX_ITEMS: usize = 50;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    guid: Option<Guid>,
    #[serde(rename = "pubDate", default)]
    pub_date: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

pub struct Sukebei;

pub fn thumbs_url(guid: &str) -> String {
    format!("https://oc1.bigsm.art/thumbs/?ids={guid}")
}

/// Items of the site's RSS; the guid is the torrent id at the end of the
/// view URL, which is also the item link.
pub fn parse_rss(xml: &str) -> Result<Vec<Stub>> {
    let rss: Rss =
        quick_xml::de::from_str(xml).map_err(|e| Error::parse(format!("sukebei rss: {e}")))?;
    Ok(rss
        .channel
        .item
        .into_iter()
        .filter_map(|item| {
            let view = item.guid?.value;
            let id = view.rsplit('/').next().unwrap_or_default().to_string();
            Some(Stub {
                guid: Some(id),
                pub_date: item.pub_date.as_deref().and_then(parse_rfc2822),
                summary: item.description,
                ..Stub::new(item.title.unwrap_or_default(), view)
            })
        })
        .take(MAX_ITEMS)
        .collect())
}

/// First thumbnail of a lookup reply, if there is one.
pub fn first_thumbnail(reply: &Value) -> Option<String> {
    reply
        .as_array()
        .and_then(|thumbs| thumbs.first())
        .and_then(Value::as_str)
        .map(str::to_owned)
}

#[async_trait]
impl Route for Sukebei {
    fn name(&self) -> &'static str {
        "sukebei"
    }

    fn describe(&self) -> String {
        "Sukebei. Params: :category(av|games|anime)/:query".to_string()
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Lenient
    }

    #[instrument(level = "info", skip_all, fields(route = "sukebei"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        let category = params.path(0).unwrap_or("av");
        let query = params.rest(1);
        let code = CATEGORIES
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, code)| *code)
            .unwrap_or("0_0");
        let url = build_url(
            "https://sukebei.nyaa.si/?page=rss&f=0",
            &[
                ("c".to_string(), code.to_string()),
                ("q".to_string(), query.clone()),
            ],
        )?;

        let xml = ctx
            .http
            .fetch(url.as_str(), FetchOptions::get().response(ResponseKind::Text))
            .await?
            .text();
        let stubs = parse_rss(&xml)?;
        debug!(count = stubs.len(), "Parsed sukebei rss");

        Ok(Listing {
            title: format!("Sukebei - {category} - {query}"),
            link: url.to_string(),
            description: None,
            stubs,
        })
    }

    fn detail_key(&self, stub: &Stub) -> String {
        stub.link.clone()
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let url = thumbs_url(stub.guid.as_deref().unwrap_or_default());
        let http = ctx.http.clone();
        let lookup = url.clone();
        let image: Option<String> = ctx
            .cache
            .try_get(&url, move || async move {
                let reply: Value = http.get_json(&lookup).await?;
                Ok(first_thumbnail(&reply))
            })
            .await?;

        let mut item = FullItem::from(stub);
        if image.is_some() {
            item.image = image;
        }
        Ok(item)
    }
}
