//! Nikkei Chinese edition (日经中文网), simplified (`cn`) or traditional (`zh`).
//!
//! Section pages list headlines as `dt a`; with the path `rss` the site's own
//! RSS is read instead. Articles are read from their print view, and the
//! publish time comes from the article URL, which ends in
//! `-YYYY-MM-DD-HH-mm-ss.html` (Japan time).

use super::{Listing, Route, RouteContext, RouteParams};
use crate::error::{Error, Result};
use crate::models::{FullItem, Stub};
use crate::utils::{JAPAN_OFFSET_HOURS, parse_local_datetime};
use async_trait::async_trait;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::Deserialize;
use tracing::{debug, instrument};
use url::Url;

const DEFAULT_LIMIT: usize = 25;

static HEADLINES: Lazy<Selector> = Lazy::new(|| Selector::parse("dt a").unwrap());
static PAGE_TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("title").unwrap());
static CONTENT: Lazy<Selector> = Lazy::new(|| Selector::parse("#contentDiv").unwrap());
static CONTENT_DIVS: Lazy<Selector> = Lazy::new(|| Selector::parse("div").unwrap());
static AUTHOR: Lazy<Selector> = Lazy::new(|| Selector::parse(r#"meta[name="author"]"#).unwrap());
static TWITTER_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[name="twitter:title"]"#).unwrap());
static LINK_DATE: Lazy<Regex> = Lazy::new(|| Regex::new(r"/\d+-(.*?)\.html").unwrap());

/// RSS 2.0 keeps items in the channel, RSS 1.0 (RDF) next to it.
#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
    #[serde(default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    item: Vec<RssItem>,
}

#[derive(Debug, Deserialize)]
struct RssItem {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    link: Option<String>,
}

pub struct Nikkei;

/// Where a set of route params points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    pub root: String,
    pub url: String,
    pub official_rss: bool,
}

/// `[cn|zh]/section/...`; the language defaults to `cn`, and the lone path
/// `rss` selects the site's own feed.
pub fn target(params: &RouteParams) -> Target {
    let (language, skip) = match params.path(0) {
        Some(lang @ ("cn" | "zh")) => (lang, 1),
        _ => ("cn", 0),
    };
    let root = match language {
        "zh" => "https://zh.cn.nikkei.com",
        _ => "https://cn.nikkei.com",
    };
    let path = params.rest(skip);
    let official_rss = path == "rss";
    let url = match path.as_str() {
        "" => root.to_string(),
        "rss" => format!("{root}/rss.html"),
        path => format!("{root}/{path}"),
    };
    Target {
        root: root.to_string(),
        url,
        official_rss,
    }
}

/// Headlines of a section page, deduplicated by link, plus the page title.
pub fn parse_section(html: &str, base: &Url, limit: usize) -> (Vec<Stub>, String) {
    let document = Html::parse_document(html);
    let stubs = document
        .select(&HEADLINES)
        .filter_map(|a| {
            let link = base.join(a.value().attr("href")?).ok()?;
            Some(Stub::new(a.text().collect::<String>(), link.to_string()))
        })
        .unique_by(|stub| stub.link.clone())
        .take(limit)
        .collect();
    let title = document
        .select(&PAGE_TITLE)
        .next()
        .map(|t| t.text().collect::<String>())
        .unwrap_or_default();
    (stubs, title)
}

/// Items of the official feed, with links resolved against the site root.
pub fn parse_official_rss(xml: &str, root: &Url, limit: usize) -> Result<Listing> {
    let rss: Rss =
        quick_xml::de::from_str(xml).map_err(|e| Error::parse(format!("nikkei rss: {e}")))?;
    let stubs = rss
        .channel
        .item
        .into_iter()
        .chain(rss.item)
        .filter_map(|item| {
            let link = root.join(item.link?.trim()).ok()?;
            Some(Stub::new(item.title.unwrap_or_default(), link.to_string()))
        })
        .take(limit)
        .collect();
    Ok(Listing {
        title: rss.channel.title.unwrap_or_default(),
        link: String::new(),
        description: rss.channel.description,
        stubs,
    })
}

/// Publish time encoded in an article link.
pub fn link_date(link: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    let stamp = LINK_DATE.captures(link)?.get(1)?.as_str();
    parse_local_datetime(stamp, JAPAN_OFFSET_HOURS)
}

/// Body of `#contentDiv` without its first and last inner `div`.
fn article_body(document: &Html) -> Option<String> {
    let content = document.select(&CONTENT).next()?;
    let mut body = content.inner_html();
    let divs: Vec<_> = content.select(&CONTENT_DIVS).collect();
    if let (Some(first), Some(last)) = (divs.first(), divs.last()) {
        body = body.replacen(&first.html(), "", 1);
        // `descendants` includes `first` itself
        if !first.descendants().any(|node| node.id() == last.id()) {
            let last_html = last.html();
            if let Some(at) = body.rfind(&last_html) {
                body.replace_range(at..at + last_html.len(), "");
            }
        }
    }
    Some(body.replace("&nbsp;", "").replace("<p></p>", ""))
}

/// Print view of an article.
pub fn parse_article(stub: Stub, html: &str) -> FullItem {
    let document = Html::parse_document(html);
    let meta = |selector: &Selector| {
        document
            .select(selector)
            .next()
            .and_then(|m| m.value().attr("content"))
            .map(str::to_owned)
    };
    let title = if stub.title.is_empty() {
        meta(&TWITTER_TITLE).unwrap_or_default()
    } else {
        stub.title.clone()
    };

    FullItem {
        title,
        pub_date: link_date(&stub.link),
        author: meta(&AUTHOR),
        description: article_body(&document).unwrap_or_default(),
        ..FullItem::from(stub)
    }
}

#[async_trait]
impl Route for Nikkei {
    fn name(&self) -> &'static str {
        "nikkei"
    }

    fn describe(&self) -> String {
        "日经中文网. Params: :language(cn|zh)?/:path* (site path, e.g. china/ceconomy; `rss` for the official feed), query limit"
            .to_string()
    }

    #[instrument(level = "info", skip_all, fields(route = "nikkei"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        let target = target(params);
        let limit = params
            .query("limit")
            .map(|l| {
                l.parse::<usize>()
                    .map_err(|_| Error::InvalidParameter(format!("limit `{l}` is not a number")))
            })
            .transpose()?
            .unwrap_or(DEFAULT_LIMIT);

        let text = ctx.http.get_text(&target.url).await?;
        let listing = if target.official_rss {
            parse_official_rss(&text, &Url::parse(&target.root)?, limit)?
        } else {
            let (stubs, title) = parse_section(&text, &Url::parse(&target.url)?, limit);
            Listing {
                title,
                link: String::new(),
                description: None,
                stubs,
            }
        };
        debug!(count = listing.stubs.len(), rss = target.official_rss, "Parsed nikkei headlines");

        Ok(Listing {
            link: target.url,
            ..listing
        })
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let html = ctx.http.get_text(&format!("{}?print=1", stub.link)).await?;
        Ok(parse_article(stub, &html))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn params(path: &[&str]) -> RouteParams {
        RouteParams::from_path(path)
    }

    #[test]
    fn test_target() {
        assert_eq!(
            target(&params(&["cn", "china", "ceconomy"])),
            Target {
                root: "https://cn.nikkei.com".to_string(),
                url: "https://cn.nikkei.com/china/ceconomy".to_string(),
                official_rss: false,
            }
        );
        assert_eq!(
            target(&params(&["zh", "rss"])).url,
            "https://zh.cn.nikkei.com/rss.html"
        );
        assert!(target(&params(&["zh", "rss"])).official_rss);
        assert_eq!(target(&params(&[])).url, "https://cn.nikkei.com");
        assert_eq!(
            target(&params(&["industry"])).url,
            "https://cn.nikkei.com/industry"
        );
    }

    #[test]
    fn test_parse_section() {
        let html = r#"<html><head><title>中国经济 - 日经中文网</title></head><body>
            <dl><dt><a href="/china/ceconomy/57123-2025-05-06-10-30-00.html">央行下调利率</a></dt></dl>
            <dl><dt><a href="/china/ceconomy/57123-2025-05-06-10-30-00.html">央行下调利率</a></dt></dl>
            <dl><dt><a href="https://cn.nikkei.com/china/ceconomy/57124-2025-05-06-11-00-00.html">出口增长</a></dt></dl>
            <dl><dt><a href="/china/ceconomy/57125-2025-05-06-12-00-00.html">第三条</a></dt></dl>
            </body></html>"#;
        let base = Url::parse("https://cn.nikkei.com/china/ceconomy").unwrap();

        let (stubs, title) = parse_section(html, &base, 2);
        assert_eq!(title, "中国经济 - 日经中文网");
        let links: Vec<&str> = stubs.iter().map(|s| s.link.as_str()).collect();
        assert_eq!(
            links,
            vec![
                "https://cn.nikkei.com/china/ceconomy/57123-2025-05-06-10-30-00.html",
                "https://cn.nikkei.com/china/ceconomy/57124-2025-05-06-11-00-00.html",
            ]
        );
        assert_eq!(stubs[0].title, "央行下调利率");
    }

    #[test]
    fn test_parse_official_rss() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<rdf:RDF xmlns:rdf="http://www.w3.org/1999/02/22-rdf-syntax-ns#" xmlns="http://purl.org/rss/1.0/">
  <channel rdf:about="https://cn.nikkei.com/">
    <title>日经中文网</title>
    <link>https://cn.nikkei.com/</link>
    <description>日经中文网 最新新闻</description>
  </channel>
  <item rdf:about="a">
    <title>央行下调利率</title>
    <link>/china/ceconomy/57123-2025-05-06-10-30-00.html</link>
  </item>
  <item rdf:about="b">
    <title>出口增长</title>
    <link>https://cn.nikkei.com/china/ceconomy/57124-2025-05-06-11-00-00.html</link>
  </item>
</rdf:RDF>"#;
        let root = Url::parse("https://cn.nikkei.com").unwrap();
        let listing = parse_official_rss(xml, &root, DEFAULT_LIMIT).unwrap();

        assert_eq!(listing.title, "日经中文网");
        assert_eq!(listing.description.as_deref(), Some("日经中文网 最新新闻"));
        assert_eq!(listing.stubs.len(), 2);
        assert_eq!(
            listing.stubs[0].link,
            "https://cn.nikkei.com/china/ceconomy/57123-2025-05-06-10-30-00.html"
        );

        let limited = parse_official_rss(xml, &root, 1).unwrap();
        assert_eq!(limited.stubs.len(), 1);
    }

    #[test]
    fn test_parse_official_rss_in_channel() {
        let xml = r#"<rss version="2.0"><channel><title>日經中文網</title>
            <item><title>一</title><link>https://zh.cn.nikkei.com/a/1-2025-05-06-10-30-00.html</link></item>
            </channel></rss>"#;
        let root = Url::parse("https://zh.cn.nikkei.com").unwrap();
        let listing = parse_official_rss(xml, &root, DEFAULT_LIMIT).unwrap();
        assert_eq!(listing.title, "日經中文網");
        assert_eq!(listing.stubs.len(), 1);
    }

    #[test]
    fn test_link_date_is_japan_time() {
        assert_eq!(
            link_date("https://cn.nikkei.com/china/ceconomy/57123-2025-05-06-10-30-00.html")
                .map(|d| d.to_rfc3339()),
            Some("2025-05-06T01:30:00+00:00".to_string())
        );
        assert_eq!(link_date("https://cn.nikkei.com/rss.html"), None);
    }

    #[test]
    fn test_parse_article() {
        let html = r#"<html><head>
            <meta name="author" content="日经中文网">
            <meta name="twitter:title" content="央行下调利率">
            </head><body><div id="contentDiv">
            <div class="title">央行下调利率</div>
            <p>第一段&nbsp;内容</p>
            <p></p>
            <div class="box"><p>图表</p></div>
            <p>第二段</p>
            <div class="share">分享</div>
            </div></body></html>"#;
        let stub = Stub::new(
            "",
            "https://cn.nikkei.com/china/ceconomy/57123-2025-05-06-10-30-00.html",
        );
        let item = parse_article(stub, html);

        assert_eq!(item.title, "央行下调利率");
        assert_eq!(item.author.as_deref(), Some("日经中文网"));
        assert!(item.pub_date.is_some());
        assert!(!item.description.contains("class=\"title\""));
        assert!(!item.description.contains("分享"));
        assert!(!item.description.contains("&nbsp;"));
        assert!(!item.description.contains("<p></p>"));
        assert!(item.description.contains("<p>第一段内容</p>"));
        assert!(item.description.contains("<div class=\"box\"><p>图表</p></div>"));
        assert!(item.description.contains("<p>第二段</p>"));
    }

    #[test]
    fn test_listing_title_wins_over_meta() {
        let stub = Stub::new("列表标题", "https://cn.nikkei.com/a/1-2025-05-06-10-30-00.html");
        let item = parse_article(stub, "<html><head><meta name=\"twitter:title\" content=\"页面\"></head></html>");
        assert_eq!(item.title, "列表标题");
        assert_eq!(item.description, "");
    }
}
