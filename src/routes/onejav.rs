//! OneJAV listings. Everything needed is on the listing page, so there is no
//! detail phase.

use super::{Listing, Route, RouteContext, RouteParams};
use crate::error::Result;
use crate::http::{FetchOptions, ResponseKind};
use crate::models::Stub;
use crate::utils::parse_local_datetime;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};

const ROOT_URL: &str = "https://onejav.com";

static CARDS: Lazy<Selector> = Lazy::new(|| Selector::parse("div.container > div.card").unwrap());
static TITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("h5.title").unwrap());
static TITLE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("h5.title > a").unwrap());
static LEVEL: Lazy<Selector> = Lazy::new(|| Selector::parse("p.level").unwrap());
static SUBTITLE: Lazy<Selector> = Lazy::new(|| Selector::parse("p.subtitle").unwrap());
static IMAGE: Lazy<Selector> = Lazy::new(|| Selector::parse("img.image").unwrap());

pub struct OneJav;

fn text(card: &ElementRef, selector: &Selector) -> String {
    card.select(selector)
        .next()
        .map(|e| e.text().collect::<String>().trim().to_string())
        .unwrap_or_default()
}

pub fn parse_cards(html: &str) -> Vec<Stub> {
    let document = Html::parse_document(html);
    document
        .select(&CARDS)
        .filter_map(|card| {
            let href = card.select(&TITLE_LINK).next()?.value().attr("href")?;
            Some(Stub {
                summary: Some(text(&card, &LEVEL)).filter(|s| !s.is_empty()),
                pub_date: parse_local_datetime(&text(&card, &SUBTITLE), 0),
                image: card
                    .select(&IMAGE)
                    .next()
                    .and_then(|img| img.value().attr("src"))
                    .map(str::to_owned),
                ..Stub::new(text(&card, &TITLE), format!("{ROOT_URL}{href}"))
            })
        })
        .collect()
}

#[async_trait]
impl Route for OneJav {
    fn name(&self) -> &'static str {
        "onejav"
    }

    fn describe(&self) -> String {
        "OneJAV. Params: :query* (site path, e.g. popular)".to_string()
    }

    fn enriches(&self) -> bool {
        false
    }

    #[instrument(level = "info", skip_all, fields(route = "onejav"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        let query = params.rest(0);
        let url = format!("{ROOT_URL}/{query}");
        let html = ctx
            .http
            .fetch(&url, FetchOptions::get().response(ResponseKind::Text))
            .await?
            .text();
        let stubs = parse_cards(&html);
        debug!(count = stubs.len(), "Parsed onejav cards");

        Ok(Listing {
            title: format!("OneJAV - {query}"),
            link: url,
            description: None,
            stubs,
        })
    }
}
