//! ZodGame forum threads, read through the Discuz mobile API.
//!
//! Both the board listing and each thread need the logged-in session, which
//! comes from cookie-cloud. Threads without a thread type are skipped, as the
//! site uses untyped threads for announcements.

use super::{Listing, Route, RouteContext, RouteParams};
use crate::enrich::FailurePolicy;
use crate::error::{Error, Result};
use crate::http::{Body, FetchOptions};
use crate::models::{FullItem, Stub};
use crate::render::forum_post;
use crate::utils::{from_unix_secs, json_string, json_u64, truncate_for_log};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

const ROOT_URL: &str = "https://zodgame.xyz";

pub struct Zodgame;

pub fn forum_api_url(fid: &str) -> String {
    format!(
        "{ROOT_URL}/api/mobile/index.php?version=4&module=forumdisplay&fid={fid}&filter=author&orderby=dateline"
    )
}

pub fn thread_api_url(tid: &str) -> String {
    format!("{ROOT_URL}/api/mobile/index.php?version=4&module=viewthread&tid={tid}")
}

fn thread_link(tid: &str) -> String {
    format!("{ROOT_URL}/forum.php?mod=viewthread&tid={tid}&extra=page%3D1")
}

/// Board name and typed threads of a `forumdisplay` reply.
pub fn parse_forum(reply: &Value) -> Result<(String, Vec<Stub>)> {
    let variables = reply
        .get("Variables")
        .ok_or_else(|| Error::parse("zodgame: forumdisplay reply has no Variables"))?;
    let types = &variables["threadtypes"]["types"];
    let name = variables["forum"]["name"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let stubs = variables["forum_threadlist"]
        .as_array()
        .map(Vec::as_slice)
        .unwrap_or_default()
        .iter()
        .filter_map(|thread| {
            let tid = json_string(&thread["tid"])?;
            let typeid = json_string(&thread["typeid"])?;
            let kind = types.get(&typeid).and_then(Value::as_str)?;
            let subject = thread["subject"].as_str().unwrap_or_default();
            Some(Stub {
                id: Some(tid.clone()),
                guid: Some(tid.clone()),
                author: json_string(&thread["author"]),
                pub_date: json_u64(&thread["dbdateline"])
                    .and_then(|secs| from_unix_secs(secs as i64)),
                category: vec![kind.to_string()],
                ..Stub::new(format!("[{kind}] {subject}"), thread_link(&tid))
            })
        })
        .collect();
    Ok((name, stubs))
}

/// Fill in body and engagement counters from a `viewthread` reply.
///
/// A reply without a thread (deleted, or hidden from this account) still
/// yields the item with an empty body.
pub fn parse_thread(stub: Stub, reply: &Value) -> Result<FullItem> {
    let variables = &reply["Variables"];
    let thread = &variables["thread"];
    if thread.is_null() {
        debug!(link = %stub.link, "Thread missing from viewthread reply");
    }

    let mut description = thread["freemessage"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    if let Some(message) = variables["postlist"][0]["message"].as_str() {
        description.push_str(&forum_post(message)?);
    }

    Ok(FullItem {
        description,
        upvotes: json_u64(&thread["recommend_add"]),
        downvotes: json_u64(&thread["recommend_sub"]),
        comments: json_u64(&thread["replies"]),
        ..FullItem::from(stub)
    })
}

/// JSON body of a mobile API reply.
///
/// The site answers suspicious clients with an inline-script challenge
/// instead of JSON; that is reported as an upstream failure.
fn api_reply(url: &str, body: &Body) -> Result<Value> {
    match body {
        Body::Json(value) => Ok(value.clone()),
        Body::Text(text) if text.trim_start().starts_with("<script") => {
            warn!(%url, "Got anti-bot challenge");
            Err(Error::upstream(url, "anti-bot challenge"))
        }
        other => Err(Error::upstream(
            url,
            format!(
                "unexpected reply: {}",
                truncate_for_log(&format!("{other:?}"), 120)
            ),
        )),
    }
}

#[async_trait]
impl Route for Zodgame {
    fn name(&self) -> &'static str {
        "zodgame"
    }

    fn describe(&self) -> String {
        "ZodGame论坛. Params: forum/:fid (forum id, from the board URL). Needs cookie_cloud"
            .to_string()
    }

    fn failure_policy(&self) -> FailurePolicy {
        FailurePolicy::Lenient
    }

    #[instrument(level = "info", skip_all, fields(route = "zodgame"))]
    async fn fetch_listing(&self, ctx: &RouteContext, params: &RouteParams) -> Result<Listing> {
        ctx.require_cookies().await?;
        params.expect_segment("forum")?;
        let fid = params
            .path(1)
            .filter(|id| id.chars().all(|c| c.is_ascii_digit()))
            .ok_or_else(|| Error::InvalidParameter("fid must be numeric".to_string()))?;

        let url = forum_api_url(fid);
        let response = ctx
            .http
            .fetch(&url, FetchOptions::get().cookies(Arc::clone(&ctx.cookies)))
            .await?;
        let (name, stubs) = parse_forum(&api_reply(&url, &response.body)?)?;
        debug!(count = stubs.len(), forum = %name, "Parsed zodgame threads");

        Ok(Listing {
            title: format!("{name} - ZodGame论坛"),
            link: format!("{ROOT_URL}/forum.php?mod=forumdisplay&fid={fid}"),
            description: None,
            stubs,
        })
    }

    fn detail_key(&self, stub: &Stub) -> String {
        format!("zodgame:{}", stub.identity())
    }

    async fn fetch_detail(&self, ctx: &RouteContext, stub: Stub) -> Result<FullItem> {
        let url = thread_api_url(stub.id.as_deref().unwrap_or_default());
        let response = ctx
            .http
            .fetch(&url, FetchOptions::get().cookies(Arc::clone(&ctx.cookies)))
            .await?;
        parse_thread(stub, &api_reply(&url, &response.body)?)
    }
}
