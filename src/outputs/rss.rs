//! RSS 2.0 output.
//!
//! Item descriptions are HTML and go out as escaped text, which is how feed
//! readers expect `<description>` to carry markup. Listing images are put in
//! front of the body since RSS items have no image element.

use crate::error::Result;
use crate::models::{FeedEnvelope, FullItem};
use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use std::io::Write;

const GENERATOR: &str = concat!("awful_feed_routes ", env!("CARGO_PKG_VERSION"));

fn write_text_element<W: Write>(w: &mut Writer<W>, name: &str, text: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    w.write_event(Event::Text(BytesText::new(&strip_control_chars(text))))?;
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

/// Drop control characters XML 1.0 does not allow (all below 0x20 except
/// tab, LF and CR).
fn strip_control_chars(input: &str) -> String {
    input
        .chars()
        .filter(|&c| matches!(c, '\t' | '\n' | '\r') || c >= ' ')
        .collect()
}

fn item_description(item: &FullItem) -> String {
    match &item.image {
        Some(image) if !item.description.contains(image.as_str()) => {
            format!("<img src=\"{image}\"><br>{}", item.description)
        }
        _ => item.description.clone(),
    }
}

fn write_item<W: Write>(w: &mut Writer<W>, item: &FullItem) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new("item")))?;
    write_text_element(w, "title", &item.title)?;
    write_text_element(w, "link", &item.link)?;

    let mut guid = BytesStart::new("guid");
    if item.guid.is_some() {
        guid.push_attribute(("isPermaLink", "false"));
    }
    w.write_event(Event::Start(guid))?;
    w.write_event(Event::Text(BytesText::new(item.identity())))?;
    w.write_event(Event::End(BytesEnd::new("guid")))?;

    let description = item_description(item);
    if !description.is_empty() {
        write_text_element(w, "description", &description)?;
    }
    if let Some(date) = item.pub_date {
        write_text_element(w, "pubDate", &date.to_rfc2822())?;
    }
    if let Some(author) = &item.author {
        write_text_element(w, "author", author)?;
    }
    for category in &item.category {
        write_text_element(w, "category", category)?;
    }
    if let Some(enclosure) = &item.enclosure {
        let mut enc = BytesStart::new("enclosure");
        enc.push_attribute(("url", enclosure.url.as_str()));
        enc.push_attribute(("type", enclosure.mime_type.as_str()));
        if let Some(length) = enclosure.length {
            enc.push_attribute(("length", length.to_string().as_str()));
        }
        w.write_event(Event::Empty(enc))?;
    }
    w.write_event(Event::End(BytesEnd::new("item")))?;
    Ok(())
}

/// Serialize the feed as an RSS 2.0 document.
pub fn to_rss(feed: &FeedEnvelope) -> Result<String> {
    let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
    writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))?;

    let mut rss = BytesStart::new("rss");
    rss.push_attribute(("version", "2.0"));
    writer.write_event(Event::Start(rss))?;
    writer.write_event(Event::Start(BytesStart::new("channel")))?;
    write_text_element(&mut writer, "title", &feed.title)?;
    write_text_element(&mut writer, "link", &feed.link)?;
    write_text_element(
        &mut writer,
        "description",
        feed.description.as_deref().unwrap_or(&feed.title),
    )?;
    write_text_element(&mut writer, "generator", GENERATOR)?;

    for item in &feed.item {
        write_item(&mut writer, item)?;
    }

    writer.write_event(Event::End(BytesEnd::new("channel")))?;
    writer.write_event(Event::End(BytesEnd::new("rss")))?;

    Ok(String::from_utf8_lossy(&writer.into_inner()).into_owned())
}
