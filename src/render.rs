//! Description rendering.
//!
//! Item descriptions are HTML. This module holds the askama templates that
//! assemble them and [`Fragment`], a small editor for cleaning up HTML
//! bodies lifted from detail pages (dropping widgets, restoring lazy-loaded
//! image sources).

use crate::error::Result;
use askama::Template;
use scraper::{ElementRef, Html, Selector};

#[derive(Template)]
#[template(path = "forum.html")]
struct ForumPost<'a> {
    content: &'a str,
}

#[derive(Template)]
#[template(path = "description.html")]
struct ArticleDescription<'a> {
    attachment: Option<&'a str>,
    content: Option<&'a str>,
}

/// Wrap the first post of a forum thread.
pub fn forum_post(content: &str) -> Result<String> {
    Ok(ForumPost { content }.render()?)
}

/// Newspaper article body with its optional attachment block (lead image).
pub fn article_description(attachment: Option<&str>, content: Option<&str>) -> Result<String> {
    Ok(ArticleDescription {
        attachment: attachment.filter(|a| !a.trim().is_empty()),
        content,
    }
    .render()?)
}

/// An HTML fragment being edited.
///
/// Edits work on the fragment's normalized serialization: every edit is
/// located by the serialized form of the element it targets, and the
/// fragment is re-parsed after each edit so chained edits see the result of
/// the previous one.
pub struct Fragment {
    doc: Html,
    html: String,
}

impl Fragment {
    pub fn parse(source: &str) -> Self {
        let doc = Html::parse_fragment(source);
        let html = doc.root_element().inner_html();
        Self { doc, html }
    }

    /// Drop every element matching `selector`, children included.
    pub fn remove(mut self, selector: &Selector) -> Self {
        for element in self.doc.select(selector) {
            self.html = self.html.replacen(&element.html(), "", 1);
        }
        self.reparse()
    }

    /// Replace the attributes of every element matching `selector` with what
    /// `attrs` returns for it.
    pub fn rewrite_attrs<F>(mut self, selector: &Selector, attrs: F) -> Self
    where
        F: Fn(&ElementRef) -> Vec<(String, String)>,
    {
        for element in self.doc.select(selector) {
            let current: Vec<(String, String)> = element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            let wanted = attrs(&element);
            if wanted == current {
                continue;
            }
            let name = element.value().name();
            self.html = self
                .html
                .replacen(&open_tag(name, &current), &open_tag(name, &wanted), 1);
        }
        self.reparse()
    }

    /// Set (or clear, with an empty string) one attribute on matching
    /// elements, computed from the element.
    pub fn set_attr<F>(self, selector: &Selector, attr: &str, value: F) -> Self
    where
        F: Fn(&ElementRef) -> String,
    {
        self.rewrite_attrs(selector, |element| {
            let new_value = value(element);
            let mut attrs: Vec<(String, String)> = element
                .value()
                .attrs()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect();
            match attrs.iter_mut().find(|(name, _)| name == attr) {
                Some(slot) => slot.1 = new_value,
                None => attrs.push((attr.to_string(), new_value)),
            }
            attrs
        })
    }

    fn reparse(self) -> Self {
        Self::parse(&self.html)
    }

    pub fn into_html(self) -> String {
        self.html
    }
}

fn open_tag(name: &str, attrs: &[(String, String)]) -> String {
    let mut tag = format!("<{name}");
    for (attr, value) in attrs {
        tag.push_str(&format!(" {attr}=\"{}\"", escape_attr(value)));
    }
    tag.push('>');
    tag
}

/// Attribute escaping as done by the html5ever serializer.
fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('"', "&quot;")
}
