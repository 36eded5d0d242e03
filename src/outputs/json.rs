//! JSON output.
//!
//! The envelope is written as-is (`title`, `link`, `description`, `item`),
//! including the engagement counters RSS has no element for.

use crate::error::Result;
use crate::models::FeedEnvelope;

/// Pretty-printed JSON of the whole feed.
pub fn to_json(feed: &FeedEnvelope) -> Result<String> {
    Ok(serde_json::to_string_pretty(feed)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FullItem;
    use serde_json::Value;

    #[test]
    fn test_to_json_keeps_counters() {
        let feed = FeedEnvelope {
            title: "ZodGame".to_string(),
            link: "https://zodgame.xyz/".to_string(),
            description: None,
            item: vec![FullItem {
                title: "t".to_string(),
                link: "https://zodgame.xyz/1".to_string(),
                upvotes: Some(3),
                comments: Some(9),
                ..FullItem::default()
            }],
        };
        let value: Value = serde_json::from_str(&to_json(&feed).unwrap()).unwrap();
        assert_eq!(value["item"][0]["upvotes"], 3);
        assert_eq!(value["item"][0]["comments"], 9);
        assert!(value.get("description").is_none());
    }
}
