//! Process-wide cookie store.
//!
//! A thin wrapper over [`reqwest::cookie::Jar`] shared via `Arc` between the
//! fetch layer (which reads and updates it per request), the cookie-cloud
//! sync job (which merges remote snapshots into it) and the headless browser
//! (which copies cookies into pages). Route handlers treat it as read-mostly.

use reqwest::cookie::{CookieStore, Jar};
use reqwest::header::HeaderValue;
use url::Url;

#[derive(Debug, Default)]
pub struct CookieJar {
    jar: Jar,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a raw `Set-Cookie` style string as if `url` had sent it.
    pub fn add_set_cookie(&self, raw: &str, url: &Url) {
        self.jar.add_cookie_str(raw, url);
    }

    /// Set a cookie for `https://{domain}`. Without a name, `value` is taken
    /// as a complete cookie string (`name=value; Path=/; ...`).
    #[cfg(test)]
    pub fn set_cookie(
        &self,
        domain: &str,
        name: Option<&str>,
        value: &str,
    ) -> crate::error::Result<()> {
        let url = Url::parse(&format!("https://{}", domain.trim_start_matches('.')))?;
        let raw = match name {
            Some(name) => format!("{name}={value};"),
            None => value.to_string(),
        };
        self.add_set_cookie(&raw, &url);
        Ok(())
    }

    /// Persist the `Set-Cookie` headers of a response received from `url`.
    pub fn store_response_cookies<'a>(
        &self,
        headers: impl Iterator<Item = &'a HeaderValue>,
        url: &Url,
    ) {
        let mut headers = headers;
        self.jar.set_cookies(&mut headers, url);
    }

    /// Value for the `Cookie` header of a request to `url`, if any match.
    pub fn header_for(&self, url: &Url) -> Option<String> {
        self.jar
            .cookies(url)
            .and_then(|value| value.to_str().ok().map(str::to_owned))
    }

    /// Matching cookies for `url` as name/value pairs.
    pub fn pairs_for(&self, url: &Url) -> Vec<(String, String)> {
        self.header_for(url)
            .map(|header| {
                header
                    .split(';')
                    .filter_map(|pair| {
                        let (name, value) = pair.trim().split_once('=')?;
                        Some((name.to_string(), value.to_string()))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_named_cookie_round_trip() {
        let jar = CookieJar::new();
        jar.set_cookie("zodgame.xyz", Some("sid"), "abc").unwrap();
        assert_eq!(
            jar.header_for(&url("https://zodgame.xyz/api/mobile/index.php")),
            Some("sid=abc".to_string())
        );
        assert_eq!(jar.header_for(&url("https://javdb.com/")), None);
    }

    #[test]
    fn test_domain_cookie_matches_subdomains() {
        let jar = CookieJar::new();
        jar.add_set_cookie(
            "over18=1; Domain=javdb.com; Path=/",
            &url("https://javdb.com/"),
        );
        assert_eq!(
            jar.pairs_for(&url("https://www.javdb.com/v/abc")),
            vec![("over18".to_string(), "1".to_string())]
        );
    }

    #[test]
    fn test_response_cookies_are_stored() {
        let jar = CookieJar::new();
        let headers = [
            HeaderValue::from_static("a=1; Path=/"),
            HeaderValue::from_static("b=2; Path=/"),
        ];
        jar.store_response_cookies(headers.iter(), &url("https://x999x.me/forum.php"));
        let mut pairs = jar.pairs_for(&url("https://x999x.me/"));
        pairs.sort();
        assert_eq!(
            pairs,
            vec![
                ("a".to_string(), "1".to_string()),
                ("b".to_string(), "2".to_string())
            ]
        );
    }
}
