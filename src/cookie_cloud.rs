//! Cookie-cloud synchronization.
//!
//! Pulls an encrypted cookie snapshot from a CookieCloud server, decrypts it
//! and merges every cookie into the shared [`CookieJar`]. The first
//! [`CookieCloud::initial`] call performs one sync and starts a background
//! task that re-syncs on the configured cron schedule; later calls return
//! immediately.
//!
//! # Wire format
//!
//! `GET {host}/get/{uuid}` answers `{ "encrypted": "<base64>" }`. The payload
//! is OpenSSL "Salted__" AES-256-CBC: the passphrase is the first 16 hex
//! digits of `md5("{uuid}-{password}")` and key/iv are derived from it with
//! EVP_BytesToKey (MD5, one round). The plaintext is:
//!
//! ```json
//! { "cookie_data": { "<domain>": [CookieItem, ...] }, "local_storage_data": {} }
//! ```

use crate::config::CookieCloudConfig;
use crate::cookies::CookieJar;
use crate::error::{Error, Result};
use crate::http::{FetchOptions, HttpClient};
use aes::Aes256;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use cbc::cipher::block_padding::Pkcs7;
use cbc::cipher::{BlockDecryptMut, KeyIvInit};
use chrono::{DateTime, Utc};
use cron::Schedule;
use serde::Deserialize;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use url::Url;

const SALT_HEADER: &[u8] = b"Salted__";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CookieItem {
    pub domain: String,
    pub name: String,
    pub value: String,
    #[serde(default = "default_path")]
    pub path: String,
    /// Seconds since the epoch; absent for session cookies.
    #[serde(default)]
    pub expiration_date: Option<f64>,
    #[serde(default)]
    pub host_only: bool,
    #[serde(default)]
    pub http_only: bool,
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub same_site: Option<String>,
}

fn default_path() -> String {
    "/".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct DecryptedData {
    #[serde(default)]
    pub cookie_data: HashMap<String, Vec<CookieItem>>,
    #[serde(default)]
    pub local_storage_data: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct Snapshot {
    encrypted: Option<String>,
}

impl CookieItem {
    /// Origin the cookie is stored against.
    pub fn origin(&self) -> Result<Url> {
        let scheme = if self.secure { "https" } else { "http" };
        Ok(Url::parse(&format!(
            "{scheme}://{}",
            self.domain.trim_start_matches('.')
        ))?)
    }

    /// Render as a `Set-Cookie` header value.
    pub fn to_set_cookie(&self) -> String {
        let mut out = format!("{}={}; Path={}", self.name, self.value, self.path);
        if !self.host_only {
            out.push_str(&format!("; Domain={}", self.domain.trim_start_matches('.')));
        }
        if let Some(expires) = self
            .expiration_date
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs as i64, 0))
        {
            out.push_str(&format!(
                "; Expires={}",
                expires.format("%a, %d %b %Y %H:%M:%S GMT")
            ));
        }
        if self.secure {
            out.push_str("; Secure");
        }
        if self.http_only {
            out.push_str("; HttpOnly");
        }
        out.push_str(&format!("; SameSite={}", self.same_site_attr()));
        out
    }

    fn same_site_attr(&self) -> &'static str {
        match self.same_site.as_deref().map(str::to_ascii_lowercase).as_deref() {
            Some("strict") => "Strict",
            Some("none") | Some("no_restriction") => "None",
            _ => "Lax",
        }
    }
}

/// Decrypt a CookieCloud payload for `uuid`/`password`.
pub fn decrypt(uuid: &str, password: &str, encrypted: &str) -> Result<DecryptedData> {
    let passphrase = format!("{:x}", md5::compute(format!("{uuid}-{password}")));
    let passphrase = &passphrase.as_bytes()[..16];

    let raw = STANDARD
        .decode(encrypted.trim())
        .map_err(|e| Error::Crypto(format!("base64: {e}")))?;
    if raw.len() < 16 || &raw[..8] != SALT_HEADER {
        return Err(Error::Crypto("missing Salted__ header".to_string()));
    }
    let (salt, ciphertext) = raw[8..].split_at(8);

    let (key, iv) = evp_bytes_to_key(passphrase, salt);
    let mut buf = ciphertext.to_vec();
    let plaintext = cbc::Decryptor::<Aes256>::new_from_slices(&key, &iv)
        .map_err(|e| Error::Crypto(format!("key setup: {e}")))?
        .decrypt_padded_mut::<Pkcs7>(&mut buf)
        .map_err(|_| Error::Crypto("bad padding (wrong uuid or password?)".to_string()))?;

    serde_json::from_slice(plaintext)
        .map_err(|e| Error::Crypto(format!("decrypted payload is not cookie data: {e}")))
}

/// OpenSSL EVP_BytesToKey with MD5 and a single round, for a 32-byte key
/// and a 16-byte iv.
fn evp_bytes_to_key(passphrase: &[u8], salt: &[u8]) -> ([u8; 32], [u8; 16]) {
    let mut derived = Vec::with_capacity(48);
    let mut previous: Vec<u8> = Vec::new();
    while derived.len() < 48 {
        let mut ctx = md5::Context::new();
        ctx.consume(&previous);
        ctx.consume(passphrase);
        ctx.consume(salt);
        previous = ctx.compute().0.to_vec();
        derived.extend_from_slice(&previous);
    }
    let mut key = [0u8; 32];
    let mut iv = [0u8; 16];
    key.copy_from_slice(&derived[..32]);
    iv.copy_from_slice(&derived[32..48]);
    (key, iv)
}

/// Merge every cookie of a snapshot into `jar`; returns how many were stored.
pub fn merge_into(jar: &CookieJar, data: &DecryptedData) -> usize {
    let mut stored = 0;
    for (domain, items) in &data.cookie_data {
        for item in items {
            match item.origin() {
                Ok(origin) => {
                    jar.add_set_cookie(&item.to_set_cookie(), &origin);
                    stored += 1;
                }
                Err(e) => debug!(%domain, name = %item.name, error = %e, "Skipping cookie"),
            }
        }
    }
    stored
}

pub struct CookieCloud {
    jar: Arc<CookieJar>,
    http: HttpClient,
    started: OnceCell<()>,
}

impl std::fmt::Debug for CookieCloud {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CookieCloud")
            .field("started", &self.started.initialized())
            .finish()
    }
}

impl CookieCloud {
    pub fn new(jar: Arc<CookieJar>, http: HttpClient) -> Self {
        Self {
            jar,
            http,
            started: OnceCell::new(),
        }
    }

    #[cfg(test)]
    pub fn is_started(&self) -> bool {
        self.started.initialized()
    }

    /// Sync once and start the scheduled refresh. Only the first call does
    /// any work; a failed sync is logged and does not fail the caller.
    #[instrument(level = "info", skip_all, fields(host = %config.host))]
    pub async fn initial(self: &Arc<Self>, config: &CookieCloudConfig) -> Result<()> {
        self.started
            .get_or_try_init(|| async {
                let schedule = Schedule::from_str(&config.update_cron).map_err(|e| {
                    Error::Config(format!("cookie_cloud.update_cron `{}`: {e}", config.update_cron))
                })?;

                let this = Arc::clone(self);
                let task_config = config.clone();
                tokio::spawn(async move { this.refresh_loop(schedule, task_config).await });

                match self.fetch_cookies(config).await {
                    Ok(count) => info!(count, "Cookie cloud synced"),
                    Err(e) => warn!(error = %e, "Cookie cloud sync failed"),
                }
                Ok::<_, Error>(())
            })
            .await?;
        Ok(())
    }

    async fn refresh_loop(self: Arc<Self>, schedule: Schedule, config: CookieCloudConfig) {
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                break;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or_default();
            debug!(next = %next, "Next cookie cloud sync scheduled");
            tokio::time::sleep(wait).await;
            match self.fetch_cookies(&config).await {
                Ok(count) => info!(count, "Cookie cloud refreshed"),
                Err(e) => warn!(error = %e, "Cookie cloud refresh failed"),
            }
        }
    }

    /// Fetch, decrypt and merge one snapshot.
    pub async fn fetch_cookies(&self, config: &CookieCloudConfig) -> Result<usize> {
        let url = format!(
            "{}/get/{}",
            config.host.trim_end_matches('/'),
            urlencoding::encode(&config.uuid)
        );
        let snapshot: Snapshot = self.http.fetch(&url, FetchOptions::get()).await?.json()?;
        let Some(encrypted) = snapshot.encrypted else {
            return Ok(0);
        };
        let data = decrypt(&config.uuid, &config.password, &encrypted)?;
        Ok(merge_into(&self.jar, &data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    // {"cookie_data":{"zodgame.xyz":[{"domain":".zodgame.xyz","name":"sid","value":"abc",
    //   "path":"/","expirationDate":4102444800,"hostOnly":false,"httpOnly":true,
    //   "secure":true,"sameSite":"unspecified"}]},"local_storage_data":{}}
    // encrypted for uuid "u-123", password "secret", salt 01..08
    const FIXTURE: &str = "U2FsdGVkX18BAgMEBQYHCOwhS3BfRPPfi6t3dQKwLLAd3HKDu12lGCgJywYtZJPOHTub1V1JJCOAr9+l1eIIvgunKGvuHQKDK4M1k/qWoQRWMCkb0X0fyQNZl/buMpjZ4eDwaeGpAVZHgVpB4T6dsMfPdFIdQrYePp76V2agQVUFCj8DYrc0O9QwiMhuP1O9cAGDT0U8tNEeUu6HpyWngQPyqVbSPlv/jb0YDd6NyOe2WnUG77MpEzJKhmoxDoRL/pePsEUeq9NRlAoeRA2L7G668Ee3V8H9CLiEcUo/Jfq6AOplO1jTAgfN7v+ZhNX3";

    #[test]
    fn test_decrypt_fixture() {
        let data = decrypt("u-123", "secret", FIXTURE).unwrap();
        let items = &data.cookie_data["zodgame.xyz"];
        assert_eq!(items.len(), 1);
        assert_eq!(
            items[0],
            CookieItem {
                domain: ".zodgame.xyz".to_string(),
                name: "sid".to_string(),
                value: "abc".to_string(),
                path: "/".to_string(),
                expiration_date: Some(4102444800.0),
                host_only: false,
                http_only: true,
                secure: true,
                same_site: Some("unspecified".to_string()),
            }
        );
    }

    #[test]
    fn test_decrypt_wrong_password() {
        assert!(matches!(
            decrypt("u-123", "wrong", FIXTURE),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_decrypt_rejects_unsalted_input() {
        let plain = STANDARD.encode(b"0123456789abcdef0123456789abcdef");
        assert!(matches!(
            decrypt("u", "p", &plain),
            Err(Error::Crypto(_))
        ));
    }

    #[test]
    fn test_set_cookie_rendering() {
        let item = CookieItem {
            domain: ".zodgame.xyz".to_string(),
            name: "sid".to_string(),
            value: "abc".to_string(),
            path: "/".to_string(),
            expiration_date: Some(4102444800.0),
            host_only: false,
            http_only: true,
            secure: true,
            same_site: Some("unspecified".to_string()),
        };
        assert_eq!(
            item.to_set_cookie(),
            "sid=abc; Path=/; Domain=zodgame.xyz; Expires=Fri, 01 Jan 2100 00:00:00 GMT; Secure; HttpOnly; SameSite=Lax"
        );
        assert_eq!(item.origin().unwrap().as_str(), "https://zodgame.xyz/");

        let host_only = CookieItem {
            host_only: true,
            secure: false,
            expiration_date: None,
            same_site: Some("strict".to_string()),
            ..item
        };
        assert_eq!(
            host_only.to_set_cookie(),
            "sid=abc; Path=/; HttpOnly; SameSite=Strict"
        );
        assert_eq!(host_only.origin().unwrap().as_str(), "http://zodgame.xyz/");
    }

    #[test]
    fn test_merge_into_jar() {
        let jar = CookieJar::new();
        let data = decrypt("u-123", "secret", FIXTURE).unwrap();
        assert_eq!(merge_into(&jar, &data), 1);
        let url = Url::parse("https://zodgame.xyz/api/mobile/index.php").unwrap();
        assert_eq!(jar.header_for(&url), Some("sid=abc".to_string()));
    }

    #[tokio::test]
    async fn test_initial_is_idempotent_and_tolerates_sync_failure() {
        let http = HttpClient::new("test", Duration::from_secs(2)).unwrap();
        let cloud = Arc::new(CookieCloud::new(Arc::new(CookieJar::new()), http));
        let config = CookieCloudConfig {
            host: "http://127.0.0.1:9".to_string(),
            uuid: "u".to_string(),
            password: "p".to_string(),
            update_cron: "0 */30 * * * *".to_string(),
        };
        cloud.initial(&config).await.unwrap();
        assert!(cloud.is_started());
        cloud.initial(&config).await.unwrap();
    }

    #[tokio::test]
    async fn test_initial_rejects_bad_cron() {
        let http = HttpClient::new("test", Duration::from_secs(2)).unwrap();
        let cloud = Arc::new(CookieCloud::new(Arc::new(CookieJar::new()), http));
        let config = CookieCloudConfig {
            host: "http://127.0.0.1:9".to_string(),
            uuid: "u".to_string(),
            password: "p".to_string(),
            update_cron: "every now and then".to_string(),
        };
        assert!(matches!(
            cloud.initial(&config).await,
            Err(Error::Config(_))
        ));
        assert!(!cloud.is_started());
    }
}
