//! Stub-to-full enrichment pipeline.
//!
//! Turns the ordered stubs of a listing into full items by running each
//! stub's detail fetch through the shared [`Cache`]. All fetches are launched
//! up front (bounded by `concurrency`) and collected positionally, so the
//! output keeps the input order no matter which fetch finishes first.
//!
//! # Failure policies
//!
//! - [`FailurePolicy::Strict`]: the first failed item fails the whole batch.
//!   Fetches already under way still finish and are cached.
//! - [`FailurePolicy::Lenient`]: failed items are logged and skipped; the
//!   remaining fetches are never cancelled.
//!
//! Each detail fetch runs under its own timeout inside the cached
//! computation, so a timed-out fetch is recorded as a failure and retried on
//! the next request.

use crate::cache::Cache;
use crate::error::{Error, Result};
use crate::models::{FullItem, Stub};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// How a batch reacts to a single failed item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FailurePolicy {
    #[default]
    Strict,
    Lenient,
}

#[derive(Debug, Clone)]
pub struct Enricher {
    cache: Cache,
    policy: FailurePolicy,
    item_timeout: Duration,
    concurrency: usize,
}

impl Enricher {
    pub fn new(cache: Cache) -> Self {
        Self {
            cache,
            policy: FailurePolicy::Strict,
            item_timeout: Duration::from_secs(20),
            concurrency: 50,
        }
    }

    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_item_timeout(mut self, item_timeout: Duration) -> Self {
        self.item_timeout = item_timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Enrich `stubs` into full items, in input order.
    ///
    /// `key_of` derives the cache key for a stub; `fetch_detail` performs the
    /// detail fetch and parse for one stub and is only called on a cache miss.
    #[instrument(level = "info", skip_all, fields(stubs = stubs.len(), policy = ?self.policy))]
    pub async fn enrich<K, F, Fut>(
        &self,
        stubs: Vec<Stub>,
        key_of: K,
        fetch_detail: F,
    ) -> Result<Vec<FullItem>>
    where
        K: Fn(&Stub) -> String,
        F: Fn(Stub) -> Fut,
        Fut: Future<Output = Result<FullItem>> + Send + 'static,
    {
        let total = stubs.len();
        let item_timeout = self.item_timeout;
        let fetch_detail = &fetch_detail;

        let jobs = stream::iter(stubs.into_iter().enumerate())
            .map(|(index, stub)| {
                let key = key_of(&stub);
                let cache = &self.cache;
                async move {
                    debug!(index, %key, "Enriching item");
                    let outcome = cache
                        .try_get(&key, move || {
                            let what = format!("detail fetch for {}", stub.link);
                            let detail = fetch_detail(stub);
                            async move {
                                tokio::time::timeout(item_timeout, detail)
                                    .await
                                    .map_err(|_| Error::Timeout {
                                        what,
                                        after_ms: item_timeout.as_millis(),
                                    })?
                            }
                        })
                        .await;
                    (index, key, outcome)
                }
            })
            .buffered(self.concurrency);

        match self.policy {
            FailurePolicy::Strict => {
                let items: Vec<FullItem> = jobs
                    .map(|(_, _, outcome)| outcome)
                    .try_collect()
                    .await?;
                info!(total, "Enriched all items");
                Ok(items)
            }
            FailurePolicy::Lenient => {
                let outcomes: Vec<(usize, String, Result<FullItem>)> = jobs.collect().await;
                let mut items = Vec::with_capacity(outcomes.len());
                for (index, key, outcome) in outcomes {
                    match outcome {
                        Ok(item) => items.push(item),
                        Err(e) => warn!(index, %key, error = %e, "Detail fetch failed; skipping item"),
                    }
                }
                info!(
                    total,
                    successful = items.len(),
                    failed = total - items.len(),
                    "Enriched items"
                );
                Ok(items)
            }
        }
    }
}
