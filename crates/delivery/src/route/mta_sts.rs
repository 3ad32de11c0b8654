/*
 * Robin mail transfer agent
 *
 * Copyright (C) 2024 - the Robin authors
 * Licensed under the Elastic License 2.0
 *
 * You should have received a copy of the Elastic License 2.0 along with
 * this program. If not, see https://www.elastic.co/licensing/elastic-license.
 *
 */

//! MTA-STS policy retrieval and caching (RFC 8461 section 3.3).

use robin_dns::sts::{InvalidStsPolicy, StsPolicy};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, thiserror::Error)]
pub enum FetchError {
    #[error("policy fetch failed: {0}")]
    Http(String),
    #[error("policy fetch timed out")]
    Timeout,
    #[error(transparent)]
    Invalid(#[from] InvalidStsPolicy),
}

/// The HTTPS side of policy discovery, pluggable for tests.
#[async_trait::async_trait]
pub trait PolicyFetcher: Send + Sync {
    /// Fetch `https://mta-sts.<domain>/.well-known/mta-sts.txt`.
    async fn fetch(&self, domain: &str) -> Result<String, FetchError>;
}

/// Production fetcher with the 10 second budget the policy path gets.
pub struct HttpsFetcher {
    client: reqwest::Client,
}

impl HttpsFetcher {
    pub fn new() -> Result<Self, FetchError> {
        reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map(|client| Self { client })
            .map_err(|e| FetchError::Http(e.to_string()))
    }
}

#[async_trait::async_trait]
impl PolicyFetcher for HttpsFetcher {
    async fn fetch(&self, domain: &str) -> Result<String, FetchError> {
        let url = format!("https://mta-sts.{domain}/.well-known/mta-sts.txt");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() {
                FetchError::Timeout
            } else {
                FetchError::Http(e.to_string())
            }
        })?;

        if !response.status().is_success() {
            return Err(FetchError::Http(format!(
                "{url} answered {}",
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| FetchError::Http(e.to_string()))
    }
}

struct CacheEntry {
    policy: Arc<StsPolicy>,
    expires_at: std::time::Instant,
}

/// Shared policy cache: one entry per domain, valid until `max_age`,
/// refreshed at most once at a time per domain. Readers of the current
/// value never wait on a refresh of the same domain.
pub struct StsPolicyCache {
    fetcher: Arc<dyn PolicyFetcher>,
    entries: tokio::sync::RwLock<HashMap<String, CacheEntry>>,
    refreshing: tokio::sync::Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl StsPolicyCache {
    #[must_use]
    pub fn new(fetcher: Arc<dyn PolicyFetcher>) -> Self {
        Self {
            fetcher,
            entries: tokio::sync::RwLock::new(HashMap::new()),
            refreshing: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The policy for `domain` under the advertised `id`, fetched unless a
    /// fresh entry for the same policy id is cached.
    pub async fn get(&self, domain: &str, id: &str) -> Result<Arc<StsPolicy>, FetchError> {
        if let Some(policy) = self.lookup_fresh(domain, id).await {
            return Ok(policy);
        }

        let key_lock = {
            let mut refreshing = self.refreshing.lock().await;
            refreshing
                .entry(domain.to_owned())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        let _refresh_guard = key_lock.lock().await;

        // Someone else may have refreshed while we waited for the lock.
        if let Some(policy) = self.lookup_fresh(domain, id).await {
            return Ok(policy);
        }

        let body = self.fetcher.fetch(domain).await?;
        let policy = Arc::new(StsPolicy::parse(id, &body)?);

        self.entries.write().await.insert(
            domain.to_owned(),
            CacheEntry {
                policy: policy.clone(),
                expires_at: std::time::Instant::now() + policy.max_age,
            },
        );

        tracing::debug!(%domain, %id, mode = %policy.mode, "mta-sts policy refreshed");
        Ok(policy)
    }

    async fn lookup_fresh(&self, domain: &str, id: &str) -> Option<Arc<StsPolicy>> {
        let entries = self.entries.read().await;
        let entry = entries.get(domain)?;
        (entry.policy.id == id && entry.expires_at > std::time::Instant::now())
            .then(|| entry.policy.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingFetcher {
        calls: AtomicUsize,
        body: &'static str,
    }

    #[async_trait::async_trait]
    impl PolicyFetcher for CountingFetcher {
        async fn fetch(&self, _domain: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.body.to_owned())
        }
    }

    const BODY: &str =
        "version: STSv1\nmode: enforce\nmx: mail.example.com\nmax_age: 86400\n";

    fn cache_with(body: &'static str) -> (Arc<CountingFetcher>, StsPolicyCache) {
        let fetcher = Arc::new(CountingFetcher {
            calls: AtomicUsize::new(0),
            body,
        });
        (fetcher.clone(), StsPolicyCache::new(fetcher))
    }

    #[tokio::test]
    async fn fetches_once_per_policy_id() {
        let (fetcher, cache) = cache_with(BODY);

        let first = cache.get("example.com", "1").await.unwrap();
        let second = cache.get("example.com", "1").await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn a_new_policy_id_forces_a_refresh() {
        let (fetcher, cache) = cache_with(BODY);

        cache.get("example.com", "1").await.unwrap();
        cache.get("example.com", "2").await.unwrap();

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_fetch_once() {
        let (fetcher, cache) = cache_with(BODY);
        let cache = Arc::new(cache);

        let tasks = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.get("example.com", "1").await.map(|_| ()) })
            })
            .collect::<Vec<_>>();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalid_bodies_are_not_cached() {
        let (fetcher, cache) = cache_with("version: STSv1\nmode: enforce\n");

        assert!(cache.get("example.com", "1").await.is_err());
        assert!(cache.get("example.com", "1").await.is_err());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
    }
}
