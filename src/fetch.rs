//! Cache-aware fetching
//!
//! [`CachedFetcher`] answers one logical "fetch resource X" request by combining the
//! [`CacheStore`] and the [`ResilientClient`] according to a [`CachePolicy`]:
//!
//! | strategy        | cache read             | network       | cache write |
//! |-----------------|------------------------|---------------|-------------|
//! | `CacheOnly`     | live entry or notFound | never         | never       |
//! | `NetworkOnly`   | never                  | always        | never       |
//! | `CacheFirst`    | live entry wins        | on miss       | on success  |
//! | `NetworkFirst`  | stale fallback only    | always first  | on success  |
//!
//! `force_refresh` turns `CacheFirst` and `CacheOnly` into `NetworkOnly` for one call.

use std::future::Future;
use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::cache::{CachePolicy, CacheStore, CacheStrategy};
use crate::client::{ApiRequest, ResilientClient};
use crate::failure::{CacheFailure, Failure, FailureKind, Result};

/// Where a fetched value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// A live cache entry
    Cache,
    /// A successful network call
    Network,
    /// A cached entry served because the network call failed; may be expired
    StaleCache,
}

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Cache => "cache",
            Source::Network => "network",
            Source::StaleCache => "stale-cache",
        }
    }
}

/// A value together with its origin
#[derive(Debug, Clone, PartialEq)]
pub struct Fetched<T> {
    pub value: T,
    pub source: Source,
}

impl<T> Fetched<T> {
    pub fn is_stale(&self) -> bool {
        self.source == Source::StaleCache
    }
}

/// Combines a cache store and a network client per request
///
/// Holds no state of its own beyond the two injected collaborators.
#[derive(Debug, Clone)]
pub struct CachedFetcher {
    cache: Arc<CacheStore>,
    client: Arc<ResilientClient>,
}

impl CachedFetcher {
    pub fn new(cache: Arc<CacheStore>, client: Arc<ResilientClient>) -> Self {
        Self { cache, client }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn client(&self) -> &ResilientClient {
        &self.client
    }

    /// Fetches `key` under `policy`, calling `network_call` when the network is needed
    pub async fn fetch<T, F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        network_call: F,
        force_refresh: bool,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.fetch_with_source(key, policy, network_call, force_refresh)
            .await
            .map(|fetched| fetched.value)
    }

    /// Like [`fetch`](Self::fetch), reporting whether the value is fresh, cached or stale
    pub async fn fetch_with_source<T, F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        network_call: F,
        force_refresh: bool,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.dispatch(
            key,
            policy,
            || async move { network_call().await.map(|value| (value, None)) },
            force_refresh,
        )
        .await
    }

    /// Fetches `key` by executing `request` on the injected client
    ///
    /// The response's ETag is stored alongside the cached value.
    pub async fn fetch_resource<T>(
        &self,
        key: &str,
        policy: &CachePolicy,
        request: ApiRequest,
        force_refresh: bool,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        let client = Arc::clone(&self.client);
        self.dispatch(
            key,
            policy,
            || async move {
                let path = request.path.clone();
                let response = client.execute(request).await?;
                let value = serde_json::from_value(response.data).map_err(|e| {
                    Failure::unknown(format!("unexpected data from '{}': {}", path, e))
                })?;
                Ok((value, response.etag))
            },
            force_refresh,
        )
        .await
    }

    async fn dispatch<T, F, Fut>(
        &self,
        key: &str,
        policy: &CachePolicy,
        network_call: F,
        force_refresh: bool,
    ) -> Result<Fetched<T>>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(T, Option<String>)>>,
    {
        let strategy = match policy.strategy {
            CacheStrategy::CacheFirst | CacheStrategy::CacheOnly if force_refresh => {
                CacheStrategy::NetworkOnly
            }
            strategy => strategy,
        };
        debug!(key, %strategy, force_refresh, "fetching");

        match strategy {
            CacheStrategy::CacheOnly => match self.cache.get::<T>(key).await {
                Ok(Some(value)) => Ok(Fetched {
                    value,
                    source: Source::Cache,
                }),
                Ok(None) => Err(Failure::not_found(key)),
                Err(failure) if is_unusable_entry(&failure) => Err(Failure::not_found(key)),
                Err(failure) => Err(failure),
            },

            CacheStrategy::NetworkOnly => {
                let (value, _) = network_call().await?;
                Ok(Fetched {
                    value,
                    source: Source::Network,
                })
            }

            CacheStrategy::CacheFirst => {
                match self.cache.get::<T>(key).await {
                    Ok(Some(value)) => {
                        return Ok(Fetched {
                            value,
                            source: Source::Cache,
                        })
                    }
                    Ok(None) => {}
                    Err(failure) => {
                        debug!(key, error = %failure, "cache unusable, going to network");
                    }
                }

                let (value, etag) = network_call().await?;
                self.write_through(key, &value, policy, etag).await;
                Ok(Fetched {
                    value,
                    source: Source::Network,
                })
            }

            CacheStrategy::NetworkFirst => match network_call().await {
                Ok((value, etag)) => {
                    self.write_through(key, &value, policy, etag).await;
                    Ok(Fetched {
                        value,
                        source: Source::Network,
                    })
                }
                Err(failure) if policy.allow_stale => self.stale_fallback(key, failure).await,
                Err(failure) => Err(failure),
            },
        }
    }

    /// Serves whatever is cached for `key` in place of `failure`
    async fn stale_fallback<T: DeserializeOwned>(
        &self,
        key: &str,
        failure: Failure,
    ) -> Result<Fetched<T>> {
        match self.cache.get_stale::<T>(key).await {
            Ok(Some(cached)) => {
                warn!(
                    key,
                    error = %failure,
                    cached_at = %cached.cached_at,
                    expired = cached.is_expired,
                    "network failed, serving cached value"
                );
                Ok(Fetched {
                    value: cached.data,
                    source: Source::StaleCache,
                })
            }
            Ok(None) => Err(failure),
            Err(cache_failure) => {
                debug!(key, error = %cache_failure, "no usable stale value");
                Err(failure)
            }
        }
    }

    /// A failed write-through is logged, never returned
    async fn write_through<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        policy: &CachePolicy,
        etag: Option<String>,
    ) {
        if let Err(failure) = self.cache.put(key, value, policy.ttl, etag).await {
            warn!(key, error = %failure, "failed to cache network result");
        }
    }
}

fn is_unusable_entry(failure: &Failure) -> bool {
    matches!(
        failure.kind,
        FailureKind::Cache(
            CacheFailure::NotFound(_) | CacheFailure::Expired(_) | CacheFailure::CorruptedData
        )
    )
}
