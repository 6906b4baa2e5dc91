//! Read-through caching over the local store's `cache` collection.
//!
//! Reads are the only place backend failures are absorbed: a transient
//! failure falls back to whatever entry is cached, expired or not.

use std::future::Future;

use chrono::Duration;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::db::LocalStore;
use crate::error::{Error, Result};
use crate::models::CacheEntry;

/// Serve `key` from cache when fresh, otherwise call `fetch` and cache its result.
pub async fn read_through<T, F, Fut>(
    store: &LocalStore,
    key: &str,
    ttl: Option<Duration>,
    fetch: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let cached = peek(store, key).await;

    if let Some(entry) = cached.as_ref().filter(|entry| !entry.is_expired(store.now())) {
        match serde_json::from_value(entry.data.clone()) {
            Ok(value) => return Ok(value),
            Err(error) => tracing::warn!(key, "Ignoring undecodable cache entry: {error}"),
        }
    }

    match fetch().await {
        Ok(value) => {
            if let Err(error) = store.cache_set(key, &value, ttl).await {
                if !error.is_not_initialized() {
                    tracing::warn!(key, "Failed to cache value: {error}");
                }
            }
            Ok(value)
        }
        Err(error) if is_transient(&error) => {
            let Some(entry) = cached else {
                return Err(error);
            };
            tracing::warn!(key, "Backend unavailable, serving cached value: {error}");
            Ok(serde_json::from_value(entry.data)?)
        }
        Err(error) => Err(error),
    }
}

async fn peek(store: &LocalStore, key: &str) -> Option<CacheEntry> {
    match store.cache_peek(key).await {
        Ok(entry) => entry,
        Err(error) if error.is_not_initialized() => None,
        Err(error) => {
            tracing::warn!(key, "Cache lookup failed: {error}");
            None
        }
    }
}

fn is_transient(error: &Error) -> bool {
    matches!(error, Error::Backend(backend) if backend.is_transient())
}
