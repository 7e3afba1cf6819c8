//! Image asset inventory with TTL caching.
//!
//! The storage bucket changes rarely, so listings are cached. The cache takes
//! the current time as an argument instead of reading the clock itself, which
//! makes expiry testable without sleeping.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// One image asset the server may hand to clients.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AssetEntry {
    /// Object filename, e.g. `galaxy_s25_camera_p12_top_a1b2c3d4.jpg`.
    pub name: String,
    /// Public URL the asset is served from.
    pub url: String,
}

#[async_trait]
pub trait ImageInventory: Send + Sync {
    async fn list(&self) -> Result<Vec<AssetEntry>>;
}

#[async_trait]
impl ImageInventory for Box<dyn ImageInventory> {
    async fn list(&self) -> Result<Vec<AssetEntry>> {
        (**self).list().await
    }
}

/// [`ImageInventory`] backed by a storage bucket listing endpoint.
pub struct StorageInventory {
    http: reqwest::Client,
    storage_url: String,
    storage_key: String,
    bucket: String,
    public_base_url: String,
}

#[derive(Serialize)]
struct ListParams<'a> {
    prefix: &'a str,
    limit: u32,
}

#[derive(Deserialize)]
struct ObjectRow {
    name: String,
}

impl StorageInventory {
    pub fn new(
        storage_url: impl Into<String>,
        storage_key: impl Into<String>,
        bucket: impl Into<String>,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            storage_url: storage_url.into().trim_end_matches('/').to_string(),
            storage_key: storage_key.into(),
            bucket: bucket.into(),
            public_base_url: public_base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl ImageInventory for StorageInventory {
    async fn list(&self) -> Result<Vec<AssetEntry>> {
        let response = self
            .http
            .post(format!(
                "{}/storage/v1/object/list/{}",
                self.storage_url, self.bucket
            ))
            .header("apikey", &self.storage_key)
            .bearer_auth(&self.storage_key)
            .json(&ListParams { prefix: "", limit: 1000 })
            .send()
            .await
            .context("storage listing request failed")?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("storage listing returned status {status}");
        }

        let rows: Vec<ObjectRow> = response
            .json()
            .await
            .context("storage listing returned an unexpected body")?;
        Ok(rows
            .into_iter()
            .map(|row| AssetEntry {
                url: format!("{}/{}", self.public_base_url, row.name),
                name: row.name,
            })
            .collect())
    }
}

struct CacheSlot {
    fetched_at: DateTime<Utc>,
    entries: Vec<AssetEntry>,
}

/// TTL cache over an [`ImageInventory`].
pub struct CachedInventory<I> {
    inner: I,
    ttl: Duration,
    slot: RwLock<Option<CacheSlot>>,
}

impl<I: ImageInventory> CachedInventory<I> {
    pub fn new(inner: I, ttl: Duration) -> Self {
        Self { inner, ttl, slot: RwLock::new(None) }
    }

    /// Returns cached entries, refreshing from the backend when the cache is
    /// empty or older than the TTL at `now`.
    pub async fn entries(&self, now: DateTime<Utc>) -> Result<Vec<AssetEntry>> {
        {
            let slot = self.slot.read().await;
            if let Some(cached) = slot.as_ref() {
                if now - cached.fetched_at < self.ttl {
                    return Ok(cached.entries.clone());
                }
            }
        }

        let mut slot = self.slot.write().await;
        // Another task may have refreshed while we waited for the lock.
        if let Some(cached) = slot.as_ref() {
            if now - cached.fetched_at < self.ttl {
                return Ok(cached.entries.clone());
            }
        }

        let entries = self.inner.list().await?;
        debug!(count = entries.len(), "image inventory refreshed");
        *slot = Some(CacheSlot { fetched_at: now, entries: entries.clone() });
        Ok(entries)
    }
}
