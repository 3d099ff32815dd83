//! Resolution cache: friendly names to technical identifiers.
//!
//! Each cache holds one catalog (table definitions, remote sources) for one
//! instance. Entries persist through a [`KeyValueStore`] and expire after a
//! per-kind TTL. Only one fetch runs at a time; every caller that arrives
//! while it is running awaits the same future.

pub mod sources;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use crate::config::CacheConfig;
use sources::CatalogSource;
pub use store::{JsonFileStore, KeyValueStore, MemoryStore, SharedStore};

/// One resolvable name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheItem {
    pub display_name: String,
    pub technical_id: String,
}

impl CacheItem {
    pub fn new(display_name: impl Into<String>, technical_id: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            technical_id: technical_id.into(),
        }
    }
}

/// A persisted catalog snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub items: Vec<CacheItem>,
    pub fetched_at: DateTime<Utc>,
}

impl CacheEntry {
    /// Fresh while strictly younger than `ttl`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        match chrono::Duration::from_std(ttl) {
            Ok(ttl) => now.signed_duration_since(self.fetched_at) < ttl,
            Err(_) => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    Tables,
    RemoteSources,
}

impl CacheKind {
    pub fn storage_key(&self) -> &'static str {
        match self {
            CacheKind::Tables => "tables",
            CacheKind::RemoteSources => "remote_sources",
        }
    }
}

/// Source of the current time.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

pub fn system_clock() -> Clock {
    Arc::new(Utc::now)
}

#[derive(Clone)]
pub struct CacheSettings {
    pub ttl: Duration,
    pub max_results: usize,
    pub clock: Clock,
}

impl CacheSettings {
    pub fn new(ttl: Duration, max_results: usize) -> Self {
        Self {
            ttl,
            max_results,
            clock: system_clock(),
        }
    }

    pub fn for_kind(kind: CacheKind, config: &CacheConfig) -> Self {
        let ttl = match kind {
            CacheKind::Tables => config.table_ttl(),
            CacheKind::RemoteSources => config.source_ttl(),
        };
        Self::new(ttl, config.max_results)
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

type InFlight = Shared<BoxFuture<'static, Option<CacheEntry>>>;

/// TTL-bound, persisted name lookup for one catalog.
#[derive(Clone)]
pub struct ResolutionCache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    source: Arc<dyn CatalogSource>,
    store: SharedStore,
    settings: CacheSettings,
    current: RwLock<Option<CacheEntry>>,
    in_flight: Mutex<Option<InFlight>>,
}

impl ResolutionCache {
    pub fn new(source: Arc<dyn CatalogSource>, store: SharedStore, settings: CacheSettings) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                source,
                store,
                settings,
                current: RwLock::new(None),
                in_flight: Mutex::new(None),
            }),
        }
    }

    pub fn kind(&self) -> CacheKind {
        self.inner.source.kind()
    }

    /// Current items.
    ///
    /// With no usable entry this waits for the (shared) fetch. A stale
    /// entry is returned as-is while a refresh runs in the background.
    pub async fn items(&self) -> Vec<CacheItem> {
        let now = (self.inner.settings.clock)();

        match self.current_entry().await {
            Some(entry) if entry.is_fresh_at(now, self.inner.settings.ttl) => entry.items,
            Some(entry) => {
                tracing::debug!(kind = self.kind().storage_key(), "cache stale, refreshing");
                let fetch = self.start_fetch().await;
                tokio::spawn(fetch);
                entry.items
            }
            None => {
                let fetch = self.start_fetch().await;
                fetch.await.map(|entry| entry.items).unwrap_or_default()
            }
        }
    }

    /// Force a fetch, joining one already in flight.
    pub async fn refresh(&self) -> Option<CacheEntry> {
        self.start_fetch().await.await
    }

    /// Ranked matches for `query`, capped at the configured maximum.
    pub async fn lookup(&self, query: &str) -> Vec<CacheItem> {
        let items = self.items().await;
        rank_matches(&items, query, self.inner.settings.max_results)
    }

    /// Best technical id for `query`; never fails.
    pub async fn resolve_exact(&self, query: &str) -> String {
        let items = self.items().await;
        resolve_in(&items, query)
    }

    async fn current_entry(&self) -> Option<CacheEntry> {
        if let Some(entry) = self.inner.current.read().await.clone() {
            return Some(entry);
        }

        let key = self.kind().storage_key();
        let stored = self.inner.store.lock().await.get(key)?;
        match serde_json::from_value::<CacheEntry>(stored) {
            Ok(entry) => {
                *self.inner.current.write().await = Some(entry.clone());
                Some(entry)
            }
            Err(e) => {
                tracing::warn!(key, "ignoring unreadable cache entry: {}", e);
                None
            }
        }
    }

    async fn start_fetch(&self) -> InFlight {
        let mut in_flight = self.inner.in_flight.lock().await;
        if let Some(fetch) = in_flight.as_ref() {
            return fetch.clone();
        }

        let fetch = fetch_and_store(Arc::clone(&self.inner)).boxed().shared();
        *in_flight = Some(fetch.clone());
        fetch
    }
}

/// Fetch the catalog, persist it, and clear the in-flight marker. A failed
/// fetch yields the previous entry.
async fn fetch_and_store(inner: Arc<CacheInner>) -> Option<CacheEntry> {
    let key = inner.source.kind().storage_key();

    let entry = match inner.source.fetch().await {
        Ok(items) => {
            tracing::debug!(key, count = items.len(), "cache fetched");
            let entry = CacheEntry {
                items,
                fetched_at: (inner.settings.clock)(),
            };

            match serde_json::to_value(&entry) {
                Ok(value) => {
                    if let Err(e) = inner.store.lock().await.set(key, value) {
                        tracing::warn!(key, "failed to persist cache: {}", e);
                    }
                }
                Err(e) => tracing::warn!(key, "failed to serialize cache: {}", e),
            }

            *inner.current.write().await = Some(entry.clone());
            Some(entry)
        }
        Err(e) => {
            tracing::warn!(key, "cache fetch failed: {}", e);
            inner.current.read().await.clone()
        }
    };

    *inner.in_flight.lock().await = None;
    entry
}

/// Rank items against a case-insensitive query.
///
/// Prefix matches (on id or display name) come before substring matches;
/// within a rank shorter ids come first, then alphabetical.
pub fn rank_matches(items: &[CacheItem], query: &str, limit: usize) -> Vec<CacheItem> {
    let query = query.trim().to_lowercase();

    let mut ranked: Vec<(u8, &CacheItem)> = items
        .iter()
        .filter_map(|item| {
            let id = item.technical_id.to_lowercase();
            let name = item.display_name.to_lowercase();
            if id.starts_with(&query) || name.starts_with(&query) {
                Some((0, item))
            } else if id.contains(&query) || name.contains(&query) {
                Some((1, item))
            } else {
                None
            }
        })
        .collect();

    ranked.sort_by(|(rank_a, a), (rank_b, b)| {
        rank_a
            .cmp(rank_b)
            .then(a.technical_id.len().cmp(&b.technical_id.len()))
            .then_with(|| a.technical_id.cmp(&b.technical_id))
    });

    ranked
        .into_iter()
        .take(limit)
        .map(|(_, item)| item.clone())
        .collect()
}

/// Exact id match, then exact display-name match, then the input itself.
pub fn resolve_in(items: &[CacheItem], query: &str) -> String {
    let query = query.trim();

    items
        .iter()
        .find(|item| item.technical_id.eq_ignore_ascii_case(query))
        .or_else(|| {
            items
                .iter()
                .find(|item| item.display_name.eq_ignore_ascii_case(query))
        })
        .map(|item| item.technical_id.clone())
        .unwrap_or_else(|| query.to_string())
}
