//! Catalogs the resolution caches are filled from.

use async_trait::async_trait;
use serde_json::Value;

use super::{CacheItem, CacheKind};
use crate::client::BridgeClient;
use crate::error::{PaletteError, PaletteResult};

/// Something that can list every item of one catalog.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    fn kind(&self) -> CacheKind;

    async fn fetch(&self) -> PaletteResult<Vec<CacheItem>>;
}

/// Table definitions (`name` is the technical id, `label` the display name).
pub struct TableCatalog {
    client: BridgeClient,
    endpoint: String,
}

impl TableCatalog {
    pub fn new(client: BridgeClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CatalogSource for TableCatalog {
    fn kind(&self) -> CacheKind {
        CacheKind::Tables
    }

    async fn fetch(&self) -> PaletteResult<Vec<CacheItem>> {
        let body = self.client.get(&self.endpoint).await?;
        items_from_records(&body, "name", "label")
    }
}

/// Remote update-set sources (`sys_id` is the technical id).
pub struct RemoteSourceCatalog {
    client: BridgeClient,
    endpoint: String,
}

impl RemoteSourceCatalog {
    pub fn new(client: BridgeClient, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl CatalogSource for RemoteSourceCatalog {
    fn kind(&self) -> CacheKind {
        CacheKind::RemoteSources
    }

    async fn fetch(&self) -> PaletteResult<Vec<CacheItem>> {
        let body = self.client.get(&self.endpoint).await?;
        items_from_records(&body, "sys_id", "name")
    }
}

/// Build items from a REST `result` array. Records without an id are
/// skipped; a missing display name falls back to the id.
fn items_from_records(body: &Value, id_field: &str, name_field: &str) -> PaletteResult<Vec<CacheItem>> {
    let records = body
        .get("result")
        .and_then(Value::as_array)
        .ok_or_else(|| PaletteError::MalformedResponse("Expected a result array".to_string()))?;

    Ok(records
        .iter()
        .filter_map(|record| {
            let id = record.get(id_field)?.as_str()?.trim();
            if id.is_empty() {
                return None;
            }
            let name = record
                .get(name_field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|n| !n.is_empty())
                .unwrap_or(id);
            Some(CacheItem::new(name, id))
        })
        .collect())
}
