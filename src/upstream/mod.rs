//! Upstream data sources: XIVAPI for item metadata, Universalis for market data.
//!
//! The refresh engine only sees [`UpstreamGateway`]: one batched fetch per data
//! kind returning a uniform `key -> payload` mapping. Retries, pacing, and
//! response-shape differences are handled below this boundary.

pub mod errors;
pub mod http;
pub mod json;
pub mod universalis;
pub mod xivapi;

use crate::data::models::{DataKind, ItemId, Payload};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

pub use errors::UpstreamError;
pub use http::UpstreamClient;
pub use universalis::{UniversalisClient, UniversalisGateway};
pub use xivapi::XivApiGateway;

/// Batched fetch capability for one data kind.
///
/// Implementations retry transient failures themselves and return only the
/// keys they resolved. An empty map is a valid result; an error means the
/// whole batch failed.
#[async_trait]
pub trait UpstreamGateway: Send + Sync {
    fn kind(&self) -> DataKind;

    async fn fetch_batch(
        &self,
        scope: Option<&str>,
        keys: &[ItemId],
    ) -> Result<HashMap<ItemId, Payload>, UpstreamError>;
}

/// One gateway per data kind.
#[derive(Clone)]
pub struct Gateways {
    metadata: Arc<dyn UpstreamGateway>,
    current: Arc<dyn UpstreamGateway>,
    historical: Arc<dyn UpstreamGateway>,
}

impl Gateways {
    pub fn new(
        metadata: Arc<dyn UpstreamGateway>,
        current: Arc<dyn UpstreamGateway>,
        historical: Arc<dyn UpstreamGateway>,
    ) -> Self {
        debug_assert_eq!(metadata.kind(), DataKind::ItemMetadata);
        debug_assert_eq!(current.kind(), DataKind::CurrentPrice);
        debug_assert_eq!(historical.kind(), DataKind::HistoricalPrice);
        Self {
            metadata,
            current,
            historical,
        }
    }

    pub fn get(&self, kind: DataKind) -> &Arc<dyn UpstreamGateway> {
        match kind {
            DataKind::ItemMetadata => &self.metadata,
            DataKind::CurrentPrice => &self.current,
            DataKind::HistoricalPrice => &self.historical,
        }
    }
}

/// Render keys the way both upstreams accept them in paths and queries.
pub(crate) fn join_keys(keys: &[ItemId]) -> String {
    keys.iter()
        .map(ItemId::to_string)
        .collect::<Vec<_>>()
        .join(",")
}
