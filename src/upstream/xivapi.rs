//! XIVAPI item sheet client.

use super::http::{UpstreamClient, base_url};
use super::{UpstreamError, UpstreamGateway, join_keys};
use crate::data::models::{DataKind, ItemId, ItemMetadata, Payload};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;
use url::Url;

const ITEM_SHEET_PATH: &str = "sheet/Item";
const ITEM_FIELDS: &str = "Name,Icon.path";

#[derive(Debug, Deserialize)]
struct SheetResponse {
    #[serde(default)]
    rows: Vec<SheetRow>,
}

#[derive(Debug, Deserialize)]
struct SheetRow {
    row_id: ItemId,
    fields: ItemFields,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemFields {
    #[serde(default)]
    name: String,
    icon: Option<IconField>,
}

#[derive(Debug, Deserialize)]
struct IconField {
    path: String,
}

/// Convert the sheet's texture path (`ui/icon/020000/020601.tex`) into the
/// short asset path served by the icon CDN (`i/020000/020601`).
pub fn normalize_icon_path(path: &str) -> String {
    let path = path.strip_prefix("ui/icon/").map_or_else(
        || path.to_owned(),
        |rest| format!("i/{rest}"),
    );
    path.strip_suffix(".tex").map(str::to_owned).unwrap_or(path)
}

/// Item metadata gateway backed by the XIVAPI item sheet.
pub struct XivApiGateway {
    client: Arc<UpstreamClient>,
    base: Url,
}

impl XivApiGateway {
    pub fn new(client: Arc<UpstreamClient>, base: &str) -> Result<Self, UpstreamError> {
        Ok(Self {
            client,
            base: base_url(base)?,
        })
    }

    fn rows_url(&self, keys: &[ItemId]) -> Result<Url, UpstreamError> {
        let mut url = self.base.join(ITEM_SHEET_PATH)?;
        url.query_pairs_mut()
            .append_pair("rows", &join_keys(keys))
            .append_pair("fields", ITEM_FIELDS);
        Ok(url)
    }
}

fn into_payloads(response: SheetResponse) -> HashMap<ItemId, Payload> {
    response
        .rows
        .into_iter()
        .filter(|row| !row.fields.name.is_empty())
        .map(|row| {
            let icon_path = row
                .fields
                .icon
                .map(|icon| normalize_icon_path(&icon.path))
                .unwrap_or_default();
            let metadata = ItemMetadata {
                name: row.fields.name,
                icon_path,
            };
            (row.row_id, Payload::Item(metadata))
        })
        .collect()
}

#[async_trait]
impl UpstreamGateway for XivApiGateway {
    fn kind(&self) -> DataKind {
        DataKind::ItemMetadata
    }

    async fn fetch_batch(
        &self,
        _scope: Option<&str>,
        keys: &[ItemId],
    ) -> Result<HashMap<ItemId, Payload>, UpstreamError> {
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let url = self.rows_url(keys)?;
        let response: SheetResponse = match self.client.get_json(url).await {
            Ok(response) => response,
            Err(e) if e.is_not_found() => return Ok(HashMap::new()),
            Err(e) => return Err(e),
        };
        let items = into_payloads(response);
        trace!(requested = keys.len(), resolved = items.len(), "Fetched item metadata");
        Ok(items)
    }
}
