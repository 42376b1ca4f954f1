//! Universalis market board client.
//!
//! Universalis answers a single-item request with the item object itself and a
//! multi-item request with `{"items": {...}, "unresolvedItems": [...]}`. Both
//! shapes are normalized here so gateways always return `key -> payload`.

use super::http::{UpstreamClient, base_url};
use super::{UpstreamError, UpstreamGateway, join_keys};
use crate::data::models::{CurrentPrice, DataKind, HistoricalPrice, ItemId, Payload, World};
use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::trace;
use url::Url;

const HISTORY_PATH: &str = "history";
const WORLDS_PATH: &str = "worlds";
const TAX_RATES_PATH: &str = "tax-rates";

/// Either response shape for a market request.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MarketResponse<T> {
    Multi {
        items: HashMap<String, T>,
        #[serde(rename = "unresolvedItems", default)]
        #[allow(dead_code)]
        unresolved_items: Vec<ItemId>,
    },
    Single(T),
}

trait MarketView {
    fn item_id(&self) -> ItemId;
}

impl<T: MarketView> MarketResponse<T> {
    fn into_views(self) -> Vec<T> {
        match self {
            MarketResponse::Multi { items, .. } => items.into_values().collect(),
            MarketResponse::Single(view) => vec![view],
        }
    }
}

#[derive(Debug, Deserialize)]
struct CurrentView {
    #[serde(rename = "itemID")]
    item_id: ItemId,
    #[serde(rename = "minPriceNQ", default)]
    min_price_nq: Option<i64>,
}

impl MarketView for CurrentView {
    fn item_id(&self) -> ItemId {
        self.item_id
    }
}

#[derive(Debug, Deserialize)]
struct HistoryView {
    #[serde(rename = "itemID")]
    item_id: ItemId,
    #[serde(default)]
    entries: Vec<SaleEntry>,
    #[serde(rename = "nqSaleVelocity", default)]
    nq_sale_velocity: f64,
}

impl MarketView for HistoryView {
    fn item_id(&self) -> ItemId {
        self.item_id
    }
}

#[derive(Debug, Deserialize)]
struct SaleEntry {
    #[serde(default)]
    hq: bool,
    #[serde(rename = "pricePerUnit")]
    price_per_unit: i64,
    quantity: i64,
}

impl From<CurrentView> for CurrentPrice {
    fn from(view: CurrentView) -> Self {
        // Universalis reports 0 when a world has no NQ listings.
        CurrentPrice {
            current_min_price_nq: view.min_price_nq.filter(|price| *price > 0),
        }
    }
}

fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl From<HistoryView> for HistoricalPrice {
    fn from(view: HistoryView) -> Self {
        let nq: Vec<&SaleEntry> = view.entries.iter().filter(|e| !e.hq).collect();
        let mut prices: Vec<f64> = nq.iter().map(|e| e.price_per_unit as f64).collect();
        let mut stacks: Vec<f64> = nq.iter().map(|e| e.quantity as f64).collect();

        let num_items_sold: i64 = nq.iter().map(|e| e.quantity).sum();
        let average_price_per_unit = if prices.is_empty() {
            0
        } else {
            (prices.iter().sum::<f64>() / prices.len() as f64).round() as i64
        };
        let possible_money_per_day =
            (view.nq_sale_velocity * average_price_per_unit as f64).round() as i64;

        HistoricalPrice {
            nq_daily_sale_velocity: view.nq_sale_velocity,
            average_price_per_unit,
            num_items_sold,
            possible_money_per_day,
            median_stack_size: median(&mut stacks),
            median_price: median(&mut prices),
        }
    }
}

/// Raw Universalis API access, shared by the market gateways and reference data.
pub struct UniversalisClient {
    client: Arc<UpstreamClient>,
    base: Url,
}

impl UniversalisClient {
    pub fn new(client: Arc<UpstreamClient>, base: &str) -> Result<Self, UpstreamError> {
        Ok(Self {
            client,
            base: base_url(base)?,
        })
    }

    fn market_url(&self, history: bool, world: &str, keys: &[ItemId]) -> Result<Url, UpstreamError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| url::ParseError::RelativeUrlWithCannotBeABaseBase)?;
            segments.pop_if_empty();
            if history {
                segments.push(HISTORY_PATH);
            }
            segments.push(world).push(&join_keys(keys));
        }
        Ok(url)
    }

    async fn market<T>(
        &self,
        history: bool,
        world: &str,
        keys: &[ItemId],
    ) -> Result<Vec<T>, UpstreamError>
    where
        T: MarketView + DeserializeOwned,
    {
        let url = self.market_url(history, world, keys)?;
        match self.client.get_json::<MarketResponse<T>>(url).await {
            Ok(response) => Ok(response.into_views()),
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    /// All worlds known to Universalis.
    pub async fn worlds(&self) -> Result<Vec<World>, UpstreamError> {
        let url = self.base.join(WORLDS_PATH)?;
        self.client.get_json(url).await
    }

    /// Retainer city tax rates (percent) for a world.
    pub async fn tax_rates(&self, world: &str) -> Result<BTreeMap<String, i32>, UpstreamError> {
        let mut url = self.base.join(TAX_RATES_PATH)?;
        url.query_pairs_mut().append_pair("world", world);
        self.client.get_json(url).await
    }
}

/// Current or historical price gateway over [`UniversalisClient`].
pub struct UniversalisGateway {
    client: Arc<UniversalisClient>,
    kind: DataKind,
}

impl UniversalisGateway {
    pub fn current(client: Arc<UniversalisClient>) -> Self {
        Self {
            client,
            kind: DataKind::CurrentPrice,
        }
    }

    pub fn historical(client: Arc<UniversalisClient>) -> Self {
        Self {
            client,
            kind: DataKind::HistoricalPrice,
        }
    }
}

/// Keep only views for requested keys; Universalis echoes ids it was asked for,
/// but a stray id must not leak into a job's result.
fn collect_requested<T, P>(views: Vec<T>, keys: &[ItemId]) -> HashMap<ItemId, Payload>
where
    T: MarketView + Into<P>,
    P: Into<Payload>,
{
    views
        .into_iter()
        .filter(|view| keys.contains(&view.item_id()))
        .map(|view| (view.item_id(), view.into().into()))
        .collect()
}

#[async_trait]
impl UpstreamGateway for UniversalisGateway {
    fn kind(&self) -> DataKind {
        self.kind
    }

    async fn fetch_batch(
        &self,
        scope: Option<&str>,
        keys: &[ItemId],
    ) -> Result<HashMap<ItemId, Payload>, UpstreamError> {
        let world = scope.ok_or(UpstreamError::MissingScope(self.kind))?;
        if keys.is_empty() {
            return Ok(HashMap::new());
        }
        let items = match self.kind {
            DataKind::HistoricalPrice => {
                let views = self.client.market::<HistoryView>(true, world, keys).await?;
                collect_requested::<_, HistoricalPrice>(views, keys)
            }
            _ => {
                let views = self.client.market::<CurrentView>(false, world, keys).await?;
                collect_requested::<_, CurrentPrice>(views, keys)
            }
        };
        trace!(
            kind = %self.kind,
            world,
            requested = keys.len(),
            resolved = items.len(),
            "Fetched market data"
        );
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::json;

    #[test]
    fn single_and_multi_shapes_normalize_alike() {
        let single = r#"{"itemID": 5, "worldName": "Gaia", "minPriceNQ": 120, "listings": []}"#;
        let multi = r#"{
            "itemIDs": [5, 6, 7],
            "items": {
                "5": {"itemID": 5, "minPriceNQ": 120},
                "6": {"itemID": 6, "minPriceNQ": 0}
            },
            "unresolvedItems": [7]
        }"#;

        let single: MarketResponse<CurrentView> = json::decode(single).unwrap();
        let single = collect_requested::<_, CurrentPrice>(single.into_views(), &[5]);
        assert_eq!(
            single.get(&5),
            Some(&Payload::Current(CurrentPrice {
                current_min_price_nq: Some(120)
            }))
        );

        let multi: MarketResponse<CurrentView> = json::decode(multi).unwrap();
        let multi = collect_requested::<_, CurrentPrice>(multi.into_views(), &[5, 6, 7]);
        assert_eq!(multi.len(), 2);
        assert_eq!(multi.get(&5), single.get(&5));
        assert_eq!(
            multi.get(&6),
            Some(&Payload::Current(CurrentPrice {
                current_min_price_nq: None
            }))
        );
        assert!(!multi.contains_key(&7));
    }

    #[test]
    fn unrequested_ids_are_dropped() {
        let views = vec![
            CurrentView { item_id: 1, min_price_nq: Some(10) },
            CurrentView { item_id: 2, min_price_nq: Some(20) },
        ];
        let items = collect_requested::<_, CurrentPrice>(views, &[2]);
        assert_eq!(items.keys().copied().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn history_statistics_use_nq_sales() {
        let body = r#"{
            "itemID": 5,
            "nqSaleVelocity": 4.0,
            "entries": [
                {"hq": false, "pricePerUnit": 100, "quantity": 2, "timestamp": 1},
                {"hq": false, "pricePerUnit": 300, "quantity": 5, "timestamp": 2},
                {"hq": false, "pricePerUnit": 200, "quantity": 1, "timestamp": 3},
                {"hq": true, "pricePerUnit": 9000, "quantity": 99, "timestamp": 4}
            ]
        }"#;
        let view: HistoryView = json::decode(body).unwrap();
        let stats = HistoricalPrice::from(view);

        assert_eq!(stats.num_items_sold, 8);
        assert_eq!(stats.average_price_per_unit, 200);
        assert_eq!(stats.median_price, 200.0);
        assert_eq!(stats.median_stack_size, 2.0);
        assert_eq!(stats.possible_money_per_day, 800);
        assert_eq!(stats.nq_daily_sale_velocity, 4.0);
    }

    #[test]
    fn history_without_sales_is_zeroed() {
        let view: HistoryView = json::decode(r#"{"itemID": 5}"#).unwrap();
        let stats = HistoricalPrice::from(view);
        assert_eq!(stats.num_items_sold, 0);
        assert_eq!(stats.median_price, 0.0);
    }

    #[test]
    fn market_urls_include_world_and_keys() {
        let http = Arc::new(UpstreamClient::new("universalis", 1, Default::default()).unwrap());
        let client = UniversalisClient::new(http, "https://universalis.app/api/v2/").unwrap();
        assert_eq!(
            client.market_url(false, "Gaia", &[5, 6]).unwrap().as_str(),
            "https://universalis.app/api/v2/Gaia/5,6"
        );
        assert_eq!(
            client.market_url(true, "Gaia", &[5]).unwrap().as_str(),
            "https://universalis.app/api/v2/history/Gaia/5"
        );
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        assert_eq!(median(&mut [4.0, 1.0, 3.0, 2.0]), 2.5);
        assert_eq!(median(&mut []), 0.0);
    }
}
