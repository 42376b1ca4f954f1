//! Domain types shared by the refresh engine, the cache stores, and the
//! upstream gateways.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ts_rs::TS;

/// Game item identifier as used by both XIVAPI and Universalis.
pub type ItemId = u32;

/// The three kinds of cached data, each with its own TTL and performance counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, TS)]
#[serde(rename_all = "kebab-case")]
#[ts(export)]
pub enum DataKind {
    ItemMetadata,
    CurrentPrice,
    HistoricalPrice,
}

impl DataKind {
    pub const ALL: [DataKind; 3] = [
        DataKind::ItemMetadata,
        DataKind::CurrentPrice,
        DataKind::HistoricalPrice,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            DataKind::ItemMetadata => "item-metadata",
            DataKind::CurrentPrice => "current-price",
            DataKind::HistoricalPrice => "historical-price",
        }
    }

    /// Dense index for per-kind arrays.
    pub fn index(self) -> usize {
        match self {
            DataKind::ItemMetadata => 0,
            DataKind::CurrentPrice => 1,
            DataKind::HistoricalPrice => 2,
        }
    }

    /// Price data is partitioned by world; metadata is global.
    pub fn is_scoped(self) -> bool {
        !matches!(self, DataKind::ItemMetadata)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown data kind '{s}'"))
    }
}

/// Name and icon of an item, from the XIVAPI item sheet.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct ItemMetadata {
    pub name: String,
    pub icon_path: String,
}

/// Current cheapest normal-quality listing on a world.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct CurrentPrice {
    /// `None` when the world has no normal-quality listings.
    #[ts(type = "number | null")]
    pub current_min_price_nq: Option<i64>,
}

/// Sale statistics derived from recent normal-quality sale history on a world.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[ts(export)]
pub struct HistoricalPrice {
    pub nq_daily_sale_velocity: f64,
    #[ts(type = "number")]
    pub average_price_per_unit: i64,
    #[ts(type = "number")]
    pub num_items_sold: i64,
    #[ts(type = "number")]
    pub possible_money_per_day: i64,
    pub median_stack_size: f64,
    pub median_price: f64,
}

/// A fully populated cache payload of one data kind.
#[derive(Debug, Clone, PartialEq, Serialize, TS)]
#[serde(untagged)]
#[ts(export)]
pub enum Payload {
    Item(ItemMetadata),
    Current(CurrentPrice),
    Historical(HistoricalPrice),
}

impl Payload {
    pub fn kind(&self) -> DataKind {
        match self {
            Payload::Item(_) => DataKind::ItemMetadata,
            Payload::Current(_) => DataKind::CurrentPrice,
            Payload::Historical(_) => DataKind::HistoricalPrice,
        }
    }
}

impl From<ItemMetadata> for Payload {
    fn from(value: ItemMetadata) -> Self {
        Payload::Item(value)
    }
}

impl From<CurrentPrice> for Payload {
    fn from(value: CurrentPrice) -> Self {
        Payload::Current(value)
    }
}

impl From<HistoricalPrice> for Payload {
    fn from(value: HistoricalPrice) -> Self {
        Payload::Historical(value)
    }
}

/// A game world as listed by Universalis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow, TS)]
#[ts(export)]
pub struct World {
    pub id: i32,
    pub name: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_kind_round_trips_through_str() {
        for kind in DataKind::ALL {
            assert_eq!(kind.as_str().parse::<DataKind>(), Ok(kind));
        }
        assert!("market".parse::<DataKind>().is_err());
    }

    #[test]
    fn payload_serializes_without_a_tag() {
        let payload = Payload::from(ItemMetadata {
            name: "Potion".to_owned(),
            icon_path: "i/020000/020601".to_owned(),
        });
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "Potion", "icon_path": "i/020000/020601"})
        );
    }

    #[test]
    fn only_prices_are_scoped() {
        assert!(!DataKind::ItemMetadata.is_scoped());
        assert!(DataKind::CurrentPrice.is_scoped());
        assert!(DataKind::HistoricalPrice.is_scoped());
    }
}
