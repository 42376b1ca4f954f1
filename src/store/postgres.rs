//! PostgreSQL cache store.
//!
//! Each data kind lives in its own table keyed by `item_id` (plus `world`
//! for price data). Writes are batched with `UNNEST` and use
//! `ON CONFLICT ... DO UPDATE`, so merging the same key twice overwrites the
//! row instead of duplicating it.

use super::{CacheEntry, CacheStore, PerformanceCounter, StoreError, batch_kind};
use crate::data::models::{CurrentPrice, DataKind, HistoricalPrice, ItemId, ItemMetadata, Payload};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ItemMetadataRow {
    item_id: i64,
    name: String,
    icon_path: String,
    last_refreshed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CurrentPriceRow {
    item_id: i64,
    world: String,
    current_min_price_nq: Option<i64>,
    last_refreshed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct HistoricalPriceRow {
    item_id: i64,
    world: String,
    nq_daily_sale_velocity: f64,
    average_price_per_unit: i64,
    num_items_sold: i64,
    possible_money_per_day: i64,
    median_stack_size: f64,
    median_price: f64,
    last_refreshed_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct CounterRow {
    average_duration_seconds: Option<f64>,
    total_completed_fetches: i64,
}

/// Convert a stored BIGINT id back to an [`ItemId`], skipping corrupt rows.
fn item_id(raw: i64) -> Option<ItemId> {
    match ItemId::try_from(raw) {
        Ok(id) => Some(id),
        Err(_) => {
            warn!(item_id = raw, "Skipping cache row with out-of-range item id");
            None
        }
    }
}

fn require_scope(kind: DataKind, scope: Option<&str>) -> Result<&str, StoreError> {
    scope.ok_or(StoreError::MissingScope(kind))
}

impl PgStore {
    async fn read_metadata(&self, ids: &[i64]) -> Result<Vec<CacheEntry>, StoreError> {
        let rows = sqlx::query_as::<_, ItemMetadataRow>(
            "SELECT item_id, name, icon_path, last_refreshed_at \
             FROM item_metadata WHERE item_id = ANY($1)",
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(CacheEntry {
                    key: item_id(row.item_id)?,
                    scope: None,
                    payload: Payload::Item(ItemMetadata {
                        name: row.name,
                        icon_path: row.icon_path,
                    }),
                    last_refreshed_at: row.last_refreshed_at,
                })
            })
            .collect())
    }

    async fn read_current(&self, ids: &[i64], world: &str) -> Result<Vec<CacheEntry>, StoreError> {
        let rows = sqlx::query_as::<_, CurrentPriceRow>(
            "SELECT item_id, world, current_min_price_nq, last_refreshed_at \
             FROM market_current WHERE item_id = ANY($1) AND world = $2",
        )
        .bind(ids)
        .bind(world)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(CacheEntry {
                    key: item_id(row.item_id)?,
                    scope: Some(row.world),
                    payload: Payload::Current(CurrentPrice {
                        current_min_price_nq: row.current_min_price_nq,
                    }),
                    last_refreshed_at: row.last_refreshed_at,
                })
            })
            .collect())
    }

    async fn read_historical(
        &self,
        ids: &[i64],
        world: &str,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        let rows = sqlx::query_as::<_, HistoricalPriceRow>(
            "SELECT item_id, world, nq_daily_sale_velocity, average_price_per_unit, \
                    num_items_sold, possible_money_per_day, median_stack_size, median_price, \
                    last_refreshed_at \
             FROM market_historical WHERE item_id = ANY($1) AND world = $2",
        )
        .bind(ids)
        .bind(world)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .filter_map(|row| {
                Some(CacheEntry {
                    key: item_id(row.item_id)?,
                    scope: Some(row.world),
                    payload: Payload::Historical(HistoricalPrice {
                        nq_daily_sale_velocity: row.nq_daily_sale_velocity,
                        average_price_per_unit: row.average_price_per_unit,
                        num_items_sold: row.num_items_sold,
                        possible_money_per_day: row.possible_money_per_day,
                        median_stack_size: row.median_stack_size,
                        median_price: row.median_price,
                    }),
                    last_refreshed_at: row.last_refreshed_at,
                })
            })
            .collect())
    }

    async fn upsert_metadata(&self, entries: &[CacheEntry]) -> Result<(), StoreError> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut names = Vec::with_capacity(entries.len());
        let mut icons = Vec::with_capacity(entries.len());
        let mut refreshed = Vec::with_capacity(entries.len());
        for entry in entries {
            if let Payload::Item(item) = &entry.payload {
                ids.push(i64::from(entry.key));
                names.push(item.name.as_str());
                icons.push(item.icon_path.as_str());
                refreshed.push(entry.last_refreshed_at);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO item_metadata (item_id, name, icon_path, last_refreshed_at)
            SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::text[], $4::timestamptz[])
            ON CONFLICT (item_id)
            DO UPDATE SET name = EXCLUDED.name,
                          icon_path = EXCLUDED.icon_path,
                          last_refreshed_at = EXCLUDED.last_refreshed_at
            "#,
        )
        .bind(&ids)
        .bind(&names)
        .bind(&icons)
        .bind(&refreshed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_current(&self, entries: &[CacheEntry]) -> Result<(), StoreError> {
        let mut ids = Vec::with_capacity(entries.len());
        let mut worlds = Vec::with_capacity(entries.len());
        let mut prices: Vec<Option<i64>> = Vec::with_capacity(entries.len());
        let mut refreshed = Vec::with_capacity(entries.len());
        for entry in entries {
            if let (Payload::Current(price), Some(world)) = (&entry.payload, &entry.scope) {
                ids.push(i64::from(entry.key));
                worlds.push(world.as_str());
                prices.push(price.current_min_price_nq);
                refreshed.push(entry.last_refreshed_at);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO market_current (item_id, world, current_min_price_nq, last_refreshed_at)
            SELECT * FROM UNNEST($1::bigint[], $2::text[], $3::bigint[], $4::timestamptz[])
            ON CONFLICT (item_id, world)
            DO UPDATE SET current_min_price_nq = EXCLUDED.current_min_price_nq,
                          last_refreshed_at = EXCLUDED.last_refreshed_at
            "#,
        )
        .bind(&ids)
        .bind(&worlds)
        .bind(&prices)
        .bind(&refreshed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_historical(&self, entries: &[CacheEntry]) -> Result<(), StoreError> {
        let len = entries.len();
        let (mut ids, mut worlds, mut velocity, mut average) = (
            Vec::with_capacity(len),
            Vec::with_capacity(len),
            Vec::with_capacity(len),
            Vec::with_capacity(len),
        );
        let (mut sold, mut per_day, mut stack, mut median, mut refreshed) = (
            Vec::with_capacity(len),
            Vec::with_capacity(len),
            Vec::with_capacity(len),
            Vec::with_capacity(len),
            Vec::with_capacity(len),
        );
        for entry in entries {
            if let (Payload::Historical(h), Some(world)) = (&entry.payload, &entry.scope) {
                ids.push(i64::from(entry.key));
                worlds.push(world.as_str());
                velocity.push(h.nq_daily_sale_velocity);
                average.push(h.average_price_per_unit);
                sold.push(h.num_items_sold);
                per_day.push(h.possible_money_per_day);
                stack.push(h.median_stack_size);
                median.push(h.median_price);
                refreshed.push(entry.last_refreshed_at);
            }
        }

        sqlx::query(
            r#"
            INSERT INTO market_historical (
                item_id, world, nq_daily_sale_velocity, average_price_per_unit,
                num_items_sold, possible_money_per_day, median_stack_size, median_price,
                last_refreshed_at
            )
            SELECT * FROM UNNEST(
                $1::bigint[], $2::text[], $3::float8[], $4::bigint[],
                $5::bigint[], $6::bigint[], $7::float8[], $8::float8[], $9::timestamptz[]
            )
            ON CONFLICT (item_id, world)
            DO UPDATE SET nq_daily_sale_velocity = EXCLUDED.nq_daily_sale_velocity,
                          average_price_per_unit = EXCLUDED.average_price_per_unit,
                          num_items_sold = EXCLUDED.num_items_sold,
                          possible_money_per_day = EXCLUDED.possible_money_per_day,
                          median_stack_size = EXCLUDED.median_stack_size,
                          median_price = EXCLUDED.median_price,
                          last_refreshed_at = EXCLUDED.last_refreshed_at
            "#,
        )
        .bind(&ids)
        .bind(&worlds)
        .bind(&velocity)
        .bind(&average)
        .bind(&sold)
        .bind(&per_day)
        .bind(&stack)
        .bind(&median)
        .bind(&refreshed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CacheStore for PgStore {
    async fn read(
        &self,
        kind: DataKind,
        keys: &[ItemId],
        scope: Option<&str>,
    ) -> Result<Vec<CacheEntry>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<i64> = keys.iter().map(|&key| i64::from(key)).collect();
        match kind {
            DataKind::ItemMetadata => self.read_metadata(&ids).await,
            DataKind::CurrentPrice => self.read_current(&ids, require_scope(kind, scope)?).await,
            DataKind::HistoricalPrice => {
                self.read_historical(&ids, require_scope(kind, scope)?)
                    .await
            }
        }
    }

    async fn upsert(&self, entries: &[CacheEntry]) -> Result<(), StoreError> {
        let Some(kind) = batch_kind(entries)? else {
            return Ok(());
        };
        match kind {
            DataKind::ItemMetadata => self.upsert_metadata(entries).await?,
            DataKind::CurrentPrice => self.upsert_current(entries).await?,
            DataKind::HistoricalPrice => self.upsert_historical(entries).await?,
        }
        debug!(kind = %kind, count = entries.len(), "Upserted cache entries");
        Ok(())
    }

    async fn read_counter(&self, kind: DataKind) -> Result<PerformanceCounter, StoreError> {
        let row = sqlx::query_as::<_, CounterRow>(
            "SELECT average_duration_seconds, total_completed_fetches \
             FROM fetch_counters WHERE kind = $1",
        )
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row
            .map(|row| PerformanceCounter {
                average_duration_seconds: row.average_duration_seconds,
                total_completed_fetches: u64::try_from(row.total_completed_fetches).unwrap_or(0),
            })
            .unwrap_or_default())
    }

    async fn update_counter(
        &self,
        kind: DataKind,
        counter: PerformanceCounter,
    ) -> Result<(), StoreError> {
        let total = i64::try_from(counter.total_completed_fetches).unwrap_or(i64::MAX);
        sqlx::query(
            r#"
            INSERT INTO fetch_counters (kind, average_duration_seconds, total_completed_fetches)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind)
            DO UPDATE SET average_duration_seconds = EXCLUDED.average_duration_seconds,
                          total_completed_fetches = EXCLUDED.total_completed_fetches,
                          updated_at = now()
            "#,
        )
        .bind(kind.as_str())
        .bind(counter.average_duration_seconds)
        .bind(total)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
