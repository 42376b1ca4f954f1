//! World list and tax rates: coarse, whole-set reference data pulled from
//! Universalis when the last successful pull is older than its TTL.
//!
//! If the upstream is unavailable the last stored copy is served instead.

use crate::data::models::World;
use crate::data::{kv, reference};
use crate::refresh::staleness::is_expired;
use crate::upstream::UniversalisClient;
use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const KV_WORLDS_PULL: &str = "reference.worlds";
const KV_TAX_RATES_PREFIX: &str = "reference.tax_rates";

pub const WORLDS_TTL: Duration = Duration::from_secs(24 * 60 * 60);
pub const TAX_RATES_TTL: Duration = Duration::from_secs(60 * 60);

fn tax_rates_key(world: &str) -> String {
    format!("{KV_TAX_RATES_PREFIX}.{}", world.to_lowercase())
}

#[derive(Clone)]
pub struct ReferenceService {
    pool: PgPool,
    universalis: Arc<UniversalisClient>,
}

impl ReferenceService {
    pub fn new(pool: PgPool, universalis: Arc<UniversalisClient>) -> Self {
        Self { pool, universalis }
    }

    async fn is_due(&self, key: &str, ttl: Duration) -> bool {
        match kv::get_timestamp(&self.pool, key).await {
            Ok(last) => is_expired(last, ttl, Utc::now()),
            Err(e) => {
                warn!(key, error = %e, "Failed to read pull timestamp, treating as due");
                true
            }
        }
    }

    pub async fn worlds(&self) -> Result<Vec<World>> {
        if self.is_due(KV_WORLDS_PULL, WORLDS_TTL).await {
            match self.universalis.worlds().await {
                Ok(worlds) if !worlds.is_empty() => {
                    reference::replace_worlds(&self.pool, &worlds).await?;
                    kv::set_timestamp(&self.pool, KV_WORLDS_PULL, Utc::now()).await?;
                    info!(count = worlds.len(), "World list refreshed");
                }
                Ok(_) => warn!("Universalis returned no worlds, keeping stored list"),
                Err(e) => warn!(error = %e, "Failed to pull worlds, serving stored list"),
            }
        }
        reference::get_worlds(&self.pool).await
    }

    pub async fn tax_rates(&self, world: &str) -> Result<BTreeMap<String, i32>> {
        let key = tax_rates_key(world);
        if self.is_due(&key, TAX_RATES_TTL).await {
            match self.universalis.tax_rates(world).await {
                Ok(rates) if !rates.is_empty() => {
                    reference::upsert_tax_rates(&self.pool, world, &rates).await?;
                    kv::set_timestamp(&self.pool, &key, Utc::now()).await?;
                    debug!(world, cities = rates.len(), "Tax rates refreshed");
                    return Ok(rates);
                }
                Ok(_) => debug!(world, "Universalis returned no tax rates"),
                Err(e) => warn!(world, error = %e, "Failed to pull tax rates, serving stored rates"),
            }
        }
        reference::get_tax_rates(&self.pool, world).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tax_rate_keys_are_per_world() {
        assert_eq!(tax_rates_key("Gaia"), "reference.tax_rates.gaia");
        assert_ne!(tax_rates_key("Gaia"), tax_rates_key("Ixion"));
    }
}
