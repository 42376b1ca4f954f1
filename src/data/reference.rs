//! Database operations for reference data: the world list and per-world
//! retainer tax rates.

use crate::data::models::World;
use anyhow::{Context, Result};
use sqlx::PgPool;
use std::collections::BTreeMap;

/// Replace the stored world list with `worlds`, removing worlds that no
/// longer exist upstream.
pub async fn replace_worlds(pool: &PgPool, worlds: &[World]) -> Result<()> {
    let ids: Vec<i32> = worlds.iter().map(|w| w.id).collect();
    let names: Vec<&str> = worlds.iter().map(|w| w.name.as_str()).collect();

    let mut tx = pool.begin().await.context("failed to begin world sync")?;
    sqlx::query("DELETE FROM worlds WHERE NOT (id = ANY($1))")
        .bind(&ids)
        .execute(&mut *tx)
        .await
        .context("failed to prune worlds")?;
    sqlx::query(
        r#"
        INSERT INTO worlds (id, name)
        SELECT * FROM UNNEST($1::int4[], $2::text[])
        ON CONFLICT (id)
        DO UPDATE SET name = EXCLUDED.name
        "#,
    )
    .bind(&ids)
    .bind(&names)
    .execute(&mut *tx)
    .await
    .context("failed to upsert worlds")?;
    tx.commit().await.context("failed to commit world sync")?;
    Ok(())
}

pub async fn get_worlds(pool: &PgPool) -> Result<Vec<World>> {
    sqlx::query_as::<_, World>("SELECT id, name FROM worlds ORDER BY name")
        .fetch_all(pool)
        .await
        .context("failed to fetch worlds")
}

pub async fn upsert_tax_rates(pool: &PgPool, world: &str, rates: &BTreeMap<String, i32>) -> Result<()> {
    if rates.is_empty() {
        return Ok(());
    }
    let cities: Vec<&str> = rates.keys().map(String::as_str).collect();
    let values: Vec<i32> = rates.values().copied().collect();

    sqlx::query(
        r#"
        INSERT INTO tax_rates (world, city, rate)
        SELECT $1, city, rate FROM UNNEST($2::text[], $3::int4[]) AS t(city, rate)
        ON CONFLICT (world, city)
        DO UPDATE SET rate = EXCLUDED.rate
        "#,
    )
    .bind(world)
    .bind(&cities)
    .bind(&values)
    .execute(pool)
    .await
    .context("failed to upsert tax rates")?;
    Ok(())
}

pub async fn get_tax_rates(pool: &PgPool, world: &str) -> Result<BTreeMap<String, i32>> {
    let rows = sqlx::query_as::<_, (String, i32)>(
        "SELECT city, rate FROM tax_rates WHERE world = $1",
    )
    .bind(world)
    .fetch_all(pool)
    .await
    .context("failed to fetch tax rates")?;
    Ok(rows.into_iter().collect())
}
