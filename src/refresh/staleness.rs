//! Per-kind TTLs and the fresh/stale decision.

use crate::data::models::DataKind;
use chrono::{DateTime, Utc};
use std::time::Duration;

const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Static TTL per data kind, fixed at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StalenessPolicy {
    metadata: Duration,
    current_price: Duration,
    historical_price: Duration,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            metadata: DAY * 30,
            current_price: Duration::from_secs(60 * 60),
            historical_price: DAY,
        }
    }
}

impl StalenessPolicy {
    pub fn new(metadata: Duration, current_price: Duration, historical_price: Duration) -> Self {
        Self {
            metadata,
            current_price,
            historical_price,
        }
    }

    pub fn ttl(&self, kind: DataKind) -> Duration {
        match kind {
            DataKind::ItemMetadata => self.metadata,
            DataKind::CurrentPrice => self.current_price,
            DataKind::HistoricalPrice => self.historical_price,
        }
    }

    /// A record is stale when it was never refreshed or its age has reached the TTL.
    pub fn is_stale(
        &self,
        last_refreshed_at: Option<DateTime<Utc>>,
        kind: DataKind,
        now: DateTime<Utc>,
    ) -> bool {
        is_expired(last_refreshed_at, self.ttl(kind), now)
    }
}

/// `true` when `last` is unset or `now - last >= ttl`.
///
/// A timestamp in the future counts as fresh.
pub fn is_expired(last: Option<DateTime<Utc>>, ttl: Duration, now: DateTime<Utc>) -> bool {
    let Some(last) = last else {
        return true;
    };
    match (now - last).to_std() {
        Ok(age) => age >= ttl,
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn missing_timestamp_is_stale() {
        let policy = StalenessPolicy::default();
        assert!(policy.is_stale(None, DataKind::ItemMetadata, Utc::now()));
    }

    #[test]
    fn boundary_is_inclusive() {
        let policy = StalenessPolicy::default();
        let now = Utc::now();
        for kind in DataKind::ALL {
            let ttl = TimeDelta::from_std(policy.ttl(kind)).unwrap();
            assert!(policy.is_stale(Some(now - ttl), kind, now), "{kind} at TTL");
            assert!(
                !policy.is_stale(Some(now - ttl + TimeDelta::seconds(1)), kind, now),
                "{kind} one second inside TTL"
            );
        }
    }

    #[test]
    fn default_ttls() {
        let policy = StalenessPolicy::default();
        assert_eq!(policy.ttl(DataKind::ItemMetadata), DAY * 30);
        assert_eq!(policy.ttl(DataKind::CurrentPrice), Duration::from_secs(3600));
        assert_eq!(policy.ttl(DataKind::HistoricalPrice), DAY);
    }

    #[test]
    fn future_timestamps_are_fresh() {
        let now = Utc::now();
        assert!(!is_expired(
            Some(now + TimeDelta::minutes(5)),
            Duration::from_secs(60),
            now
        ));
    }
}
