use super::Service;
use crate::refresh::JobRegistry;
use chrono::Utc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Periodically evicts complete jobs whose results were never claimed.
pub struct JobSweeperService {
    jobs: JobRegistry,
    interval: Duration,
}

impl JobSweeperService {
    pub fn new(jobs: JobRegistry, interval: Duration) -> Self {
        Self { jobs, interval }
    }
}

#[async_trait::async_trait]
impl Service for JobSweeperService {
    fn name(&self) -> &'static str {
        "job_sweeper"
    }

    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), anyhow::Error> {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                _ = ticker.tick() => {
                    let evicted = self.jobs.evict_expired(Utc::now());
                    debug!(evicted, "job sweep finished");
                }
            }
        }
    }
}
