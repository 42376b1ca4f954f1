use super::{Service, ServiceResult};
use crate::state::{ServiceStatus, ServiceStatusRegistry};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Spawns registered services and coordinates their shutdown.
pub struct ServiceManager {
    registered: Vec<Box<dyn Service>>,
    running: JoinSet<(&'static str, ServiceResult)>,
    shutdown: CancellationToken,
    statuses: ServiceStatusRegistry,
}

impl ServiceManager {
    pub fn new(statuses: ServiceStatusRegistry) -> Self {
        Self {
            registered: Vec::new(),
            running: JoinSet::new(),
            shutdown: CancellationToken::new(),
            statuses,
        }
    }

    pub fn register_service(&mut self, service: Box<dyn Service>) {
        self.statuses.set(service.name(), ServiceStatus::Starting);
        self.registered.push(service);
    }

    pub fn has_services(&self) -> bool {
        !self.registered.is_empty() || !self.running.is_empty()
    }

    pub fn spawn_all(&mut self) {
        for mut service in self.registered.drain(..) {
            let name = service.name();
            let token = self.shutdown.child_token();
            let statuses = self.statuses.clone();
            self.running.spawn(async move {
                statuses.set(name, ServiceStatus::Active);
                let result = match service.run(token.clone()).await {
                    Ok(()) if token.is_cancelled() => ServiceResult::GracefulShutdown,
                    Ok(()) => ServiceResult::NormalCompletion,
                    Err(e) => ServiceResult::Error(e),
                };
                let status = match result {
                    ServiceResult::Error(_) => ServiceStatus::Error,
                    _ => ServiceStatus::Disabled,
                };
                statuses.set(name, status);
                (name, result)
            });
            debug!(service = name, "service spawned");
        }
        info!(count = self.running.len(), "all services spawned");
    }

    /// Wait for the first service to exit on its own.
    pub async fn wait_for_exit(&mut self) -> Option<(&'static str, ServiceResult)> {
        match self.running.join_next().await? {
            Ok(exited) => Some(exited),
            Err(e) => Some(("unknown", ServiceResult::Error(e.into()))),
        }
    }

    /// Signal every service to stop and wait up to `timeout` for them.
    ///
    /// Returns how many services were still running at the deadline.
    pub async fn shutdown(mut self, timeout: Duration) -> usize {
        self.shutdown.cancel();
        let total = self.running.len();
        info!(services = total, "shutting down services");

        let drained = tokio::time::timeout(timeout, async {
            while let Some(joined) = self.running.join_next().await {
                match joined {
                    Ok((name, ServiceResult::Error(e))) => {
                        error!(service = name, error = ?e, "service failed during shutdown")
                    }
                    Ok((name, _)) => debug!(service = name, "service stopped"),
                    Err(e) => error!(error = ?e, "service task panicked"),
                }
            }
        })
        .await;

        if drained.is_ok() {
            return 0;
        }
        let remaining = self.running.len();
        warn!(remaining, "services did not stop before the timeout, aborting");
        self.running.abort_all();
        remaining
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Idle;

    #[async_trait]
    impl Service for Idle {
        fn name(&self) -> &'static str {
            "idle"
        }

        async fn run(&mut self, shutdown: CancellationToken) -> Result<(), anyhow::Error> {
            shutdown.cancelled().await;
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Service for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&mut self, _shutdown: CancellationToken) -> Result<(), anyhow::Error> {
            anyhow::bail!("boom")
        }
    }

    #[tokio::test]
    async fn failed_service_is_reported_and_others_stop() {
        let statuses = ServiceStatusRegistry::new();
        let mut manager = ServiceManager::new(statuses.clone());
        manager.register_service(Box::new(Idle));
        manager.register_service(Box::new(Failing));
        assert_eq!(statuses.get("idle"), Some(ServiceStatus::Starting));

        manager.spawn_all();
        let (name, result) = manager.wait_for_exit().await.unwrap();
        assert_eq!(name, "failing");
        assert!(matches!(result, ServiceResult::Error(_)));
        assert_eq!(statuses.get("failing"), Some(ServiceStatus::Error));

        assert_eq!(manager.shutdown(Duration::from_secs(1)).await, 0);
        assert_eq!(statuses.get("idle"), Some(ServiceStatus::Disabled));
    }
}
