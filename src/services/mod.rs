//! Long-running services supervised by the [`manager::ServiceManager`].

pub mod manager;
pub mod signals;
pub mod sweeper;
pub mod web;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// How a service task ended.
#[derive(Debug)]
pub enum ServiceResult {
    /// Stopped after shutdown was requested.
    GracefulShutdown,
    /// Returned on its own before shutdown was requested.
    NormalCompletion,
    Error(anyhow::Error),
}

#[async_trait]
pub trait Service: Send {
    fn name(&self) -> &'static str;

    /// Run until `shutdown` is cancelled, then clean up and return.
    async fn run(&mut self, shutdown: CancellationToken) -> Result<(), anyhow::Error>;
}
