use super::ServiceResult;
use super::manager::ServiceManager;
use crate::refresh::JobRegistry;
use crate::utils::fmt_duration;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received ctrl-c"),
        _ = terminate => info!("received SIGTERM"),
    }
}

/// Run until a shutdown signal or an unexpected service exit, then stop the
/// services and drain running jobs within `timeout`.
pub async fn handle_shutdown_signals(
    mut manager: ServiceManager,
    jobs: JobRegistry,
    timeout: Duration,
) -> ExitCode {
    let mut exit_code = ExitCode::SUCCESS;

    tokio::select! {
        _ = shutdown_signal() => {}
        exited = manager.wait_for_exit() => match exited {
            Some((name, ServiceResult::Error(e))) => {
                error!(service = name, error = ?e, "service failed, shutting down");
                exit_code = ExitCode::FAILURE;
            }
            Some((name, result)) => {
                warn!(service = name, result = ?result, "service exited unexpectedly, shutting down");
                exit_code = ExitCode::FAILURE;
            }
            None => warn!("no services running"),
        }
    }

    let start = Instant::now();
    let stuck = manager.shutdown(timeout).await;
    let remaining = timeout.saturating_sub(start.elapsed());
    let jobs_drained = jobs.shutdown(remaining).await;

    if stuck > 0 || !jobs_drained {
        warn!(
            stuck_services = stuck,
            jobs_drained,
            timeout = fmt_duration(timeout),
            "graceful shutdown incomplete"
        );
        exit_code = ExitCode::FAILURE;
    } else {
        info!(elapsed = fmt_duration(start.elapsed()), "graceful shutdown complete");
    }
    exit_code
}
