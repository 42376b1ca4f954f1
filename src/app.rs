use crate::cli::ServiceName;
use crate::config::Config;
use crate::data::models::DataKind;
use crate::reference::ReferenceService;
use crate::refresh::{JobRegistry, RefreshEngine};
use crate::services::manager::ServiceManager;
use crate::services::sweeper::JobSweeperService;
use crate::services::web::WebService;
use crate::state::AppState;
use crate::store::PgStore;
use crate::upstream::http::RetryPolicy;
use crate::upstream::{
    Gateways, UniversalisClient, UniversalisGateway, UpstreamClient, XivApiGateway,
};
use crate::utils::fmt_duration;
use anyhow::Context;
use sqlx::ConnectOptions;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// How often unclaimed job results are checked against the retention window.
const JOB_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Main application struct containing all necessary components
pub struct App {
    config: Config,
    app_state: AppState,
    service_manager: ServiceManager,
}

impl App {
    /// Connect to the database, run migrations, and build the job registry.
    pub async fn new(config: Config) -> Result<Self, anyhow::Error> {
        let slow_threshold = Duration::from_millis(500);
        let connect_options = PgConnectOptions::from_str(&config.database_url)
            .context("Failed to parse database URL")?
            .log_statements(tracing::log::LevelFilter::Debug)
            .log_slow_statements(tracing::log::LevelFilter::Warn, Duration::from_secs(1));

        let db_pool = PgPoolOptions::new()
            .min_connections(0)
            .max_connections(8)
            .acquire_slow_threshold(slow_threshold)
            .acquire_timeout(Duration::from_secs(4))
            .idle_timeout(Duration::from_secs(60 * 2))
            .max_lifetime(Duration::from_secs(60 * 30))
            .connect_with(connect_options)
            .await
            .context("Failed to create database pool")?;

        info!(
            max_connections = 8,
            acquire_timeout = "4s",
            acquire_slow_threshold = fmt_duration(slow_threshold),
            "database pool established"
        );

        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&db_pool)
            .await
            .context("Failed to run database migrations")?;
        info!("Database migrations completed successfully");

        let retry = RetryPolicy {
            max_retries: config.upstream_max_retries,
            ..RetryPolicy::default()
        };
        let xivapi_http = Arc::new(
            UpstreamClient::new("xivapi", config.upstream_requests_per_second, retry)
                .context("Failed to create XIVAPI client")?,
        );
        let universalis_http = Arc::new(
            UpstreamClient::new("universalis", config.upstream_requests_per_second, retry)
                .context("Failed to create Universalis client")?,
        );
        let universalis = Arc::new(
            UniversalisClient::new(universalis_http, &config.universalis_base_url)
                .context("Invalid UNIVERSALIS_BASE_URL")?,
        );
        let gateways = Gateways::new(
            Arc::new(
                XivApiGateway::new(xivapi_http, &config.xivapi_base_url)
                    .context("Invalid XIVAPI_BASE_URL")?,
            ),
            Arc::new(UniversalisGateway::current(universalis.clone())),
            Arc::new(UniversalisGateway::historical(universalis.clone())),
        );

        let policy = config.staleness_policy();
        info!(
            metadata_ttl = fmt_duration(policy.ttl(DataKind::ItemMetadata)),
            current_price_ttl = fmt_duration(policy.ttl(DataKind::CurrentPrice)),
            historical_price_ttl =
                fmt_duration(policy.ttl(DataKind::HistoricalPrice)),
            "staleness policy loaded"
        );

        let store = Arc::new(PgStore::new(db_pool.clone()));
        let engine = Arc::new(RefreshEngine::new(store, gateways, policy));
        let jobs = JobRegistry::new(engine, config.max_concurrent_jobs, config.job_retention);
        let reference = ReferenceService::new(db_pool, universalis);
        let app_state = AppState::new(jobs, reference);

        Ok(App {
            service_manager: ServiceManager::new(app_state.service_statuses.clone()),
            config,
            app_state,
        })
    }

    /// Register the enabled services with the manager.
    pub fn setup_services(&mut self, services: &[ServiceName]) -> Result<(), anyhow::Error> {
        if services.contains(&ServiceName::Web) {
            self.service_manager.register_service(Box::new(WebService::new(
                self.config.port,
                self.app_state.clone(),
            )));
        }

        if services.contains(&ServiceName::JobSweeper) {
            self.service_manager
                .register_service(Box::new(JobSweeperService::new(
                    self.app_state.jobs.clone(),
                    JOB_SWEEP_INTERVAL,
                )));
        }

        if !self.service_manager.has_services() {
            error!("No services enabled. Cannot start application.");
            return Err(anyhow::anyhow!("No services enabled"));
        }
        Ok(())
    }

    pub fn start_services(&mut self) {
        self.service_manager.spawn_all();
    }

    /// Run until shutdown, then drain services and running jobs.
    pub async fn run(self) -> ExitCode {
        use crate::services::signals::handle_shutdown_signals;
        handle_shutdown_signals(
            self.service_manager,
            self.app_state.jobs.clone(),
            self.config.shutdown_timeout,
        )
        .await
    }
}
