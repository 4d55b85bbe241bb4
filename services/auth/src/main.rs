use anyhow::Result;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod config;
mod geo;
mod jwt;
mod mailer;
mod metrics;
mod middleware;
mod models;
mod rate_limiter;
mod repositories;
mod routes;
mod session_store;
mod token;
mod token_store;
mod validation;

use common::cache::{RedisConfig, RedisPool};
use common::database::{self, DatabaseConfig};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::AuthConfig;
use crate::geo::{GeoResolver, NoopGeoResolver};
use crate::jwt::JwtService;
use crate::mailer::{ConsoleMailer, Mailer};
use crate::metrics::collector::Collector;
use crate::metrics::hub::Hub;
use crate::rate_limiter::RateLimiter;
use crate::repositories::session_log::SessionLogRepository;
use crate::repositories::UserRepository;
use crate::session_store::SessionStore;
use crate::token_store::AuthTokenStore;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AuthConfig>,
    pub jwt_service: JwtService,
    pub user_repository: UserRepository,
    pub session_log: SessionLogRepository,
    pub token_store: AuthTokenStore,
    pub session_store: SessionStore,
    pub rate_limiter: RateLimiter,
    pub mailer: Arc<dyn Mailer>,
    pub geo: Arc<dyn GeoResolver>,
    pub hub: Arc<Hub>,
    pub collector: Arc<Collector>,
    pub prometheus: PrometheusHandle,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting authentication service");

    let config = Arc::new(AuthConfig::from_env()?);

    // Initialize database connection pool
    let db_config = DatabaseConfig::from_env()?;
    let pool = database::init_pool(&db_config).await?;

    // Check database connectivity
    if database::health_check(&pool).await? {
        info!("Database connection successful");
    } else {
        anyhow::bail!("Failed to connect to database");
    }

    // Initialize Redis connection pool
    let redis_config = RedisConfig::from_env()?;
    let redis_pool = RedisPool::new(&redis_config).await?;

    // Install the Prometheus recorder before anything records a metric
    let prometheus = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics recorder: {}", e))?;

    let jwt_service = JwtService::new(&config.jwt_secret, config.access_expiry);
    let user_repository = UserRepository::new(pool.clone());
    let session_log = SessionLogRepository::new(pool, config.session_log_enabled);
    let token_store = AuthTokenStore::new(redis_pool.clone());
    let session_store = SessionStore::new(
        redis_pool.clone(),
        config.session_expiry,
        config.touch_min_interval,
    );
    let rate_limiter = RateLimiter::new(
        redis_pool.clone(),
        config.rate_limit_per_minute,
        config.rate_limit_per_hour,
    );

    let hub = Arc::new(Hub::new(config.broadcast_spread));
    let collector = Arc::new(Collector::new(
        redis_pool,
        Arc::clone(&hub),
        config.metrics_active_window,
    ));

    // Every collector tick fans out to the connected WebSocket clients.
    let broadcast_hub = Arc::clone(&hub);
    collector.set_on_snapshot(move |payload| broadcast_hub.broadcast(payload));
    tokio::spawn(Arc::clone(&collector).run(config.metrics_tick));

    let app_state = AppState {
        config: Arc::clone(&config),
        jwt_service,
        user_repository,
        session_log,
        token_store,
        session_store,
        rate_limiter,
        mailer: Arc::new(ConsoleMailer),
        geo: Arc::new(NoopGeoResolver),
        hub,
        collector,
        prometheus,
    };

    info!("Authentication service initialized successfully");

    // Start the web server
    let app = routes::create_router(app_state);

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;
    info!("Authentication service listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
