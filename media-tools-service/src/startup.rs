//! Application startup and lifecycle management.

use crate::config::{MediaToolsConfig, UsageStoreKind};
use crate::handlers;
use crate::models::UsagePolicy;
use crate::services::{
    HttpPageFetcher, InMemoryUsageStore, MongoUsageStore, PageFetcher, RedisUsageStore,
    UrlResolver, UsageLimiter, UsageStore,
};
use axum::{
    body::Body,
    http::{header, Method},
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use service_core::error::AppError;
use service_core::middleware::{
    metrics::metrics_middleware,
    rate_limit::{create_ip_rate_limiter, ip_rate_limit_middleware, IpRateLimit},
    security_headers::security_headers_middleware,
    tracing::{make_request_span, request_id_middleware},
};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: MediaToolsConfig,
    pub limiter: UsageLimiter,
    pub resolver: Arc<UrlResolver>,
    /// Per-IP limit on `/tiktok`; `None` when disabled.
    pub ip_limit: Option<IpRateLimit>,
}

const RATE_LIMIT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

async fn connect_store(config: &MediaToolsConfig) -> Result<Arc<dyn UsageStore>, AppError> {
    let store: Arc<dyn UsageStore> = match config.usage.store {
        UsageStoreKind::Memory => {
            tracing::warn!("Using in-memory usage store; quotas reset on restart");
            Arc::new(InMemoryUsageStore::new())
        }
        UsageStoreKind::Mongodb => {
            let store = MongoUsageStore::connect(&config.mongodb.uri, &config.mongodb.database)
                .await
                .map_err(|e| AppError::DatabaseError("Failed to connect to MongoDB".to_string(), e.into()))?;
            store.initialize_indexes().await.map_err(|e| {
                AppError::DatabaseError("Failed to initialize usage indexes".to_string(), e.into())
            })?;
            Arc::new(store)
        }
        UsageStoreKind::Redis => {
            let store = RedisUsageStore::connect(&config.redis.url)
                .await
                .map_err(|e| AppError::DatabaseError("Failed to connect to Redis".to_string(), e.into()))?;
            Arc::new(store)
        }
    };
    Ok(store)
}

pub fn build_router(state: AppState) -> Router {
    let mut tiktok = Router::new().route(
        "/tiktok",
        get(handlers::resolve_get).post(handlers::resolve_post),
    );

    if let Some(limit) = state.ip_limit.clone() {
        tiktok = tiktok.route_layer(from_fn_with_state(limit, ip_rate_limit_middleware));
    }

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/check-usage", post(handlers::check_usage))
        .route("/update-usage", post(handlers::update_usage))
        .route("/consume-usage", post(handlers::consume_usage))
        .merge(tiktok)
        .route("/health", get(handlers::health_check))
        .route("/ready", get(handlers::readiness_check))
        .route("/metrics", get(handlers::metrics_endpoint))
        .layer(from_fn(security_headers_middleware))
        .layer(from_fn(metrics_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span::<Body>))
        .layer(from_fn(request_id_middleware))
        .with_state(state)
}

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    state: AppState,
}

impl Application {
    /// Build the application with the given configuration.
    pub async fn build(config: MediaToolsConfig) -> Result<Self, AppError> {
        let store = connect_store(&config).await?;
        Self::build_with_store(config, store).await
    }

    /// Build around an already constructed usage store.
    pub async fn build_with_store(
        config: MediaToolsConfig,
        store: Arc<dyn UsageStore>,
    ) -> Result<Self, AppError> {
        let policy = UsagePolicy {
            limit: config.usage.limit,
            window: config.usage.window(),
        };
        let limiter = UsageLimiter::new(store, policy);

        let fetcher: Arc<dyn PageFetcher> =
            Arc::new(HttpPageFetcher::new(&config.resolver).map_err(|e| {
                AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e))
            })?);
        let resolver = Arc::new(UrlResolver::new(fetcher, &config.resolver));

        let per_minute = config.rate_limit.tiktok_per_minute;
        let ip_limit = (per_minute > 0).then(|| {
            IpRateLimit::new(
                create_ip_rate_limiter(per_minute, 60),
                config.rate_limit.trusted_proxies.clone(),
            )
        });

        // Port 0 binds a random port for tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            port,
            store = ?config.usage.store,
            limit = policy.limit,
            window_secs = policy.window.as_secs(),
            "Media tools service listening"
        );

        Ok(Self {
            port,
            listener,
            state: AppState {
                config,
                limiter,
                resolver,
                ip_limit,
            },
        })
    }

    pub fn http_port(&self) -> u16 {
        self.port
    }

    pub async fn run_until_stopped(self) -> std::io::Result<()> {
        self.run_with_shutdown(std::future::pending()).await
    }

    /// Serve until `shutdown` completes, then drain in-flight requests.
    pub async fn run_with_shutdown<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let cleanup = self
            .state
            .ip_limit
            .as_ref()
            .map(|limit| limit.spawn_cleanup(RATE_LIMIT_CLEANUP_INTERVAL));

        let router = build_router(self.state);
        let result = axum::serve(
            self.listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| {
            tracing::error!("HTTP server error: {}", e);
            e
        });

        if let Some(task) = cleanup {
            task.abort();
        }
        result
    }
}
