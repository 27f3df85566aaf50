use library_circulation::{
    adapters::postgres::{
        PostgresCatalogStore, PostgresCirculationStore, PostgresLibrarianDirectory,
        PostgresMemberStore,
    },
    api::{handlers::AppState, router::create_router},
    application::circulation::{self, ServiceDependencies},
    config::AppConfig,
};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "library_circulation=debug,tower_http=debug,axum=trace".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;

    tracing::info!(
        loan_period_days = config.policy.loan_period.num_days(),
        daily_rate = %config.policy.daily_rate,
        late_fee_per_day = %config.policy.late_fee_per_day,
        retry_attempts = config.policy.retry.max_attempts,
        "Circulation policy loaded"
    );

    // Initialize database connection pool
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    // Initialize adapters
    let service_deps = ServiceDependencies {
        circulation_store: Arc::new(PostgresCirculationStore::new(pool.clone())),
        catalog_store: Arc::new(PostgresCatalogStore::new(pool.clone())),
        member_store: Arc::new(PostgresMemberStore::new(pool.clone())),
        librarian_directory: Arc::new(PostgresLibrarianDirectory::new(pool)),
        policy: config.policy,
    };

    // Retry deferred reservation fulfillments in the background
    tokio::spawn(run_fulfillment_retries(
        service_deps.clone(),
        config.fulfillment_retry_interval,
    ));

    // Create application state
    let app_state = Arc::new(AppState { service_deps });

    // Create router
    let app = create_router(app_state);

    // Server configuration
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    // Start server
    axum::serve(listener, app).await?;

    Ok(())
}

/// 保留中の予約充足を一定間隔で再試行する
///
/// 失敗しても保留は残るため、次の周期で再び試みる。
async fn run_fulfillment_retries(deps: ServiceDependencies, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    loop {
        ticker.tick().await;
        match circulation::retry_pending_fulfillments(&deps, chrono::Utc::now()).await {
            Ok(resolutions) if !resolutions.is_empty() => {
                tracing::info!(count = resolutions.len(), "pending fulfillments retried");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(error = ?e, "pending fulfillment retry failed"),
        }
    }
}
