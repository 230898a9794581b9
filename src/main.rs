use std::net::SocketAddr;
use std::sync::Arc;

use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use dues_engine::collaborators::{
    NotificationSender, PgBillingDocuments, TracingNotifier, WebhookNotifier,
};
use dues_engine::config::{self, SweepPolicy};
use dues_engine::routes::api_routes;
use dues_engine::{scheduler, EngineContext};

async fn root() -> &'static str {
    "Dues Engine API"
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    dotenvy::dotenv().ok();
    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;

    if let Err(error) = sqlx::migrate!().run(&pool).await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(Box::new(error) as Box<dyn std::error::Error>);
        }
    }

    let notifier: Arc<dyn NotificationSender> = match config::NOTIFY_WEBHOOK_URL.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url, config::NOTIFY_WEBHOOK_SECRET.clone())?),
        None => {
            tracing::info!("NOTIFY_WEBHOOK_URL unset; notifications are logged only");
            Arc::new(TracingNotifier)
        }
    };
    let ctx = EngineContext::new(
        pool.clone(),
        Arc::new(PgBillingDocuments::new(pool.clone())),
        notifier,
        SweepPolicy::from_env(),
    );
    let _scheduler = scheduler::spawn(ctx.clone());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(ctx));

    let addr: SocketAddr = format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT)
        .parse()
        .map_err(|error| Box::new(error) as Box<dyn std::error::Error>)?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    Ok(())
}
