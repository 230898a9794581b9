use std::process::ExitCode;
use std::sync::Arc;

use chrono::NaiveDate;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{fmt, EnvFilter};

use dues_engine::collaborators::{
    NotificationSender, PgBillingDocuments, TracingNotifier, WebhookNotifier,
};
use dues_engine::config::{self, SweepPolicy};
use dues_engine::{scheduler, EngineContext, RunClock};

/// One sweep pass for cron-style scheduling. Usage: `run_sweep [YYYY-MM-DD]`.
/// Exits non-zero when the pass aborts or any tenant fails.
#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenv().ok();
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .json()
        .init();

    let clock = match std::env::args().nth(1) {
        Some(raw) => match NaiveDate::parse_from_str(&raw, "%Y-%m-%d") {
            Ok(as_of) => RunClock::at(as_of),
            Err(err) => {
                eprintln!("invalid as-of date `{raw}` (expected YYYY-MM-DD): {err}");
                return Ok(ExitCode::from(2));
            }
        },
        None => RunClock::now(),
    };

    let pool = PgPoolOptions::new()
        .max_connections(*config::DATABASE_MAX_CONNECTIONS)
        .connect(config::DATABASE_URL.as_str())
        .await?;
    sqlx::migrate!().run(&pool).await?;

    let notifier: Arc<dyn NotificationSender> = match config::NOTIFY_WEBHOOK_URL.as_deref() {
        Some(url) => Arc::new(WebhookNotifier::new(url, config::NOTIFY_WEBHOOK_SECRET.clone())?),
        None => Arc::new(TracingNotifier),
    };
    let ctx = EngineContext::new(
        pool.clone(),
        Arc::new(PgBillingDocuments::new(pool)),
        notifier,
        SweepPolicy::from_env(),
    );

    let entry = scheduler::run_pass(&ctx, clock, "run_sweep").await?;
    println!("{}", serde_json::to_string_pretty(&entry)?);

    Ok(if entry.succeeded {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
