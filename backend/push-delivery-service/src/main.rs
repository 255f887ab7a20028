use std::env;
use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{bail, Context};
use apns_gateway::TlsGatewayConnector;
use push_delivery_service::{
    DeliveryConfig, DeliveryRunner, FileCredentialStore, PgDeliveryStore, RunSummary,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const USAGE: &str = "\
Usage:
  push-delivery send          Deliver pending notifications for every app
  push-delivery send-groups   Deliver pending group notifications
  push-delivery feedback      Remove devices reported by the feedback service
  push-delivery migrate       Apply database migrations";

const COMMANDS: &[&str] = &["send", "send-groups", "feedback", "migrate"];

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,sqlx=warn".into());

    let registry = tracing_subscriber::registry().with(filter);
    if env::var("LOG_FORMAT").is_ok_and(|format| format.eq_ignore_ascii_case("json")) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn report<T: Debug>(command: &str, summary: &RunSummary<T>) -> anyhow::Result<()> {
    for (scope, outcome) in summary.successes() {
        tracing::info!(%scope, ?outcome, "{command} finished");
    }

    let failed: Vec<String> = summary
        .failures()
        .map(|(scope, e)| format!("{scope}: {e}"))
        .collect();
    if !failed.is_empty() {
        bail!("{command} failed for {} scope(s): {}", failed.len(), failed.join("; "));
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let args: Vec<String> = env::args().collect();
    let Some(command) = args.get(1).map(String::as_str) else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };
    if !COMMANDS.contains(&command) {
        eprintln!("Unknown command '{command}'\n{USAGE}");
        std::process::exit(1);
    }

    let config = DeliveryConfig::from_env().context("Failed to load configuration")?;
    tracing::info!(
        command,
        environment = ?config.environment,
        gateway = %config.gateway,
        "Starting push delivery"
    );

    let store = Arc::new(
        PgDeliveryStore::connect(&config.database)
            .await
            .context("Failed to connect to database")?,
    );

    if command == "migrate" {
        store.migrate().await.context("Failed to run migrations")?;
        tracing::info!("Migrations applied");
        return Ok(());
    }

    let connector = Arc::new(
        TlsGatewayConnector::with_native_roots(config.connect_timeout)
            .context("Failed to load trust roots")?,
    );
    let credentials = Arc::new(FileCredentialStore::from_config(&config));
    let runner = DeliveryRunner::new(store, connector, credentials, Arc::new(config));

    match command {
        "send" => report(command, &runner.send_all().await?),
        "send-groups" => report(command, &runner.send_all_groups().await?),
        _ => report(command, &runner.process_all_feedback().await?),
    }
}
