//! Pass ledger audit tool
//!
//! Prints the balance statement of each member whose scan token is given and
//! exits non-zero when any live counter disagrees with the consumption
//! history.
//!
//! # Usage
//!
//! ```bash
//! # Apply the schema, then audit two members
//! passledger-audit --migrate
//! passledger-audit 4f1c0e4e-... https://kiosk.example/my-qr/9a2b...
//! ```
//!
//! Configuration comes from the environment (or `.env`), see
//! [`LedgerConfig::from_env`].

use anyhow::{Context, Result};
use passledger_core::environment::SystemClock;
use passledger_core::types::ScanToken;
use passledger_postgres::PostgresLedger;
use passledger_runtime::metrics::describe_metrics;
use passledger_runtime::{LedgerConfig, LedgerService};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let _ = dotenvy::dotenv();
    let config = LedgerConfig::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&config.log_filter))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
    describe_metrics();

    let mut migrate = false;
    let mut tokens = Vec::new();
    for arg in std::env::args().skip(1) {
        if arg == "--migrate" {
            migrate = true;
        } else {
            tokens.push(ScanToken::from_scan(&arg).with_context(|| format!("bad token argument {arg:?}"))?);
        }
    }

    let ledger = PostgresLedger::connect(
        &config.database.url,
        config.database.max_connections,
        Duration::from_secs(config.database.connect_timeout),
    )
    .await
    .context("connecting to the ledger database")?;

    if migrate {
        ledger.migrate().await.context("applying ledger migrations")?;
        tracing::info!("Ledger schema is up to date");
    }

    let service = LedgerService::with_backend(
        Arc::new(ledger),
        Arc::new(SystemClock),
        config.retry.policy(),
    );

    let mut inconsistent = 0_usize;
    for token in tokens {
        let statement = service
            .statement(token.clone())
            .await
            .with_context(|| format!("building statement for {token}"))?;

        println!("{}", serde_json::to_string_pretty(&statement)?);

        if let Err(err) = statement.ensure_consistent() {
            tracing::warn!(member_id = %statement.member.id, error = %err, "Ledger drift");
            inconsistent += 1;
        }
    }

    if inconsistent > 0 {
        tracing::error!(members = inconsistent, "Audit found inconsistent members");
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}
