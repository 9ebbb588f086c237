//! Waveline — multi-account outbound campaign dispatcher.
//!
//! Demo driver: seeds an in-memory store with accounts and contacts,
//! registers one simulated transport per account, then runs a single
//! campaign and prints the report. Ctrl+C cancels the campaign at the
//! next wave or wait boundary.

use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use waveline_core::config::AppConfig;
use waveline_core::types::NewAccount;
use waveline_dispatch::{AccountRegistry, DispatchEngine};
use waveline_store::{MemoryStore, Store};
use waveline_transport::SimulatedTransport;

#[derive(Parser, Debug)]
#[command(name = "waveline")]
#[command(about = "Multi-account outbound campaign dispatcher")]
#[command(version)]
struct Cli {
    /// Number of sender accounts to seed
    #[arg(long, env = "WAVELINE__ACCOUNTS", default_value_t = 2)]
    accounts: usize,

    /// Number of contacts to seed
    #[arg(long, env = "WAVELINE__RECIPIENTS", default_value_t = 5)]
    recipients: usize,

    /// Per-account delay between sends, in seconds
    #[arg(long, env = "WAVELINE__DELAY_SECS", default_value_t = 2)]
    delay_secs: u32,

    /// Message text for the campaign
    #[arg(long, default_value = "Hello from waveline!")]
    text: String,

    /// Simulated generic failure probability (overrides config)
    #[arg(long, env = "WAVELINE__SIMULATOR__FAILURE_RATE")]
    failure_rate: Option<f64>,

    /// Simulated flood-control probability (overrides config)
    #[arg(long, env = "WAVELINE__SIMULATOR__FLOOD_RATE")]
    flood_rate: Option<f64>,
}

/// Install handlers for SIGTERM and SIGINT. The returned token is
/// cancelled when either signal arrives; the engine drains the current
/// wave and stops.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("Received SIGINT (Ctrl+C), cancelling campaign");
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, cancelling campaign");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("Received Ctrl+C, cancelling campaign");
        }

        token_clone.cancel();
    });

    token
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "waveline=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Waveline starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(rate) = cli.failure_rate {
        config.simulator.failure_rate = rate;
    }
    if let Some(rate) = cli.flood_rate {
        config.simulator.flood_rate = rate;
    }

    info!(
        accounts = cli.accounts,
        recipients = cli.recipients,
        delay_secs = cli.delay_secs,
        failure_rate = config.simulator.failure_rate,
        flood_rate = config.simulator.flood_rate,
        flood_wait_cap_secs = config.dispatch.flood_wait_cap_secs,
        "Configuration loaded"
    );

    // Seed the store and register one simulated transport per account
    let store = Arc::new(MemoryStore::new(&config.store));
    let registry = Arc::new(AccountRegistry::new());

    for i in 1..=cli.accounts {
        let account = store.create_account(NewAccount {
            label: format!("+1415555{:04}", i),
            credentials: serde_json::json!({ "session": format!("demo-session-{}", i) }),
            delay_secs: Some(cli.delay_secs),
        })?;
        let transport = Arc::new(SimulatedTransport::new(
            account.label.clone(),
            config.simulator.clone(),
        ));
        registry.register(account.id, transport);
    }

    for i in 1..=cli.recipients {
        store.create_contact(&format!("@user{}", i))?;
    }
    let contacts = store.contacts()?;

    info!(
        accounts = registry.len(),
        contacts = contacts.len(),
        "Store seeded"
    );

    let engine =
        DispatchEngine::new(store.clone(), registry.clone()).with_config(&config.dispatch);

    let cancel = install_signal_handler();
    let report = engine
        .dispatch_cancellable(&cli.text, &contacts, cancel)
        .await?;

    info!(
        dispatch_id = %report.dispatch_id,
        sent = report.success_count,
        failed = report.fail_count,
        skipped = report.skipped_count,
        waves = report.waves_run,
        cancelled = report.cancelled,
        "Campaign complete"
    );

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
