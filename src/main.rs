//! WAGER — two-party directional price bets with an autonomous closer.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores state from disk (or creates fresh), starts the closer and the
//! operator API, and snapshots state until Ctrl+C.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use wager::api::{self, ApiState};
use wager::clock::{Clock, SystemClock};
use wager::config::{self, PriceFeedKind};
use wager::engine::closer::CloserScheduler;
use wager::engine::registry::BetRegistry;
use wager::engine::settlement::SettlementEngine;
use wager::feed::http::HttpPriceFeed;
use wager::feed::reporter::ReportedPriceFeed;
use wager::feed::PriceFeed;
use wager::ledger::memory::InMemoryLedger;
use wager::storage::{self, ServiceSnapshot};
use wager::types::AccountId;

const BANNER: &str = r#"
__        ___    ____ _____ ____
\ \      / / \  / ___| ____|  _ \
 \ \ /\ / / _ \| |  _|  _| | |_) |
  \ V  V / ___ \ |_| | |___|  _ <
   \_/\_/_/   \_\____|_____|_| \_\

  Two-party price bets, settled on schedule
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = config::AppConfig::load("config.toml")?;

    init_logging();

    println!("{BANNER}");
    info!(
        service = %cfg.service.name,
        fee_bps = cfg.settlement.fee_bps,
        draw_policy = ?cfg.settlement.draw_policy,
        feed = ?cfg.price_feed.kind,
        "WAGER starting up"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let state_file = cfg.service.state_file.as_deref();

    // -- Price feed --------------------------------------------------------

    let (feed, reporter): (Arc<dyn PriceFeed>, Option<Arc<ReportedPriceFeed>>) =
        match cfg.price_feed.kind {
            PriceFeedKind::Reported => {
                let identity = AccountId::new(cfg.price_feed.reporter.clone().unwrap_or_default());
                let reporter = match cfg.price_feed.initial_price()? {
                    Some(price) => {
                        info!(price = %price, reporter = %identity, "Seeding reported price");
                        ReportedPriceFeed::with_initial(identity, price, clock.now())
                    }
                    None => ReportedPriceFeed::new(identity),
                };
                let reporter = Arc::new(reporter);
                let feed: Arc<dyn PriceFeed> = reporter.clone();
                (feed, Some(reporter))
            }
            PriceFeedKind::Http => {
                let api_key = cfg.price_feed.api_key();
                if api_key.is_none() {
                    warn!("No price feed API key configured, using the public endpoint");
                }
                let http = HttpPriceFeed::new(
                    cfg.price_feed.url.clone(),
                    cfg.price_feed.asset.clone().unwrap_or_default(),
                    cfg.price_feed.vs_currency.clone().unwrap_or_default(),
                    api_key,
                )?;
                let feed: Arc<dyn PriceFeed> = Arc::new(http);
                (feed, None)
            }
        };

    // -- Restore or create state -------------------------------------------

    let engine = SettlementEngine::new(cfg.settlement.to_settlement_config());

    let (registry, ledger) = match storage::load_snapshot(state_file)? {
        Some(snapshot) => {
            let ledger = Arc::new(InMemoryLedger::restore(snapshot.ledger));
            let registry = BetRegistry::restore(
                snapshot.registry,
                feed.clone(),
                ledger.clone(),
                clock.clone(),
                engine,
            )
            .context("Saved state is inconsistent")?;
            info!(
                bets = registry.upper_bound(),
                escrowed = ledger.escrow_balance(),
                "Resumed from saved state"
            );
            (registry, ledger)
        }
        None => {
            let ledger = Arc::new(InMemoryLedger::new());
            for seed in &cfg.ledger.accounts {
                let account = AccountId::new(seed.account.clone());
                ledger.mint(&account, seed.balance)?;
                if seed.allowance > 0 {
                    ledger.approve(&account, seed.allowance);
                }
            }
            info!(accounts = cfg.ledger.accounts.len(), "Fresh start");
            let registry = BetRegistry::new(feed.clone(), ledger.clone(), clock.clone(), engine);
            (registry, ledger)
        }
    };
    let registry = Arc::new(registry);

    // -- Closer ------------------------------------------------------------

    let closer = if cfg.closer.enabled {
        let scheduler = Arc::new(CloserScheduler::new(
            registry.clone(),
            clock.clone(),
            cfg.closer.to_closer_config(),
        ));
        Some(scheduler.start())
    } else {
        warn!("Closer disabled, bets will only settle on manual close");
        None
    };

    // -- API ---------------------------------------------------------------

    let (api_shutdown, api_shutdown_rx) = tokio::sync::watch::channel(false);
    let api_task = if cfg.api.enabled {
        let state = Arc::new(ApiState {
            registry: registry.clone(),
            ledger: ledger.clone(),
            feed: feed.clone(),
            reporter,
            clock: clock.clone(),
        });
        Some(api::spawn_api(state, cfg.api.port, api_shutdown_rx).await?)
    } else {
        None
    };

    // -- Main loop ---------------------------------------------------------

    let mut interval =
        tokio::time::interval(Duration::from_secs(cfg.service.snapshot_interval_secs));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        snapshot_interval_secs = cfg.service.snapshot_interval_secs,
        "Running. Press Ctrl+C to stop."
    );

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let snapshot = capture(&registry, &ledger).await;
                if let Err(e) = storage::save_snapshot(&snapshot, state_file) {
                    error!(error = %e, "Failed to save state");
                }
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    // -- Shutdown ----------------------------------------------------------

    // Drain in-flight API requests before the final snapshot.
    let _ = api_shutdown.send(true);
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            error!(error = %e, "API task failed");
        }
    }
    if let Some(handle) = closer {
        handle.stop().await;
    }

    let snapshot = capture(&registry, &ledger).await;
    storage::save_snapshot(&snapshot, state_file)?;
    info!(bets = snapshot.registry.bets.len(), "Final state saved. Goodbye.");

    Ok(())
}

/// Capture bets and balances together so no close lands between them.
async fn capture(registry: &BetRegistry, ledger: &InMemoryLedger) -> ServiceSnapshot {
    let (registry, ledger) = registry.snapshot_with(|| ledger.snapshot()).await;
    ServiceSnapshot { registry, ledger }
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("wager=info"));

    let json_logging = std::env::var("WAGER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
