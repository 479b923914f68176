//! Autonomous closer: periodic scan-and-settle of due bets.
//!
//! Each tick walks ids `0..upper_bound`, picks the ACTIVE bets whose
//! closing time has passed, and closes them one at a time under the
//! closer's own identity (which collects the settlement fee). A failure on
//! one bet is logged and the scan moves on; the bet is retried next tick
//! while it remains due.
//!
//! Every close runs in its own task and is awaited with a timeout. A close
//! that overruns is left to finish in the background rather than being
//! cancelled mid-transfer, and is awaited on shutdown.

use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::registry::BetRegistry;
use crate::clock::Clock;
use crate::types::{AccountId, BetId, SettlementResult, WagerResult};

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(30);

type CloseTask = JoinHandle<WagerResult<SettlementResult>>;

#[derive(Debug, Clone)]
pub struct CloserConfig {
    pub interval: Duration,
    pub close_timeout: Duration,
    /// Identity credited with the settlement fee.
    pub identity: AccountId,
}

impl CloserConfig {
    pub fn new(identity: AccountId) -> Self {
        Self {
            interval: DEFAULT_INTERVAL,
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            identity,
        }
    }
}

/// Summary of a single scan.
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub scanned: u64,
    pub eligible: usize,
    /// Bets skipped because another operation held them.
    pub busy: Vec<BetId>,
    pub closed: Vec<BetId>,
    pub failed: Vec<(BetId, String)>,
    pub timed_out: Vec<BetId>,
    pub started_at: Option<DateTime<Utc>>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.timed_out.is_empty()
    }
}

pub struct CloserScheduler {
    registry: Arc<BetRegistry>,
    clock: Arc<dyn Clock>,
    config: CloserConfig,
    stragglers: Mutex<Vec<(BetId, CloseTask)>>,
}

impl CloserScheduler {
    pub fn new(registry: Arc<BetRegistry>, clock: Arc<dyn Clock>, config: CloserConfig) -> Self {
        Self {
            registry,
            clock,
            config,
            stragglers: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &CloserConfig {
        &self.config
    }

    fn stragglers(&self) -> MutexGuard<'_, Vec<(BetId, CloseTask)>> {
        self.stragglers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of timed-out closes still running in the background.
    pub fn in_flight(&self) -> usize {
        self.stragglers().iter().filter(|(_, t)| !t.is_finished()).count()
    }

    /// Run one scan over every assigned id.
    pub async fn tick(&self) -> TickReport {
        self.reap_stragglers(false).await;

        let now = self.clock.now();
        let upper = self.registry.upper_bound();
        let mut report = TickReport {
            scanned: upper,
            started_at: Some(now),
            ..Default::default()
        };

        for bet_id in 0..upper {
            let bet = match self.registry.try_get_bet(bet_id) {
                Ok(Some(bet)) => bet,
                Ok(None) => {
                    debug!(bet_id, "Bet busy, skipping this tick");
                    report.busy.push(bet_id);
                    continue;
                }
                Err(e) => {
                    warn!(bet_id, error = %e, "Failed to read bet");
                    report.failed.push((bet_id, e.to_string()));
                    continue;
                }
            };
            if !bet.is_due_for_close(now) {
                continue;
            }
            report.eligible += 1;

            let registry = Arc::clone(&self.registry);
            let identity = self.config.identity.clone();
            let mut task: CloseTask =
                tokio::spawn(async move { registry.close_bet(&identity, bet_id).await });

            match tokio::time::timeout(self.config.close_timeout, &mut task).await {
                Ok(Ok(Ok(result))) => {
                    debug!(bet_id, outcome = %result.outcome, "Closer settled bet");
                    report.closed.push(bet_id);
                }
                Ok(Ok(Err(e))) => {
                    warn!(bet_id, error = %e, "Failed to close bet");
                    report.failed.push((bet_id, e.to_string()));
                }
                Ok(Err(e)) => {
                    error!(bet_id, error = %e, "Close task aborted");
                    report.failed.push((bet_id, e.to_string()));
                }
                Err(_) => {
                    warn!(
                        bet_id,
                        timeout_ms = self.config.close_timeout.as_millis() as u64,
                        "Close timed out; leaving it to finish in the background"
                    );
                    report.timed_out.push(bet_id);
                    self.stragglers().push((bet_id, task));
                }
            }
        }

        info!(
            scanned = report.scanned,
            eligible = report.eligible,
            closed = report.closed.len(),
            failed = report.failed.len(),
            timed_out = report.timed_out.len(),
            busy = report.busy.len(),
            "Closer tick complete"
        );
        report
    }

    /// Collect background closes. With `wait` set, blocks until all of them
    /// finish; otherwise only the already-finished ones are collected.
    async fn reap_stragglers(&self, wait: bool) {
        let ready: Vec<(BetId, CloseTask)> = {
            let mut stragglers = self.stragglers();
            if wait {
                std::mem::take(&mut *stragglers)
            } else {
                let (done, pending) = std::mem::take(&mut *stragglers)
                    .into_iter()
                    .partition(|(_, task)| task.is_finished());
                *stragglers = pending;
                done
            }
        };

        for (bet_id, task) in ready {
            match task.await {
                Ok(Ok(_)) => info!(bet_id, "Background close finished"),
                Ok(Err(e)) => warn!(bet_id, error = %e, "Background close failed"),
                Err(e) => error!(bet_id, error = %e, "Background close task aborted"),
            }
        }
    }

    /// Spawn the periodic loop. The first scan runs immediately.
    pub fn start(self: Arc<Self>) -> CloserHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let scheduler = Arc::clone(&self);

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(scheduler.config.interval);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!(
                interval_secs = scheduler.config.interval.as_secs(),
                closer = %scheduler.config.identity,
                "Closer started"
            );

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.tick().await;
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        CloserHandle {
            shutdown: shutdown_tx,
            task,
            scheduler: self,
        }
    }
}

/// Owner of a running closer loop.
pub struct CloserHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
    scheduler: Arc<CloserScheduler>,
}

impl CloserHandle {
    /// Stop the timer, let the current tick finish, then wait for any
    /// background closes.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Closer loop ended abnormally");
        }
        self.scheduler.reap_stragglers(true).await;
        info!("Closer stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
