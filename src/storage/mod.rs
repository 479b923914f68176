//! Persistence layer.
//!
//! Saves and loads service state to/from a JSON file so a restart resumes
//! with every bet (including any partially paid settlement) and the ledger
//! balances backing their escrow.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

use crate::engine::registry::RegistrySnapshot;
use crate::ledger::memory::LedgerSnapshot;
use crate::types::BetStatus;

/// Default state file path.
pub const DEFAULT_STATE_FILE: &str = "wager_state.json";

/// Everything written to the state file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSnapshot {
    pub registry: RegistrySnapshot,
    #[serde(default)]
    pub ledger: LedgerSnapshot,
}

/// Save a service snapshot. Writes to a sibling temp file first and renames
/// it over the target so a crash never leaves a truncated file.
pub fn save_snapshot(snapshot: &ServiceSnapshot, path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    let json =
        serde_json::to_string_pretty(snapshot).context("Failed to serialise service snapshot")?;

    let tmp = format!("{path}.tmp");
    std::fs::write(&tmp, &json).context(format!("Failed to write state to {tmp}"))?;
    std::fs::rename(&tmp, path).context(format!("Failed to move state into {path}"))?;

    debug!(path, bets = snapshot.registry.bets.len(), "State saved");
    Ok(())
}

/// Load a service snapshot.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_snapshot(path: Option<&str>) -> Result<Option<ServiceSnapshot>> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);

    if !Path::new(path).exists() {
        info!(path, "No saved state found, starting fresh");
        return Ok(None);
    }

    let json =
        std::fs::read_to_string(path).context(format!("Failed to read state from {path}"))?;

    let snapshot: ServiceSnapshot =
        serde_json::from_str(&json).context(format!("Failed to parse state from {path}"))?;

    let active = snapshot
        .registry
        .bets
        .iter()
        .filter(|b| b.status == BetStatus::Active)
        .count();
    info!(
        path,
        bets = snapshot.registry.bets.len(),
        active,
        escrowed = snapshot.ledger.escrowed,
        saved_at = %snapshot.registry.saved_at,
        "State loaded from disk"
    );

    Ok(Some(snapshot))
}

/// Delete the state file (for testing or reset).
pub fn delete_snapshot(path: Option<&str>) -> Result<()> {
    let path = path.unwrap_or(DEFAULT_STATE_FILE);
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete state file {path}"))?;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
