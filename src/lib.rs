//! WAGER — two-party directional price bets with an autonomous closer.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod clock;
pub mod feed;
pub mod ledger;
pub mod engine;
pub mod storage;
pub mod api;
