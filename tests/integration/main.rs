//! End-to-end tests driving the registry, ledger, price feed and closer
//! together.

mod closer;
mod lifecycle;
mod support;
