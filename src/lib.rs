//! Copy-trade position tracker with a ratcheting take-profit / stop-loss exit.
//!
//! `universal` holds the trading core (classifier, positions, ratchet,
//! coordinator) and the adapters it talks to; `common` holds config,
//! logging and the RPC client.

pub mod common;
pub mod universal;
