//! HTTP surface and process wiring for the ledger engine.

pub mod app;
pub mod middleware;
