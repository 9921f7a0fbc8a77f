//! dockroute daemon library.
//!
//! Exposes the daemon's internals for integration testing.
//! In production, `dockroute` is used as a binary (main.rs).

pub mod cli;
pub mod dashboard;
pub mod health;
pub mod logging;
pub mod metrics_server;
pub mod modules;
pub mod orchestrator;
