//! Connection router module initialization.
//!
//! Wires the host-routing listener and one listener per selected target
//! to the registry's alias router and selected-target registry.

use std::sync::Arc;

use anyhow::Result;

use dockroute_core::config::DockrouteConfig;
use dockroute_registry::{AliasRouter, SelectedTargetRegistry};
use dockroute_router::{ConnectionRouterBuilder, ConnectionRouterConfig};

use super::ModuleHandle;

/// Initialize the connection router module.
///
/// Returns `None` if the router is disabled in configuration.
pub fn init(
    config: &DockrouteConfig,
    alias_router: AliasRouter,
    targets: Arc<SelectedTargetRegistry>,
) -> Result<Option<ModuleHandle>> {
    if !config.router.enabled {
        tracing::info!("connection router disabled in configuration");
        return Ok(None);
    }

    tracing::info!(
        listen_port = config.router.listen_port,
        selected_targets = targets.len(),
        "initializing connection router"
    );

    let router = ConnectionRouterBuilder::new()
        .config(ConnectionRouterConfig::from_core(config))
        .alias_router(alias_router)
        .targets(targets)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build connection router: {}", e))?;

    Ok(Some(ModuleHandle::new("router", true, Box::new(router))))
}
