//! Admin dashboard module initialization.

use anyhow::Result;
use tokio::sync::watch;

use dockroute_core::config::DockrouteConfig;
use dockroute_registry::AdminService;

use super::ModuleHandle;
use crate::dashboard::{AdminServer, AppState};
use crate::health::DaemonHealth;

/// Initialize the admin dashboard module.
///
/// Returns `None` if the dashboard is disabled in configuration.
pub fn init(
    config: &DockrouteConfig,
    admin: AdminService,
    health: watch::Receiver<DaemonHealth>,
) -> Result<Option<ModuleHandle>> {
    if !config.admin.enabled {
        tracing::info!("admin dashboard disabled in configuration");
        return Ok(None);
    }

    let listen_addr = config.admin.listen_addr.parse().map_err(|e| {
        anyhow::anyhow!(
            "invalid admin listen address '{}': {}",
            config.admin.listen_addr,
            e
        )
    })?;

    tracing::info!(listen_addr = %listen_addr, "initializing admin dashboard");

    let server = AdminServer::new(listen_addr, AppState::new(admin, health));
    Ok(Some(ModuleHandle::new("admin", true, Box::new(server))))
}
