//! SSH shell bridge module initialization.

use std::sync::Arc;

use anyhow::Result;

use dockroute_core::config::DockrouteConfig;
use dockroute_registry::{ContainerExec, SnapshotReader};
use dockroute_shell_bridge::{ShellBridgeBuilder, ShellBridgeConfig};

use super::ModuleHandle;

/// Initialize the shell bridge module.
///
/// Returns `None` if the shell bridge is disabled in configuration.
/// The host key is read when the module starts, not here.
pub fn init<E: ContainerExec>(
    config: &DockrouteConfig,
    exec: Arc<E>,
    reader: SnapshotReader,
) -> Result<Option<ModuleHandle>> {
    if !config.shell.enabled {
        tracing::info!("shell bridge disabled in configuration");
        return Ok(None);
    }

    tracing::info!(port = config.shell.port, "initializing shell bridge");

    let bridge = ShellBridgeBuilder::new()
        .config(ShellBridgeConfig::from_core(config))
        .exec(exec)
        .reader(reader)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build shell bridge: {}", e))?;

    Ok(Some(ModuleHandle::new("shell", true, Box::new(bridge))))
}
