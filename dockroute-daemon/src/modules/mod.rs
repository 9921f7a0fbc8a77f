//! Module registry and initialization.
//!
//! Each dockroute crate is wrapped as a [`ModuleHandle`] that provides
//! uniform lifecycle management via the [`DynPipeline`] trait.
//!
//! # Registration Order
//!
//! ```text
//! registry (publishes snapshots) -> router -> shell -> admin
//! ```
//!
//! The registry starts first so that its initial snapshot exists before any
//! listener accepts a connection. Stopping runs in reverse: listeners close
//! before the registry stops refreshing.

pub mod admin;
pub mod registry;
pub mod router;
pub mod shell;

use dockroute_core::pipeline::{DynPipeline, HealthStatus};

use crate::health::ModuleHealth;

/// A handle to a registered module.
pub struct ModuleHandle {
    /// Module name for logging and health reporting.
    pub name: String,
    /// Whether this module is enabled in configuration.
    pub enabled: bool,
    /// The module's pipeline implementation (start/stop/health_check).
    pub pipeline: Box<dyn DynPipeline>,
}

impl ModuleHandle {
    /// Create a new module handle.
    pub fn new(name: impl Into<String>, enabled: bool, pipeline: Box<dyn DynPipeline>) -> Self {
        Self {
            name: name.into(),
            enabled,
            pipeline,
        }
    }

    /// Disabled modules always report `Healthy`.
    pub async fn health_check(&self) -> HealthStatus {
        if !self.enabled {
            return HealthStatus::Healthy;
        }
        self.pipeline.health_check().await
    }
}

/// Registry of all dockroute modules.
pub struct ModuleRegistry {
    /// Modules in registration order.
    modules: Vec<ModuleHandle>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
        }
    }

    /// Register a module. Registration order is start order.
    pub fn register(&mut self, handle: ModuleHandle) {
        self.modules.push(handle);
    }

    /// Start all enabled modules in registration order.
    ///
    /// Returns an error on the first module that fails to start.
    /// Already-started modules are NOT rolled back; the caller should
    /// invoke `stop_all` if partial startup is unacceptable.
    pub async fn start_all(&mut self) -> anyhow::Result<()> {
        for handle in &mut self.modules {
            if !handle.enabled {
                tracing::debug!(module = %handle.name, "skipping disabled module");
                continue;
            }

            tracing::info!(module = %handle.name, "starting module");
            handle
                .pipeline
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start module '{}': {}", handle.name, e))?;
            tracing::info!(module = %handle.name, "module started successfully");
        }
        Ok(())
    }

    /// Stop all enabled modules in reverse registration order.
    ///
    /// Logs errors but continues stopping remaining modules.
    /// Modules that were never started report `NotRunning`, which is ignored
    /// so that a rollback after partial startup stays quiet.
    pub async fn stop_all(&mut self) -> anyhow::Result<()> {
        let mut errors = Vec::new();

        for handle in self.modules.iter_mut().rev() {
            if !handle.enabled {
                continue;
            }

            tracing::info!(module = %handle.name, "stopping module");
            match handle.pipeline.stop().await {
                Ok(()) => tracing::info!(module = %handle.name, "module stopped successfully"),
                Err(dockroute_core::DockrouteError::Pipeline(
                    dockroute_core::PipelineError::NotRunning,
                )) => {
                    tracing::debug!(module = %handle.name, "module was not running");
                }
                Err(e) => {
                    tracing::error!(module = %handle.name, error = %e, "failed to stop module");
                    errors.push(format!("{}: {}", handle.name, e));
                }
            }
        }

        if !errors.is_empty() {
            return Err(anyhow::anyhow!(
                "errors stopping modules: {}",
                errors.join("; ")
            ));
        }

        Ok(())
    }

    /// Get health status for all modules.
    pub async fn health_statuses(&self) -> Vec<ModuleHealth> {
        let mut statuses = Vec::with_capacity(self.modules.len());
        for handle in &self.modules {
            statuses.push(ModuleHealth {
                name: handle.name.clone(),
                enabled: handle.enabled,
                status: handle.health_check().await,
            });
        }
        statuses
    }

    /// Registered module names in start order.
    pub fn names(&self) -> Vec<&str> {
        self.modules.iter().map(|m| m.name.as_str()).collect()
    }

    /// Number of registered modules.
    pub fn count(&self) -> usize {
        self.modules.len()
    }

    /// Number of enabled modules.
    pub fn enabled_count(&self) -> usize {
        self.modules.iter().filter(|m| m.enabled).count()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}
