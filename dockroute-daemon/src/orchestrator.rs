//! Module orchestration -- assembly, lifecycle management and signal handling.
//!
//! The [`Orchestrator`] is the central coordinator of `dockroute`. It validates
//! configuration, connects to Docker, builds enabled modules, manages
//! startup/shutdown ordering and runs the main event loop.
//!
//! # Startup Order
//!
//! 1. Registry (initial snapshot, debouncer, event watcher)
//! 2. Connection router (host-routing and selected-target listeners)
//! 3. Shell bridge (SSH listener)
//! 4. Admin dashboard (HTTP)
//!
//! Shutdown runs in reverse so that listeners close before the registry stops.
//!
//! # Signals
//!
//! - `SIGTERM`, `SIGINT`: graceful shutdown
//! - `SIGHUP`: forced registry refresh (goes through the debouncer)

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use tokio::sync::{broadcast, watch};

use dockroute_core::config::DockrouteConfig;
use dockroute_registry::{BollardDirectoryClient, ContainerExec, DebounceHandle, DirectoryClient, Trigger};

use crate::health::{DaemonHealth, health_channel};
use crate::metrics_server;
use crate::modules::{self, ModuleRegistry};

/// 건강 상태 점검 주기
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);

/// The main daemon orchestrator.
pub struct Orchestrator {
    /// Validated configuration.
    config: DockrouteConfig,
    /// Registered modules (ordered for start/stop).
    modules: ModuleRegistry,
    /// Registry debouncer handle for manual refreshes.
    trigger: DebounceHandle,
    /// Latest aggregated health, read by the dashboard.
    health_tx: watch::Sender<DaemonHealth>,
    /// Shutdown broadcast sender (signals background tasks).
    shutdown_tx: broadcast::Sender<()>,
    /// Daemon start time (for uptime reporting).
    start_time: Instant,
}

impl Orchestrator {
    /// Load `dockroute.toml`, apply environment overrides and build.
    ///
    /// # Errors
    ///
    /// - configuration file cannot be read, parsed or validated
    /// - any enabled module fails to initialize
    pub async fn build(config_path: &Path) -> Result<Self> {
        let config = DockrouteConfig::load(config_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load config: {}", e))?;
        Self::build_from_config(config).await
    }

    /// Build from an already-loaded configuration, connecting to the Docker
    /// socket named in `docker.socket`.
    pub async fn build_from_config(config: DockrouteConfig) -> Result<Self> {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;

        // Install metrics recorder before module initialization
        if config.metrics.enabled {
            metrics_server::install_metrics_recorder(&config.metrics)?;
            tracing::info!(port = config.metrics.port, "metrics endpoint enabled");
        }

        let docker = Arc::new(
            BollardDirectoryClient::connect_with_socket(&config.docker.socket)
                .map_err(|e| anyhow::anyhow!("failed to create docker client: {}", e))?,
        );
        Self::assemble(config, docker)
    }

    /// Build with an explicit Docker client.
    ///
    /// Does not install the metrics recorder.
    pub fn build_with_client<D>(config: DockrouteConfig, docker: Arc<D>) -> Result<Self>
    where
        D: DirectoryClient + ContainerExec,
    {
        config
            .validate()
            .map_err(|e| anyhow::anyhow!("config validation failed: {}", e))?;
        Self::assemble(config, docker)
    }

    fn assemble<D>(config: DockrouteConfig, docker: Arc<D>) -> Result<Self>
    where
        D: DirectoryClient + ContainerExec,
    {
        let (health_tx, health_rx) = health_channel();
        let (shutdown_tx, _) = broadcast::channel(16);
        let mut registry = ModuleRegistry::new();

        let (handle, shared) = modules::registry::init(&config, docker)?;
        registry.register(handle);

        if let Some(handle) = modules::router::init(
            &config,
            shared.alias_router.clone(),
            Arc::clone(&shared.targets),
        )? {
            registry.register(handle);
        }

        if let Some(handle) =
            modules::shell::init(&config, Arc::clone(&shared.docker), shared.reader.clone())?
        {
            registry.register(handle);
        }

        if let Some(handle) = modules::admin::init(&config, shared.admin.clone(), health_rx)? {
            registry.register(handle);
        }

        tracing::info!(
            modules = ?registry.names(),
            total_modules = registry.count(),
            "orchestrator initialized"
        );

        if config.metrics.enabled {
            record_daemon_metrics(registry.count());
        }

        Ok(Self {
            config,
            modules: registry,
            trigger: shared.trigger,
            health_tx,
            shutdown_tx,
            start_time: Instant::now(),
        })
    }

    /// Start all modules and block until SIGTERM or SIGINT.
    pub async fn run(&mut self) -> Result<()> {
        self.run_until(wait_for_shutdown_signal()).await
    }

    /// Start all modules and run the main loop until `shutdown` resolves.
    ///
    /// The loop also handles `SIGHUP` (manual refresh) and publishes
    /// aggregated health every [`HEALTH_CHECK_INTERVAL`].
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = Result<&'static str>>,
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sighup = signal(SignalKind::hangup())
            .map_err(|e| anyhow::anyhow!("failed to install SIGHUP handler: {}", e))?;

        if !self.config.general.pid_file.is_empty() {
            write_pid_file(Path::new(&self.config.general.pid_file))?;
        }

        tracing::info!("starting all modules");
        if let Err(e) = self.modules.start_all().await {
            tracing::warn!("startup failed, rolling back already-started modules");
            if let Err(stop_err) = self.modules.stop_all().await {
                tracing::error!(
                    startup_error = %e,
                    rollback_error = %stop_err,
                    "rollback also failed during startup failure cleanup"
                );
            }
            self.cleanup_pid_file();
            return Err(e);
        }

        let mut uptime_updater_task = self
            .config
            .metrics
            .enabled
            .then(|| spawn_uptime_updater(self.start_time, self.shutdown_tx.subscribe()));

        self.publish_health().await;

        tracing::info!("entering main event loop");
        let mut health_tick = tokio::time::interval(HEALTH_CHECK_INTERVAL);
        health_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = &mut shutdown => {
                    match result {
                        Ok(signal) => tracing::info!(signal = signal, "shutdown signal received"),
                        Err(e) => tracing::error!(error = %e, "shutdown signal wait failed, shutting down"),
                    }
                    break;
                }
                _ = sighup.recv() => {
                    tracing::info!("SIGHUP received, requesting registry refresh");
                    self.request_refresh();
                }
                _ = health_tick.tick() => {
                    self.publish_health().await;
                }
            }
        }

        let _ = self.shutdown_tx.send(());
        if let Some(task) = uptime_updater_task.take() {
            let _ = task.await;
        }

        let result = self.shutdown().await;
        self.cleanup_pid_file();
        result
    }

    /// Stop all modules in reverse order.
    async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("stopping all modules");
        self.modules.stop_all().await
    }

    /// Ask the registry for a refresh. Goes through the debouncer.
    pub fn request_refresh(&self) {
        self.trigger.notify(Trigger::Manual);
    }

    /// Debouncer handle for callers that outlive a borrow of the orchestrator.
    pub fn refresh_handle(&self) -> DebounceHandle {
        self.trigger.clone()
    }

    /// Poll every module and build an aggregated report.
    pub async fn health(&self) -> DaemonHealth {
        let modules = self.modules.health_statuses().await;
        DaemonHealth::from_modules(modules, self.start_time.elapsed().as_secs())
    }

    /// Receiver for the periodically published health report.
    pub fn health_receiver(&self) -> watch::Receiver<DaemonHealth> {
        self.health_tx.subscribe()
    }

    /// Registered module names in start order.
    pub fn module_names(&self) -> Vec<&str> {
        self.modules.names()
    }

    /// Get a reference to the loaded configuration.
    pub fn config(&self) -> &DockrouteConfig {
        &self.config
    }

    async fn publish_health(&self) {
        let report = self.health().await;
        if !report.status.is_healthy() {
            tracing::warn!(status = %report.status, "daemon health degraded");
        }
        self.health_tx.send_replace(report);
    }

    fn cleanup_pid_file(&self) {
        if !self.config.general.pid_file.is_empty() {
            remove_pid_file(Path::new(&self.config.general.pid_file));
        }
    }
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
///
/// Returns the name of the signal that triggered the shutdown.
async fn wait_for_shutdown_signal() -> Result<&'static str> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("failed to install SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("failed to install SIGINT handler: {}", e))?;

    Ok(tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    })
}

/// Write the current process PID to a file.
///
/// # Security
///
/// - `create_new(true)` creates the file atomically (no TOCTOU race)
/// - the created file must be a regular file
/// - parent directory is created with mode 0o700, the file with 0o600
pub fn write_pid_file(path: &Path) -> Result<()> {
    use std::fs::{self, OpenOptions};
    use std::io::{ErrorKind, Write};

    if let Some(parent) = path.parent() {
        #[cfg(unix)]
        {
            use std::os::unix::fs::DirBuilderExt;
            fs::DirBuilder::new()
                .mode(0o700)
                .recursive(true)
                .create(parent)?;
        }
        #[cfg(not(unix))]
        {
            fs::create_dir_all(parent)?;
        }
    }

    let pid = std::process::id();

    let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
        Ok(f) => f,
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let existing_pid = fs::read_to_string(path).unwrap_or_else(|_| "unknown".to_owned());
            return Err(anyhow::anyhow!(
                "PID file {} already exists with PID: {}. Is another instance running?",
                path.display(),
                existing_pid.trim()
            ));
        }
        Err(e) => return Err(e.into()),
    };

    if !file.metadata()?.is_file() {
        let _ = fs::remove_file(path);
        return Err(anyhow::anyhow!(
            "PID file {} is not a regular file (possible symlink attack)",
            path.display()
        ));
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(0o600))?;
    }

    writeln!(file, "{}", pid)?;

    tracing::info!(pid = pid, path = %path.display(), "PID file written");
    Ok(())
}

/// Remove the PID file. Logs a warning on failure.
pub fn remove_pid_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        tracing::warn!(path = %path.display(), error = %e, "failed to remove PID file");
    } else {
        tracing::info!(path = %path.display(), "PID file removed");
    }
}

/// Record daemon-level metrics (build info, modules registered).
fn record_daemon_metrics(module_count: usize) {
    use dockroute_core::metrics as m;

    metrics::gauge!(m::DAEMON_BUILD_INFO, "version" => env!("CARGO_PKG_VERSION")).set(1.0);
    #[allow(clippy::cast_precision_loss)]
    metrics::gauge!(m::DAEMON_MODULES_REGISTERED).set(module_count as f64);

    tracing::debug!(
        module_count = module_count,
        version = env!("CARGO_PKG_VERSION"),
        "daemon metrics recorded"
    );
}

/// Spawn a background task that updates the uptime gauge every 10 seconds.
fn spawn_uptime_updater(
    start_time: Instant,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> tokio::task::JoinHandle<()> {
    use dockroute_core::metrics as m;

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(10));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    #[allow(clippy::cast_precision_loss)]
                    metrics::gauge!(m::DAEMON_UPTIME_SECONDS).set(start_time.elapsed().as_secs() as f64);
                }
                _ = shutdown_rx.recv() => {
                    tracing::debug!("uptime updater shutting down");
                    break;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_write_pid_file_creates_parent_directory() {
        // Given: A path with non-existent parent directory
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("run").join("dockroute.pid");

        // When
        write_pid_file(&pid_file).unwrap();

        // Then: file holds our PID
        let content = fs::read_to_string(&pid_file).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
    }

    #[test]
    fn test_write_pid_file_fails_if_already_exists() {
        // Given: An existing PID file
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("dockroute.pid");
        fs::write(&pid_file, "12345").unwrap();

        // When
        let err = write_pid_file(&pid_file).unwrap_err().to_string();

        // Then: error names the running PID
        assert!(err.contains("already exists"), "got: {err}");
        assert!(err.contains("12345"), "got: {err}");
    }

    #[cfg(unix)]
    #[test]
    fn test_pid_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("dockroute.pid");
        write_pid_file(&pid_file).unwrap();

        let mode = fs::metadata(&pid_file).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_remove_pid_file() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("dockroute.pid");
        fs::write(&pid_file, "99999").unwrap();

        remove_pid_file(&pid_file);
        assert!(!pid_file.exists());

        // 두 번째 호출은 경고만 남김
        remove_pid_file(&pid_file);
    }

    #[tokio::test]
    async fn test_uptime_updater_stops_on_shutdown() {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let task = spawn_uptime_updater(Instant::now(), shutdown_rx);

        let _ = shutdown_tx.send(());

        let result = tokio::time::timeout(Duration::from_millis(500), task).await;
        assert!(result.is_ok(), "uptime updater should stop promptly");
    }
}
