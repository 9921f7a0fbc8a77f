//! CLI argument definitions for dockroute.
//!
//! Uses `clap` v4 derive macros to parse command-line arguments.
//! Flags take precedence over environment variables and the config file.

use std::path::PathBuf;

use clap::Parser;

use dockroute_core::config::DockrouteConfig;

/// 설정 파일 기본 경로 (`--config`가 없을 때 존재하면 사용)
pub const DEFAULT_CONFIG_PATH: &str = "/etc/dockroute/dockroute.toml";

/// Dynamic reverse proxy for Docker containers.
///
/// Routes HTTP/TLS connections by Host header or SNI to containers on
/// matching networks, forwards fixed ports to operator-selected containers,
/// and bridges SSH sessions to container shells.
#[derive(Parser, Debug, Default)]
#[command(name = "dockroute")]
#[command(version, about, long_about = None)]
pub struct DaemonCli {
    /// Path to dockroute.toml configuration file.
    ///
    /// Defaults to /etc/dockroute/dockroute.toml when that file exists.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Override log format (json, pretty).
    #[arg(long)]
    pub log_format: Option<String>,

    /// Validate configuration and exit without starting the daemon.
    #[arg(long)]
    pub validate: bool,

    /// Override PID file path.
    #[arg(long)]
    pub pid_file: Option<String>,

    /// Regex that Host headers and SNI names must match.
    #[arg(long)]
    pub host_pattern: Option<String>,

    /// Port for the host-routing listener.
    #[arg(long)]
    pub listen_port: Option<u16>,

    /// Regex selecting the Docker networks to index.
    #[arg(long)]
    pub network_pattern: Option<String>,

    /// Container port that host-routed connections are forwarded to.
    #[arg(long)]
    pub backend_port: Option<u16>,

    /// Enable the admin dashboard.
    #[arg(long)]
    pub dashboard: bool,

    /// Enable the SSH shell bridge.
    #[arg(long)]
    pub shell: bool,

    /// Port for the SSH shell bridge.
    #[arg(long)]
    pub shell_port: Option<u16>,
}

impl DaemonCli {
    /// 읽을 설정 파일 경로를 결정합니다.
    ///
    /// `--config`가 주어지면 그 경로, 아니면 기본 경로가 존재할 때만 기본 경로.
    pub fn config_path(&self) -> Option<PathBuf> {
        match &self.config {
            Some(path) => Some(path.clone()),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                default.is_file().then_some(default)
            }
        }
    }

    /// CLI 플래그를 설정에 덮어씁니다.
    ///
    /// 지정되지 않은 플래그는 기존 값을 유지합니다. 불리언 플래그는 켜기만 합니다.
    pub fn apply_overrides(&self, config: &mut DockrouteConfig) {
        if let Some(level) = &self.log_level {
            config.general.log_level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.general.log_format = format.clone();
        }
        if let Some(pid_file) = &self.pid_file {
            config.general.pid_file = pid_file.clone();
        }
        if let Some(pattern) = &self.host_pattern {
            config.router.host_pattern = pattern.clone();
        }
        if let Some(port) = self.listen_port {
            config.router.listen_port = port;
        }
        if let Some(pattern) = &self.network_pattern {
            config.registry.network_pattern = pattern.clone();
        }
        if let Some(port) = self.backend_port {
            config.router.backend_port = port;
        }
        if self.dashboard {
            config.admin.enabled = true;
        }
        if self.shell {
            config.shell.enabled = true;
        }
        if let Some(port) = self.shell_port {
            config.shell.port = port;
        }
    }
}
