//! Aggregated health reporting.
//!
//! The orchestrator polls every module's `health_check()` on a fixed tick
//! and publishes a [`DaemonHealth`] on a `watch` channel. The dashboard's
//! `/health` route reads the latest value without touching the modules.
//!
//! # Aggregation Rule
//!
//! - All Healthy -> Healthy
//! - Any Degraded, none Unhealthy -> Degraded(reason)
//! - Any Unhealthy -> Unhealthy(reason)

use serde::Serialize;
use tokio::sync::watch;

use dockroute_core::pipeline::HealthStatus;

/// Aggregated health report for the entire daemon.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonHealth {
    /// Overall daemon health status (worst of all modules).
    pub status: HealthStatus,
    /// Daemon uptime in seconds since start.
    pub uptime_secs: u64,
    /// Per-module health reports.
    pub modules: Vec<ModuleHealth>,
}

impl DaemonHealth {
    /// 아직 한 번도 점검하지 않은 상태 (시작 중)
    pub fn starting() -> Self {
        Self {
            status: HealthStatus::Degraded("starting".to_owned()),
            uptime_secs: 0,
            modules: Vec::new(),
        }
    }

    /// 모듈별 상태로 보고서를 만듭니다.
    pub fn from_modules(modules: Vec<ModuleHealth>, uptime_secs: u64) -> Self {
        Self {
            status: aggregate_status(&modules),
            uptime_secs,
            modules,
        }
    }
}

/// Health status for a single module.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleHealth {
    /// Module name (e.g., "registry", "router").
    pub name: String,
    /// Whether the module is enabled in configuration.
    pub enabled: bool,
    /// Current health status of the module.
    pub status: HealthStatus,
}

/// Aggregate multiple module health statuses into a single status.
///
/// Returns the worst status found: Unhealthy > Degraded > Healthy.
/// Only considers enabled modules.
pub fn aggregate_status(modules: &[ModuleHealth]) -> HealthStatus {
    let mut worst = HealthStatus::Healthy;
    let mut reasons = Vec::new();

    for module in modules.iter().filter(|m| m.enabled) {
        match &module.status {
            HealthStatus::Healthy => {}
            HealthStatus::Degraded(reason) => {
                if !worst.is_unhealthy() {
                    reasons.push(format!("{}: {}", module.name, reason));
                    worst = HealthStatus::Degraded(String::new());
                }
            }
            HealthStatus::Unhealthy(reason) => {
                if !worst.is_unhealthy() {
                    // Degraded 사유는 버리고 Unhealthy 사유만 남김
                    reasons.clear();
                }
                reasons.push(format!("{}: {}", module.name, reason));
                worst = HealthStatus::Unhealthy(String::new());
            }
        }
    }

    match worst {
        HealthStatus::Healthy => HealthStatus::Healthy,
        HealthStatus::Degraded(_) => HealthStatus::Degraded(reasons.join("; ")),
        HealthStatus::Unhealthy(_) => HealthStatus::Unhealthy(reasons.join("; ")),
    }
}

/// 건강 상태 게시 채널을 생성합니다. 초기값은 [`DaemonHealth::starting`].
pub fn health_channel() -> (watch::Sender<DaemonHealth>, watch::Receiver<DaemonHealth>) {
    watch::channel(DaemonHealth::starting())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(name: &str, enabled: bool, status: HealthStatus) -> ModuleHealth {
        ModuleHealth {
            name: name.to_owned(),
            enabled,
            status,
        }
    }

    #[test]
    fn all_healthy() {
        let modules = vec![
            module("registry", true, HealthStatus::Healthy),
            module("router", true, HealthStatus::Healthy),
        ];
        assert_eq!(aggregate_status(&modules), HealthStatus::Healthy);
    }

    #[test]
    fn degraded_collects_reasons() {
        let modules = vec![
            module("registry", true, HealthStatus::Degraded("no snapshot yet".to_owned())),
            module("router", true, HealthStatus::Healthy),
        ];
        assert_eq!(
            aggregate_status(&modules),
            HealthStatus::Degraded("registry: no snapshot yet".to_owned())
        );
    }

    #[test]
    fn unhealthy_wins_over_degraded() {
        let modules = vec![
            module("registry", true, HealthStatus::Degraded("slow".to_owned())),
            module("router", true, HealthStatus::Unhealthy("listener died".to_owned())),
        ];
        assert_eq!(
            aggregate_status(&modules),
            HealthStatus::Unhealthy("router: listener died".to_owned())
        );
    }

    #[test]
    fn disabled_modules_ignored() {
        let modules = vec![
            module("registry", true, HealthStatus::Healthy),
            module("shell", false, HealthStatus::Unhealthy("not running".to_owned())),
        ];
        assert!(aggregate_status(&modules).is_healthy());
    }

    #[test]
    fn report_serializes_with_tagged_status() {
        let report = DaemonHealth::from_modules(
            vec![module("registry", true, HealthStatus::Healthy)],
            42,
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["status"]["status"], "healthy");
        assert_eq!(json["uptime_secs"], 42);
        assert_eq!(json["modules"][0]["name"], "registry");
    }
}
