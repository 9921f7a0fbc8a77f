//! 레지스트리 설정
//!
//! [`ContainerRegistryConfig`]는 core의 `[docker]`, `[registry]` 섹션과
//! `[[router.selected_targets]]` 목록을 모아 레지스트리 전용 설정을 제공합니다.
//!
//! # 사용 예시
//! ```ignore
//! use dockroute_core::config::DockrouteConfig;
//! use dockroute_registry::config::ContainerRegistryConfig;
//!
//! let core_config = DockrouteConfig::default();
//! let config = ContainerRegistryConfig::from_core(&core_config);
//! ```

use std::time::Duration;

use dockroute_core::config::{DockrouteConfig, SelectedTargetConfig};
use serde::{Deserialize, Serialize};

use crate::error::RegistryError;

/// 레지스트리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRegistryConfig {
    /// Docker 소켓 경로
    pub docker_socket: String,
    /// 디렉토리 조회 타임아웃 (초)
    pub query_timeout_secs: u64,
    /// 네트워크 이름 필터 정규식
    pub network_pattern: String,
    /// 디바운스 윈도우 (초)
    pub debounce_secs: u64,
    /// 주기적 재동기화 간격 (초, 0 = 비활성화)
    pub resync_interval_secs: u64,
    /// 이벤트 스트림 재연결 대기 (초)
    pub event_reconnect_secs: u64,
    /// 선택 대상 목록
    pub selected_targets: Vec<SelectedTargetConfig>,

    // --- 확장 설정 (core에 없는 추가 필드) ---
    /// 디바운서 트리거 채널 용량
    pub trigger_channel_capacity: usize,
}

impl Default for ContainerRegistryConfig {
    fn default() -> Self {
        Self {
            docker_socket: "/var/run/docker.sock".to_owned(),
            query_timeout_secs: 10,
            network_pattern: String::new(),
            debounce_secs: 10,
            resync_interval_secs: 0,
            event_reconnect_secs: 5,
            selected_targets: SelectedTargetConfig::defaults(),
            trigger_channel_capacity: 16,
        }
    }
}

/// 설정 상한값 상수
const MAX_QUERY_TIMEOUT_SECS: u64 = 300;
const MAX_DEBOUNCE_SECS: u64 = 3600;
const MAX_TRIGGER_CHANNEL_CAPACITY: usize = 1024;

impl ContainerRegistryConfig {
    /// core 설정에서 레지스트리 설정을 생성합니다.
    ///
    /// core 설정에 없는 확장 필드는 기본값이 적용됩니다.
    pub fn from_core(core: &DockrouteConfig) -> Self {
        Self {
            docker_socket: core.docker.socket.clone(),
            query_timeout_secs: core.docker.query_timeout_secs,
            network_pattern: core.registry.network_pattern.clone(),
            debounce_secs: core.registry.debounce_secs,
            resync_interval_secs: core.registry.resync_interval_secs,
            event_reconnect_secs: core.registry.event_reconnect_secs,
            selected_targets: core.router.selected_targets.clone(),
            ..Self::default()
        }
    }

    /// 디렉토리 조회 타임아웃
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }

    /// 디바운스 윈도우
    pub fn debounce_window(&self) -> Duration {
        Duration::from_secs(self.debounce_secs)
    }

    /// 재동기화 간격 (비활성화 시 `None`)
    pub fn resync_interval(&self) -> Option<Duration> {
        (self.resync_interval_secs > 0).then(|| Duration::from_secs(self.resync_interval_secs))
    }

    /// 이벤트 스트림 재연결 대기
    pub fn event_reconnect(&self) -> Duration {
        Duration::from_secs(self.event_reconnect_secs)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RegistryError> {
        if self.network_pattern.is_empty() {
            return Err(config_err("network_pattern", "must not be empty"));
        }
        if let Err(e) = regex::Regex::new(&self.network_pattern) {
            return Err(config_err("network_pattern", format!("invalid regex: {e}")));
        }

        if self.query_timeout_secs == 0 || self.query_timeout_secs > MAX_QUERY_TIMEOUT_SECS {
            return Err(config_err(
                "query_timeout_secs",
                format!("must be 1-{MAX_QUERY_TIMEOUT_SECS}"),
            ));
        }

        if self.debounce_secs == 0 || self.debounce_secs > MAX_DEBOUNCE_SECS {
            return Err(config_err(
                "debounce_secs",
                format!("must be 1-{MAX_DEBOUNCE_SECS}"),
            ));
        }

        if self.event_reconnect_secs == 0 || self.event_reconnect_secs > MAX_DEBOUNCE_SECS {
            return Err(config_err(
                "event_reconnect_secs",
                format!("must be 1-{MAX_DEBOUNCE_SECS}"),
            ));
        }

        if self.trigger_channel_capacity == 0
            || self.trigger_channel_capacity > MAX_TRIGGER_CHANNEL_CAPACITY
        {
            return Err(config_err(
                "trigger_channel_capacity",
                format!("must be 1-{MAX_TRIGGER_CHANNEL_CAPACITY}"),
            ));
        }

        if self.docker_socket.is_empty() {
            return Err(config_err("docker_socket", "must not be empty"));
        }

        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> RegistryError {
    RegistryError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 레지스트리 설정 빌더
#[derive(Default)]
pub struct ContainerRegistryConfigBuilder {
    config: ContainerRegistryConfig,
}

impl ContainerRegistryConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// Docker 소켓 경로를 설정합니다.
    pub fn docker_socket(mut self, socket: impl Into<String>) -> Self {
        self.config.docker_socket = socket.into();
        self
    }

    /// 네트워크 필터 정규식을 설정합니다.
    pub fn network_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.network_pattern = pattern.into();
        self
    }

    /// 조회 타임아웃(초)을 설정합니다.
    pub fn query_timeout_secs(mut self, secs: u64) -> Self {
        self.config.query_timeout_secs = secs;
        self
    }

    /// 디바운스 윈도우(초)를 설정합니다.
    pub fn debounce_secs(mut self, secs: u64) -> Self {
        self.config.debounce_secs = secs;
        self
    }

    /// 재동기화 간격(초)을 설정합니다.
    pub fn resync_interval_secs(mut self, secs: u64) -> Self {
        self.config.resync_interval_secs = secs;
        self
    }

    /// 이벤트 스트림 재연결 대기(초)를 설정합니다.
    pub fn event_reconnect_secs(mut self, secs: u64) -> Self {
        self.config.event_reconnect_secs = secs;
        self
    }

    /// 선택 대상 목록을 설정합니다.
    pub fn selected_targets(mut self, targets: Vec<SelectedTargetConfig>) -> Self {
        self.config.selected_targets = targets;
        self
    }

    /// 트리거 채널 용량을 설정합니다.
    pub fn trigger_channel_capacity(mut self, capacity: usize) -> Self {
        self.config.trigger_channel_capacity = capacity;
        self
    }

    /// 설정을 검증하고 `ContainerRegistryConfig`를 생성합니다.
    pub fn build(self) -> Result<ContainerRegistryConfig, RegistryError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
