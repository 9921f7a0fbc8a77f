//! 라우터 설정
//!
//! [`ConnectionRouterConfig`]는 core의 `[router]` 섹션을 라우터 전용 설정으로 변환합니다.
//! 선택 대상 목록은 레지스트리의 [`SelectedTargetRegistry`](dockroute_registry::SelectedTargetRegistry)가
//! 소유하므로 여기에는 포함하지 않습니다.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use dockroute_core::config::DockrouteConfig;
use serde::{Deserialize, Serialize};

use crate::error::RouterError;
use crate::sniff::SniffLimits;

/// 라우터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRouterConfig {
    /// 리스너 바인드 주소
    pub listen_addr: String,
    /// 호스트 라우팅 리스닝 포트
    pub listen_port: u16,
    /// Host/SNI 허용 정규식
    pub host_pattern: String,
    /// 호스트 라우팅 백엔드 포트
    pub backend_port: u16,
    /// 스니핑 제한 시간 (초)
    pub sniff_timeout_secs: u64,
    /// 스니핑 바이트 예산
    pub sniff_max_bytes: usize,
    /// 백엔드 연결 타임아웃 (초)
    pub dial_timeout_secs: u64,
    /// 동시 연결 상한 (0 = 무제한)
    pub max_connections: usize,
}

impl Default for ConnectionRouterConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0".to_owned(),
            listen_port: 80,
            host_pattern: String::new(),
            backend_port: 80,
            sniff_timeout_secs: 5,
            sniff_max_bytes: 4096,
            dial_timeout_secs: 5,
            max_connections: 0,
        }
    }
}

const MAX_TIMEOUT_SECS: u64 = 300;
const MIN_SNIFF_BYTES: usize = 64;
const MAX_SNIFF_BYTES: usize = 65536;

impl ConnectionRouterConfig {
    /// core 설정에서 라우터 설정을 생성합니다.
    pub fn from_core(core: &DockrouteConfig) -> Self {
        let router = &core.router;
        Self {
            listen_addr: router.listen_addr.clone(),
            listen_port: router.listen_port,
            host_pattern: router.host_pattern.clone(),
            backend_port: router.backend_port,
            sniff_timeout_secs: router.sniff_timeout_secs,
            sniff_max_bytes: router.sniff_max_bytes,
            dial_timeout_secs: router.dial_timeout_secs,
            max_connections: router.max_connections,
        }
    }

    /// 리스너 IP
    pub fn listen_ip(&self) -> Result<IpAddr, RouterError> {
        self.listen_addr
            .parse()
            .map_err(|e| config_err("listen_addr", format!("invalid ip address: {e}")))
    }

    /// 호스트 라우팅 리스너 주소
    pub fn host_listen_addr(&self) -> Result<SocketAddr, RouterError> {
        Ok(SocketAddr::new(self.listen_ip()?, self.listen_port))
    }

    /// 스니핑 제한
    pub fn sniff_limits(&self) -> SniffLimits {
        SniffLimits {
            timeout: Duration::from_secs(self.sniff_timeout_secs),
            max_bytes: self.sniff_max_bytes,
        }
    }

    /// 백엔드 연결 타임아웃
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_secs(self.dial_timeout_secs)
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), RouterError> {
        if self.host_pattern.is_empty() {
            return Err(config_err("host_pattern", "must not be empty"));
        }
        if let Err(e) = regex::Regex::new(&self.host_pattern) {
            return Err(config_err("host_pattern", format!("invalid regex: {e}")));
        }

        self.listen_ip()?;

        if self.backend_port == 0 {
            return Err(config_err("backend_port", "must not be 0"));
        }

        if self.sniff_timeout_secs == 0 || self.sniff_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(config_err(
                "sniff_timeout_secs",
                format!("must be 1-{MAX_TIMEOUT_SECS}"),
            ));
        }
        if self.dial_timeout_secs == 0 || self.dial_timeout_secs > MAX_TIMEOUT_SECS {
            return Err(config_err(
                "dial_timeout_secs",
                format!("must be 1-{MAX_TIMEOUT_SECS}"),
            ));
        }

        if !(MIN_SNIFF_BYTES..=MAX_SNIFF_BYTES).contains(&self.sniff_max_bytes) {
            return Err(config_err(
                "sniff_max_bytes",
                format!("must be {MIN_SNIFF_BYTES}-{MAX_SNIFF_BYTES}"),
            ));
        }

        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> RouterError {
    RouterError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

/// 라우터 설정 빌더
#[derive(Default)]
pub struct ConnectionRouterConfigBuilder {
    config: ConnectionRouterConfig,
}

impl ConnectionRouterConfigBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 리스너 바인드 주소를 설정합니다.
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// 호스트 라우팅 포트를 설정합니다.
    pub fn listen_port(mut self, port: u16) -> Self {
        self.config.listen_port = port;
        self
    }

    /// Host/SNI 허용 정규식을 설정합니다.
    pub fn host_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.config.host_pattern = pattern.into();
        self
    }

    /// 백엔드 포트를 설정합니다.
    pub fn backend_port(mut self, port: u16) -> Self {
        self.config.backend_port = port;
        self
    }

    /// 스니핑 제한 시간(초)을 설정합니다.
    pub fn sniff_timeout_secs(mut self, secs: u64) -> Self {
        self.config.sniff_timeout_secs = secs;
        self
    }

    /// 스니핑 바이트 예산을 설정합니다.
    pub fn sniff_max_bytes(mut self, bytes: usize) -> Self {
        self.config.sniff_max_bytes = bytes;
        self
    }

    /// 백엔드 연결 타임아웃(초)을 설정합니다.
    pub fn dial_timeout_secs(mut self, secs: u64) -> Self {
        self.config.dial_timeout_secs = secs;
        self
    }

    /// 동시 연결 상한을 설정합니다.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.config.max_connections = max;
        self
    }

    /// 설정을 검증하고 `ConnectionRouterConfig`를 생성합니다.
    pub fn build(self) -> Result<ConnectionRouterConfig, RouterError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
