//! 라우터 에러 타입
//!
//! 연결 단위 에러는 연결을 닫고 메트릭 레이블([`RouterError::reason`])로 기록됩니다.
//! 리스너 바인드 실패와 설정 에러만 모듈 시작을 실패시킵니다.

use dockroute_core::error::{ConfigError, DockrouteError, RoutingError};

use crate::sniff::SniffError;

/// 라우터 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// 리스너 바인드 실패
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// 바인드 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// 백엔드 연결 실패
    #[error("failed to dial {addr}: {reason}")]
    Dial {
        /// 백엔드 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// 라우팅 키 추출 실패
    #[error("sniff failed: {0}")]
    Sniff(#[from] SniffError),

    /// 라우팅 키가 호스트 패턴과 일치하지 않음
    #[error("host {0} does not match host pattern")]
    HostMismatch(String),

    /// 일치하는 별칭이 없음
    #[error("no container alias matches {0}")]
    NoRoute(String),

    /// 선택 대상에 컨테이너가 지정되지 않았거나 주소가 없음
    #[error("no backend pinned for port {0}")]
    NoTarget(u16),

    /// 릴레이 I/O 실패
    #[error("relay error: {0}")]
    Relay(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl RouterError {
    /// 메트릭 레이블용 거부 사유
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Dial { .. } => "dial_failed",
            Self::Sniff(e) => e.label(),
            Self::HostMismatch(_) => "host_mismatch",
            Self::NoRoute(_) => "no_route",
            Self::NoTarget(_) => "no_target",
            Self::Relay(_) => "relay",
            Self::Config { .. } => "config",
        }
    }
}

impl From<RouterError> for DockrouteError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::Bind { addr, reason } => {
                DockrouteError::Routing(RoutingError::Bind { addr, reason })
            }
            RouterError::Dial { addr, reason } => {
                DockrouteError::Routing(RoutingError::Dial { addr, reason })
            }
            RouterError::Sniff(e) => DockrouteError::Routing(RoutingError::Sniff(e.to_string())),
            RouterError::Config { field, reason } => {
                DockrouteError::Config(ConfigError::InvalidValue { field, reason })
            }
            other => DockrouteError::Routing(RoutingError::Unroutable(other.to_string())),
        }
    }
}
