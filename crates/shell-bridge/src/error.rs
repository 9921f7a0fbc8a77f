//! 셸 브릿지 에러 타입
//!
//! 세션 단위 에러는 메시지와 종료 상태로 세션을 끝낼 뿐 리스너에는 영향을 주지 않습니다.
//! 호스트 키 로딩, 바인드, 설정 에러만 모듈 시작을 실패시킵니다.

use dockroute_core::error::{ConfigError, DockrouteError, RoutingError, SessionError};
use dockroute_registry::RegistryError;

/// 셸 브릿지 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum ShellBridgeError {
    /// 호스트 키 로딩 실패
    #[error("failed to load host key {path}: {reason}")]
    HostKey {
        /// 키 파일 경로
        path: String,
        /// 실패 사유
        reason: String,
    },

    /// 리스너 바인드 실패
    #[error("failed to bind {addr}: {reason}")]
    Bind {
        /// 바인드 주소
        addr: String,
        /// 실패 사유
        reason: String,
    },

    /// SSH 프로토콜 에러
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),

    /// 컨테이너 exec 실패
    #[error("exec failed: {0}")]
    Exec(#[from] RegistryError),

    /// 클라이언트가 이미 세션을 닫음
    #[error("session closed by client")]
    SessionClosed,

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },
}

impl From<ShellBridgeError> for DockrouteError {
    fn from(err: ShellBridgeError) -> Self {
        match err {
            ShellBridgeError::HostKey { path, reason } => {
                DockrouteError::Session(SessionError::HostKey { path, reason })
            }
            ShellBridgeError::Bind { addr, reason } => {
                DockrouteError::Routing(RoutingError::Bind { addr, reason })
            }
            ShellBridgeError::Ssh(e) => DockrouteError::Session(SessionError::Protocol(e.to_string())),
            ShellBridgeError::Exec(e) => DockrouteError::Session(SessionError::Exec(e.to_string())),
            ShellBridgeError::SessionClosed => DockrouteError::Session(SessionError::Protocol(
                "session closed by client".to_owned(),
            )),
            ShellBridgeError::Config { field, reason } => {
                DockrouteError::Config(ConfigError::InvalidValue { field, reason })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_key_error_converts_to_session() {
        let err: DockrouteError = ShellBridgeError::HostKey {
            path: "/etc/dockroute/key".to_owned(),
            reason: "no such file".to_owned(),
        }
        .into();
        assert!(matches!(
            err,
            DockrouteError::Session(SessionError::HostKey { .. })
        ));
        assert!(err.to_string().contains("/etc/dockroute/key"));
    }

    #[test]
    fn exec_error_keeps_registry_message() {
        let err = ShellBridgeError::from(RegistryError::Exec("no such container".to_owned()));
        assert!(err.to_string().contains("no such container"));
        let err: DockrouteError = err.into();
        assert!(matches!(err, DockrouteError::Session(SessionError::Exec(_))));
    }

    #[test]
    fn bind_and_config_errors() {
        let err: DockrouteError = ShellBridgeError::Bind {
            addr: "0.0.0.0:2222".to_owned(),
            reason: "address in use".to_owned(),
        }
        .into();
        assert!(matches!(err, DockrouteError::Routing(RoutingError::Bind { .. })));

        let err: DockrouteError = ShellBridgeError::Config {
            field: "command".to_owned(),
            reason: "must not be empty".to_owned(),
        }
        .into();
        assert!(matches!(err, DockrouteError::Config(_)));
    }
}
