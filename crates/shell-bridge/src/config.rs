//! 셸 브릿지 설정
//!
//! [`ShellBridgeConfig`]는 core의 `[shell]` 섹션을 셸 브릿지 전용 설정으로 변환합니다.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use dockroute_core::config::DockrouteConfig;
use serde::{Deserialize, Serialize};

use crate::error::ShellBridgeError;

/// 셸 브릿지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShellBridgeConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// SSH 리스너 바인드 주소
    pub listen_addr: String,
    /// SSH 리스닝 포트
    pub port: u16,
    /// 호스트 키 파일 경로
    pub host_key_path: String,
    /// 컨테이너 안에서 실행할 명령
    pub command: Vec<String>,
    /// 비활성 세션 종료 시간 (초, 0 = 제한 없음)
    pub inactivity_timeout_secs: u64,
}

impl Default for ShellBridgeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "0.0.0.0".to_owned(),
            port: 2222,
            host_key_path: "/etc/dockroute/ssh_host_ed25519_key".to_owned(),
            command: vec!["sh".to_owned()],
            inactivity_timeout_secs: 3600,
        }
    }
}

impl ShellBridgeConfig {
    /// core 설정에서 셸 브릿지 설정을 생성합니다.
    pub fn from_core(core: &DockrouteConfig) -> Self {
        let shell = &core.shell;
        Self {
            enabled: shell.enabled,
            listen_addr: shell.listen_addr.clone(),
            port: shell.port,
            host_key_path: shell.host_key_path.clone(),
            command: shell.command.clone(),
            inactivity_timeout_secs: shell.inactivity_timeout_secs,
        }
    }

    /// 리스너 주소
    pub fn socket_addr(&self) -> Result<SocketAddr, ShellBridgeError> {
        let ip: IpAddr = self
            .listen_addr
            .parse()
            .map_err(|e| config_err("listen_addr", format!("invalid ip address: {e}")))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// 비활성 타임아웃. 0이면 `None`.
    pub fn inactivity_timeout(&self) -> Option<Duration> {
        (self.inactivity_timeout_secs > 0).then(|| Duration::from_secs(self.inactivity_timeout_secs))
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), ShellBridgeError> {
        self.socket_addr()?;

        if self.host_key_path.is_empty() {
            return Err(config_err("host_key_path", "must not be empty"));
        }
        match self.command.first() {
            Some(program) if !program.is_empty() => {}
            _ => return Err(config_err("command", "must contain a program")),
        }

        Ok(())
    }
}

fn config_err(field: &str, reason: impl Into<String>) -> ShellBridgeError {
    ShellBridgeError::Config {
        field: field.to_owned(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ShellBridgeConfig::default();
        config.validate().unwrap();
        assert!(!config.enabled);
        assert_eq!(config.port, 2222);
        assert_eq!(config.command, vec!["sh"]);
    }

    #[test]
    fn from_core_copies_shell_section() {
        let mut core = DockrouteConfig::default();
        core.shell.enabled = true;
        core.shell.port = 2022;
        core.shell.command = vec!["bash".to_owned(), "-l".to_owned()];
        core.shell.inactivity_timeout_secs = 0;

        let config = ShellBridgeConfig::from_core(&core);
        assert!(config.enabled);
        assert_eq!(config.socket_addr().unwrap().port(), 2022);
        assert_eq!(config.command, vec!["bash", "-l"]);
        assert_eq!(config.inactivity_timeout(), None);
    }

    #[test]
    fn invalid_values_rejected() {
        let cases = [
            ShellBridgeConfig {
                listen_addr: "not-an-ip".to_owned(),
                ..Default::default()
            },
            ShellBridgeConfig {
                host_key_path: String::new(),
                ..Default::default()
            },
            ShellBridgeConfig {
                command: Vec::new(),
                ..Default::default()
            },
            ShellBridgeConfig {
                command: vec![String::new()],
                ..Default::default()
            },
        ];
        for config in cases {
            assert!(config.validate().is_err(), "{config:?} should be invalid");
        }
    }
}
