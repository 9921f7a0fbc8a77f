//! 설정 관리 -- dockroute.toml 파싱 및 런타임 설정
//!
//! [`DockrouteConfig`]는 모든 모듈의 설정을 담는 최상위 구조체입니다.
//!
//! # 설정 로딩 우선순위
//! 1. CLI 인자 (최고 우선)
//! 2. 환경변수 (`DOCKROUTE_ROUTER_LISTEN_PORT=8080` 형식)
//! 3. 설정 파일 (`dockroute.toml`)
//! 4. 기본값 (`Default` 구현)
//!
//! # 사용 예시
//! ```no_run
//! # async fn example() -> Result<(), dockroute_core::error::DockrouteError> {
//! use dockroute_core::config::DockrouteConfig;
//!
//! // 파일에서 로드 + 환경변수 오버라이드
//! let config = DockrouteConfig::load("dockroute.toml").await?;
//!
//! // TOML 문자열에서 직접 파싱
//! let config = DockrouteConfig::parse("[general]\nlog_level = \"debug\"")?;
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, DockrouteError};

/// 디렉토리 조회 타임아웃 최대값 (초)
pub const MAX_QUERY_TIMEOUT_SECS: u64 = 300;
/// 디바운스 윈도우 최대값 (초)
pub const MAX_DEBOUNCE_SECS: u64 = 3600;
/// 라우팅 키 스니핑 버퍼 최대값 (바이트)
pub const MAX_SNIFF_BYTES: usize = 64 * 1024;
/// 라우팅 키 스니핑 버퍼 최소값 (바이트)
pub const MIN_SNIFF_BYTES: usize = 64;

/// dockroute 통합 설정
///
/// `dockroute.toml` 파일의 최상위 구조를 나타냅니다.
/// 각 모듈은 자기 섹션만 읽어 사용합니다.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DockrouteConfig {
    /// 일반 설정
    #[serde(default)]
    pub general: GeneralConfig,
    /// Docker 연결 설정
    #[serde(default)]
    pub docker: DockerConfig,
    /// 레지스트리 설정
    #[serde(default)]
    pub registry: RegistryConfig,
    /// 연결 라우터 설정
    #[serde(default)]
    pub router: RouterConfig,
    /// 셸 브릿지 설정
    #[serde(default)]
    pub shell: ShellConfig,
    /// 관리 대시보드 설정
    #[serde(default)]
    pub admin: AdminConfig,
    /// Prometheus 메트릭 설정
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl DockrouteConfig {
    /// TOML 파일에서 설정을 로드하고 환경변수 오버라이드를 적용합니다.
    ///
    /// 설정 로딩 순서:
    /// 1. TOML 파일 파싱
    /// 2. 환경변수 오버라이드 적용
    /// 3. 유효성 검증
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, DockrouteError> {
        let mut config = Self::from_file(path).await?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// TOML 파일에서 설정을 로드합니다 (환경변수 오버라이드, 검증 없음).
    ///
    /// 필수 패턴은 CLI 인자로 나중에 채워질 수 있으므로 검증은 호출자가 수행합니다.
    pub async fn from_file(path: impl AsRef<Path>) -> Result<Self, DockrouteError> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                DockrouteError::Config(ConfigError::FileNotFound {
                    path: path.display().to_string(),
                })
            } else {
                DockrouteError::Io(e)
            }
        })?;
        Self::parse(&content)
    }

    /// TOML 문자열에서 설정을 파싱합니다.
    pub fn parse(toml_str: &str) -> Result<Self, DockrouteError> {
        toml::from_str(toml_str).map_err(|e| {
            DockrouteError::Config(ConfigError::ParseFailed {
                reason: e.to_string(),
            })
        })
    }

    /// 환경변수로 설정값을 오버라이드합니다.
    ///
    /// 환경변수 네이밍 규칙: `DOCKROUTE_{SECTION}_{FIELD}`
    /// 예: `DOCKROUTE_REGISTRY_NETWORK_PATTERN=proj_net_[0-9]+`
    pub fn apply_env_overrides(&mut self) {
        // General
        override_string(&mut self.general.log_level, "DOCKROUTE_GENERAL_LOG_LEVEL");
        override_string(&mut self.general.log_format, "DOCKROUTE_GENERAL_LOG_FORMAT");
        override_string(&mut self.general.pid_file, "DOCKROUTE_GENERAL_PID_FILE");

        // Docker
        override_string(&mut self.docker.socket, "DOCKROUTE_DOCKER_SOCKET");
        override_u64(
            &mut self.docker.query_timeout_secs,
            "DOCKROUTE_DOCKER_QUERY_TIMEOUT_SECS",
        );

        // Registry
        override_string(
            &mut self.registry.network_pattern,
            "DOCKROUTE_REGISTRY_NETWORK_PATTERN",
        );
        override_u64(
            &mut self.registry.debounce_secs,
            "DOCKROUTE_REGISTRY_DEBOUNCE_SECS",
        );
        override_u64(
            &mut self.registry.resync_interval_secs,
            "DOCKROUTE_REGISTRY_RESYNC_INTERVAL_SECS",
        );
        override_u64(
            &mut self.registry.event_reconnect_secs,
            "DOCKROUTE_REGISTRY_EVENT_RECONNECT_SECS",
        );

        // Router
        override_bool(&mut self.router.enabled, "DOCKROUTE_ROUTER_ENABLED");
        override_string(&mut self.router.listen_addr, "DOCKROUTE_ROUTER_LISTEN_ADDR");
        override_u16(&mut self.router.listen_port, "DOCKROUTE_ROUTER_LISTEN_PORT");
        override_string(&mut self.router.host_pattern, "DOCKROUTE_ROUTER_HOST_PATTERN");
        override_u16(
            &mut self.router.backend_port,
            "DOCKROUTE_ROUTER_BACKEND_PORT",
        );
        override_u64(
            &mut self.router.sniff_timeout_secs,
            "DOCKROUTE_ROUTER_SNIFF_TIMEOUT_SECS",
        );
        override_usize(
            &mut self.router.sniff_max_bytes,
            "DOCKROUTE_ROUTER_SNIFF_MAX_BYTES",
        );
        override_u64(
            &mut self.router.dial_timeout_secs,
            "DOCKROUTE_ROUTER_DIAL_TIMEOUT_SECS",
        );
        override_usize(
            &mut self.router.max_connections,
            "DOCKROUTE_ROUTER_MAX_CONNECTIONS",
        );

        // Shell
        override_bool(&mut self.shell.enabled, "DOCKROUTE_SHELL_ENABLED");
        override_string(&mut self.shell.listen_addr, "DOCKROUTE_SHELL_LISTEN_ADDR");
        override_u16(&mut self.shell.port, "DOCKROUTE_SHELL_PORT");
        override_string(
            &mut self.shell.host_key_path,
            "DOCKROUTE_SHELL_HOST_KEY_PATH",
        );
        override_csv(&mut self.shell.command, "DOCKROUTE_SHELL_COMMAND");
        override_u64(
            &mut self.shell.inactivity_timeout_secs,
            "DOCKROUTE_SHELL_INACTIVITY_TIMEOUT_SECS",
        );

        // Admin
        override_bool(&mut self.admin.enabled, "DOCKROUTE_ADMIN_ENABLED");
        override_string(&mut self.admin.listen_addr, "DOCKROUTE_ADMIN_LISTEN_ADDR");

        // Metrics
        override_bool(&mut self.metrics.enabled, "DOCKROUTE_METRICS_ENABLED");
        override_string(
            &mut self.metrics.listen_addr,
            "DOCKROUTE_METRICS_LISTEN_ADDR",
        );
        override_u16(&mut self.metrics.port, "DOCKROUTE_METRICS_PORT");
    }

    /// 설정값의 유효성을 검증합니다.
    pub fn validate(&self) -> Result<(), DockrouteError> {
        // log_level 검증
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.general.log_level.as_str()) {
            return Err(invalid(
                "general.log_level",
                format!("must be one of: {}", valid_levels.join(", ")),
            ));
        }

        // log_format 검증
        let valid_formats = ["json", "pretty"];
        if !valid_formats.contains(&self.general.log_format.as_str()) {
            return Err(invalid(
                "general.log_format",
                format!("must be one of: {}", valid_formats.join(", ")),
            ));
        }

        if self.docker.socket.is_empty() {
            return Err(invalid("docker.socket", "must not be empty"));
        }
        check_range(
            "docker.query_timeout_secs",
            self.docker.query_timeout_secs,
            1,
            MAX_QUERY_TIMEOUT_SECS,
        )?;

        // 네트워크 패턴은 레지스트리 필수값
        check_pattern("registry.network_pattern", &self.registry.network_pattern)?;
        check_range(
            "registry.debounce_secs",
            self.registry.debounce_secs,
            1,
            MAX_DEBOUNCE_SECS,
        )?;
        check_range(
            "registry.event_reconnect_secs",
            self.registry.event_reconnect_secs,
            1,
            MAX_DEBOUNCE_SECS,
        )?;

        if self.router.enabled {
            self.validate_router()?;
        }

        if self.shell.enabled {
            if self.shell.host_key_path.is_empty() {
                return Err(invalid(
                    "shell.host_key_path",
                    "must not be empty when shell is enabled",
                ));
            }
            if self.shell.command.is_empty() || self.shell.command[0].is_empty() {
                return Err(invalid("shell.command", "must contain a program"));
            }
            if self.shell.port == 0 {
                return Err(invalid("shell.port", "must not be 0"));
            }
        }

        if self.admin.enabled && self.admin.listen_addr.is_empty() {
            return Err(invalid("admin.listen_addr", "must not be empty"));
        }

        self.validate_port_uniqueness()
    }

    fn validate_router(&self) -> Result<(), DockrouteError> {
        check_pattern("router.host_pattern", &self.router.host_pattern)?;
        if self.router.listen_port == 0 {
            return Err(invalid("router.listen_port", "must not be 0"));
        }
        if self.router.backend_port == 0 {
            return Err(invalid("router.backend_port", "must not be 0"));
        }
        check_range(
            "router.sniff_timeout_secs",
            self.router.sniff_timeout_secs,
            1,
            MAX_QUERY_TIMEOUT_SECS,
        )?;
        check_range(
            "router.dial_timeout_secs",
            self.router.dial_timeout_secs,
            1,
            MAX_QUERY_TIMEOUT_SECS,
        )?;
        if self.router.sniff_max_bytes < MIN_SNIFF_BYTES
            || self.router.sniff_max_bytes > MAX_SNIFF_BYTES
        {
            return Err(invalid(
                "router.sniff_max_bytes",
                format!("must be between {MIN_SNIFF_BYTES} and {MAX_SNIFF_BYTES}"),
            ));
        }

        let mut names = HashSet::new();
        for target in &self.router.selected_targets {
            if target.name.is_empty() {
                return Err(invalid("router.selected_targets.name", "must not be empty"));
            }
            if !names.insert(target.name.as_str()) {
                return Err(invalid(
                    "router.selected_targets.name",
                    format!("duplicate target name '{}'", target.name),
                ));
            }
            if target.port == 0 || target.backend_port() == 0 {
                return Err(invalid(
                    "router.selected_targets.port",
                    format!("target '{}' must use a non-zero port", target.name),
                ));
            }
        }
        Ok(())
    }

    /// 같은 주소를 두 리스너가 점유하지 않는지 확인합니다.
    fn validate_port_uniqueness(&self) -> Result<(), DockrouteError> {
        let mut seen: HashSet<u16> = HashSet::new();
        let mut claim = |port: u16, owner: &str| -> Result<(), DockrouteError> {
            if seen.insert(port) {
                Ok(())
            } else {
                Err(invalid(owner, format!("port {port} is already used by another listener")))
            }
        };

        if self.router.enabled {
            claim(self.router.listen_port, "router.listen_port")?;
            for target in &self.router.selected_targets {
                claim(target.port, "router.selected_targets.port")?;
            }
        }
        if self.shell.enabled {
            claim(self.shell.port, "shell.port")?;
        }
        if self.metrics.enabled {
            claim(self.metrics.port, "metrics.port")?;
        }
        Ok(())
    }
}

/// 일반 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// 로그 레벨 (trace, debug, info, warn, error)
    pub log_level: String,
    /// 로그 형식 (json, pretty)
    pub log_format: String,
    /// PID 파일 경로 (빈 문자열이면 생성하지 않음)
    pub pid_file: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_owned(),
            log_format: "json".to_owned(),
            pid_file: String::new(),
        }
    }
}

/// Docker 연결 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DockerConfig {
    /// Docker 소켓 경로
    pub socket: String,
    /// 디렉토리 조회(목록/상세) 타임아웃 (초)
    pub query_timeout_secs: u64,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            socket: "/var/run/docker.sock".to_owned(),
            query_timeout_secs: 10,
        }
    }
}

/// 레지스트리 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 네트워크 이름 필터 정규식 (필수)
    pub network_pattern: String,
    /// 디바운스 윈도우 (초)
    pub debounce_secs: u64,
    /// 주기적 재동기화 간격 (초, 0 = 비활성화)
    pub resync_interval_secs: u64,
    /// 이벤트 스트림 재연결 대기 (초)
    pub event_reconnect_secs: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            network_pattern: String::new(),
            debounce_secs: 10,
            resync_interval_secs: 0,
            event_reconnect_secs: 5,
        }
    }
}

/// 연결 라우터 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 리스너 바인드 주소 (호스트 라우팅, 선택 대상 공통)
    pub listen_addr: String,
    /// 호스트 라우팅 리스닝 포트
    pub listen_port: u16,
    /// Host/SNI 허용 정규식 (필수)
    pub host_pattern: String,
    /// 호스트 라우팅 시 컨테이너에 연결할 포트
    pub backend_port: u16,
    /// 라우팅 키 스니핑 읽기 제한 시간 (초)
    pub sniff_timeout_secs: u64,
    /// 라우팅 키 스니핑 버퍼 상한 (바이트)
    pub sniff_max_bytes: usize,
    /// 백엔드 연결 타임아웃 (초)
    pub dial_timeout_secs: u64,
    /// 동시 연결 상한 (0 = 무제한)
    pub max_connections: usize,
    /// 포트 기반 선택 대상 목록
    pub selected_targets: Vec<SelectedTargetConfig>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "0.0.0.0".to_owned(),
            listen_port: 80,
            host_pattern: String::new(),
            backend_port: 80,
            sniff_timeout_secs: 5,
            sniff_max_bytes: 4096,
            dial_timeout_secs: 5,
            max_connections: 0,
            selected_targets: SelectedTargetConfig::defaults(),
        }
    }
}

/// 선택 대상 설정 (서비스 이름 + 리스닝 포트)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedTargetConfig {
    /// 논리 서비스 이름 (예: `postgres`)
    pub name: String,
    /// 리스닝 포트
    pub port: u16,
    /// 컨테이너에 연결할 포트 (생략 시 `port`와 동일)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend_port: Option<u16>,
}

impl SelectedTargetConfig {
    /// 이름과 포트로 생성합니다 (백엔드 포트 = 리스닝 포트).
    pub fn new(name: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            backend_port: None,
        }
    }

    /// 실제 연결할 백엔드 포트
    pub fn backend_port(&self) -> u16 {
        self.backend_port.unwrap_or(self.port)
    }

    /// 기본 선택 대상: ssh, postgres, mysql, mongodb
    pub fn defaults() -> Vec<Self> {
        vec![
            Self::new("ssh", 22),
            Self::new("postgres", 5432),
            Self::new("mysql", 3306),
            Self::new("mongodb", 27018),
        ]
    }
}

/// 셸 브릿지 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShellConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// SSH 리스너 바인드 주소
    pub listen_addr: String,
    /// SSH 리스닝 포트
    pub port: u16,
    /// 호스트 키 파일 경로 (OpenSSH 형식)
    pub host_key_path: String,
    /// 컨테이너 안에서 실행할 명령
    pub command: Vec<String>,
    /// 비활성 세션 종료 시간 (초, 0 = 제한 없음)
    pub inactivity_timeout_secs: u64,
}

impl Default for ShellConfig {
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

/// 관리 대시보드 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// HTTP 바인드 주소 (`ip:port`)
    pub listen_addr: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1:8080".to_owned(),
        }
    }
}

/// Prometheus 메트릭 설정
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// 활성화 여부
    pub enabled: bool,
    /// 바인드 주소
    pub listen_addr: String,
    /// 포트
    pub port: u16,
    /// 스크레이프 경로 (현재 `/metrics`만 지원)
    pub endpoint: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            listen_addr: "127.0.0.1".to_owned(),
            port: 9100,
            endpoint: "/metrics".to_owned(),
        }
    }
}

// --- 검증 헬퍼 ---

fn invalid(field: &str, reason: impl Into<String>) -> DockrouteError {
    ConfigError::InvalidValue {
        field: field.to_owned(),
        reason: reason.into(),
    }
    .into()
}

fn check_pattern(field: &str, pattern: &str) -> Result<(), DockrouteError> {
    if pattern.is_empty() {
        return Err(invalid(field, "must not be empty"));
    }
    regex::Regex::new(pattern)
        .map(|_| ())
        .map_err(|e| invalid(field, format!("invalid regex: {e}")))
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), DockrouteError> {
    if value < min || value > max {
        return Err(invalid(field, format!("must be between {min} and {max}")));
    }
    Ok(())
}

// --- 환경변수 오버라이드 헬퍼 ---

fn override_string(target: &mut String, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val;
    }
}

fn override_bool(target: &mut bool, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<bool>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse bool from env var, ignoring"
            ),
        }
    }
}

fn override_u16(target: &mut u16, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u16>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u16 from env var, ignoring"
            ),
        }
    }
}

fn override_usize(target: &mut usize, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<usize>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse usize from env var, ignoring"
            ),
        }
    }
}

fn override_u64(target: &mut u64, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        match val.parse::<u64>() {
            Ok(parsed) => *target = parsed,
            Err(_) => warn!(
                env_key,
                value = val.as_str(),
                "failed to parse u64 from env var, ignoring"
            ),
        }
    }
}

fn override_csv(target: &mut Vec<String>, env_key: &str) {
    if let Ok(val) = std::env::var(env_key) {
        *target = val
            .split(',')
            .map(|s| s.trim().to_owned())
            .filter(|s| !s.is_empty())
            .collect();
    }
}
