//! 레지스트리 에러 타입
//!
//! [`RegistryError`]는 레지스트리 내부에서 발생하는 모든 에러를 표현합니다.
//! `From<RegistryError> for DockrouteError` 변환이 구현되어 있어
//! 상위 레이어에서 `?` 연산자로 자연스럽게 전파할 수 있습니다.

use dockroute_core::error::{ConfigError, DirectoryError, DockrouteError, PipelineError};

/// 레지스트리 도메인 에러
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Docker API 호출 실패
    #[error("docker api error: {0}")]
    DockerApi(String),

    /// Docker 소켓 연결 실패
    #[error("docker connection error: {0}")]
    DockerConnection(String),

    /// 디렉토리 조회 타임아웃
    #[error("{operation} timed out after {secs}s")]
    Timeout {
        /// 조회 종류 (예: `list containers`)
        operation: &'static str,
        /// 타임아웃 (초)
        secs: u64,
    },

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// 선택 대상이 등록되지 않음
    #[error("selected target not found: {0}")]
    TargetNotFound(String),

    /// exec 생성/시작/리사이즈 실패
    #[error("exec error: {0}")]
    Exec(String),

    /// 설정 에러
    #[error("config error: {field}: {reason}")]
    Config {
        /// 설정 필드명
        field: String,
        /// 에러 사유
        reason: String,
    },

    /// 채널 통신 에러
    #[error("channel error: {0}")]
    Channel(String),
}

impl From<RegistryError> for DockrouteError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::ContainerNotFound(id) => {
                DockrouteError::Directory(DirectoryError::ContainerNotFound(id))
            }
            RegistryError::TargetNotFound(key) => {
                DockrouteError::Directory(DirectoryError::TargetNotFound(key))
            }
            RegistryError::Config { field, reason } => {
                DockrouteError::Config(ConfigError::InvalidValue { field, reason })
            }
            RegistryError::Channel(msg) => DockrouteError::Pipeline(PipelineError::ChannelSend(msg)),
            other => DockrouteError::Directory(DirectoryError::Api(other.to_string())),
        }
    }
}
