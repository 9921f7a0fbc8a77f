//! 에러 타입 -- 도메인별 에러 정의
//!
//! 각 크레이트는 자체 에러 타입(`RegistryError`, `RouterError`, `ShellBridgeError`)을
//! 정의하고 `From` 구현으로 [`DockrouteError`]로 변환합니다.

/// dockroute 최상위 에러 타입
#[derive(Debug, thiserror::Error)]
pub enum DockrouteError {
    /// 설정 관련 에러
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// 모듈 생명주기 에러
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    /// Docker 디렉토리(컨테이너/네트워크 조회) 에러
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// 연결 라우팅 에러
    #[error("routing error: {0}")]
    Routing(#[from] RoutingError),

    /// 셸 세션 에러
    #[error("session error: {0}")]
    Session(#[from] SessionError),

    /// I/O 에러
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// 설정 관련 에러
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// 설정 파일을 찾을 수 없음
    #[error("config file not found: {path}")]
    FileNotFound { path: String },

    /// 설정 파싱 실패
    #[error("failed to parse config: {reason}")]
    ParseFailed { reason: String },

    /// 유효하지 않은 설정 값
    #[error("invalid config value for '{field}': {reason}")]
    InvalidValue { field: String, reason: String },
}

/// 모듈 생명주기 에러
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// 채널 전송 실패
    #[error("channel send failed: {0}")]
    ChannelSend(String),

    /// 모듈 초기화 실패
    #[error("pipeline init failed: {0}")]
    InitFailed(String),

    /// 이미 실행 중
    #[error("pipeline already running")]
    AlreadyRunning,

    /// 실행 중이 아님
    #[error("pipeline not running")]
    NotRunning,
}

/// Docker 디렉토리 에러
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    /// Docker API 호출 실패
    #[error("docker api error: {0}")]
    Api(String),

    /// 컨테이너를 찾을 수 없음
    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// 선택 대상(selected target)이 등록되지 않음
    #[error("selected target not found: {0}")]
    TargetNotFound(String),
}

/// 연결 라우팅 에러
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    /// 리스너 바인드 실패
    #[error("failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// 백엔드 연결 실패
    #[error("failed to dial {addr}: {reason}")]
    Dial { addr: String, reason: String },

    /// 라우팅 키 추출 실패
    #[error("sniff failed: {0}")]
    Sniff(String),

    /// 백엔드를 결정할 수 없음 (별칭 없음, 주소 없음, 대상 미지정)
    #[error("no backend: {0}")]
    Unroutable(String),
}

/// 셸 세션 에러
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// 호스트 키 로딩 실패
    #[error("host key error: {path}: {reason}")]
    HostKey { path: String, reason: String },

    /// SSH 프로토콜 에러
    #[error("ssh protocol error: {0}")]
    Protocol(String),

    /// 컨테이너 exec 실패
    #[error("exec failed: {0}")]
    Exec(String),
}
