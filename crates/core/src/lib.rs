#![doc = include_str!("../README.md")]

pub mod config;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod types;

// --- 주요 타입 re-export ---

// 에러
pub use error::{
    ConfigError, DirectoryError, DockrouteError, PipelineError, RoutingError, SessionError,
};

// 설정
pub use config::DockrouteConfig;

// 생명주기
pub use pipeline::{BoxFuture, DynPipeline, HealthStatus, Pipeline};

// 도메인 타입
pub use types::{Container, Network, NetworkAttachment, Snapshot};
