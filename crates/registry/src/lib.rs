#![doc = include_str!("../README.md")]

pub mod admin;
pub mod config;
pub mod debounce;
pub mod docker;
pub mod error;
pub mod refresher;
pub mod registry;
pub mod resolver;
pub mod snapshot;
pub mod targets;
pub mod watcher;

// 레지스트리
pub use registry::{ContainerRegistry, ContainerRegistryBuilder};

// 설정
pub use config::{ContainerRegistryConfig, ContainerRegistryConfigBuilder};

// 에러
pub use error::RegistryError;

// Docker
pub use docker::{
    BollardDirectoryClient, ContainerDetail, ContainerExec, DirectoryClient, DirectoryEvent,
    EventStream, ExecInput, ExecOutput, ExecSession,
};

// 스냅샷 / 재구성
pub use debounce::{DebounceHandle, Trigger};
pub use refresher::{RefreshOutcome, Refresher};
pub use snapshot::{SnapshotReader, SnapshotStore};

// 라우팅 / 관리
pub use admin::{AdminService, NetworkView, SnapshotSummary};
pub use resolver::{AliasRouter, ResolvedBackend, resolve_in};
pub use targets::{SelectedTarget, SelectedTargetRegistry, SelectedTargetView, TargetKey};
