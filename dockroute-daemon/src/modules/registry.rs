//! Container registry module initialization.
//!
//! The registry is always enabled: every other module reads its snapshots.
//! Besides the [`ModuleHandle`], init returns the shared read handles the
//! router, shell bridge and dashboard are wired with.

use std::sync::Arc;

use anyhow::Result;

use dockroute_core::config::DockrouteConfig;
use dockroute_registry::{
    AdminService, AliasRouter, ContainerRegistryBuilder, ContainerRegistryConfig, DebounceHandle,
    DirectoryClient, SelectedTargetRegistry, SnapshotReader,
};

use super::ModuleHandle;

/// 다른 모듈과 공유하는 레지스트리 핸들
pub struct RegistryHandles<D> {
    /// Docker 클라이언트 (셸 브릿지의 exec에도 사용)
    pub docker: Arc<D>,
    /// 스냅샷 reader
    pub reader: SnapshotReader,
    /// 별칭 라우터
    pub alias_router: AliasRouter,
    /// 선택 대상 레지스트리
    pub targets: Arc<SelectedTargetRegistry>,
    /// 관리 서비스
    pub admin: AdminService,
    /// 디바운서 트리거 (SIGHUP 수동 재구성)
    pub trigger: DebounceHandle,
}

/// Initialize the container registry module.
///
/// # Errors
///
/// Invalid network pattern or registry settings.
pub fn init<D: DirectoryClient>(
    config: &DockrouteConfig,
    docker: Arc<D>,
) -> Result<(ModuleHandle, RegistryHandles<D>)> {
    tracing::info!(
        network_pattern = %config.registry.network_pattern,
        "initializing container registry"
    );

    let registry = ContainerRegistryBuilder::new()
        .config(ContainerRegistryConfig::from_core(config))
        .docker_client(docker)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build container registry: {}", e))?;

    let handles = RegistryHandles {
        docker: registry.docker(),
        reader: registry.reader(),
        alias_router: registry.alias_router(),
        targets: registry.targets(),
        admin: registry.admin(),
        trigger: registry.trigger_handle(),
    };

    Ok((
        ModuleHandle::new("registry", true, Box::new(registry)),
        handles,
    ))
}
