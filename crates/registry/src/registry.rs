//! 컨테이너 레지스트리 -- 재구성기, 디바운서, 이벤트 감시를 하나의 생명주기로 관리
//!
//! [`ContainerRegistry`]는 core의 [`Pipeline`] trait을 구현하여
//! `dockroute-daemon`에서 다른 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 내부 아키텍처
//! ```text
//! Docker events ──> watch_events ─┐
//! resync ticker ──> resync_loop ──┼─try_send─> run_debouncer ──> Refresher.refresh()
//! SIGHUP / admin ──> notify ──────┘                                   │
//!                                                      SnapshotStore.publish()
//! ```

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dockroute_core::error::{DockrouteError, PipelineError};
use dockroute_core::pipeline::{HealthStatus, Pipeline};

use crate::admin::AdminService;
use crate::config::ContainerRegistryConfig;
use crate::debounce::{DebounceHandle, Trigger, run_debouncer, trigger_channel};
use crate::docker::DirectoryClient;
use crate::error::RegistryError;
use crate::refresher::Refresher;
use crate::resolver::AliasRouter;
use crate::snapshot::{SnapshotReader, SnapshotStore};
use crate::targets::SelectedTargetRegistry;
use crate::watcher::{resync_loop, watch_events};

/// 레지스트리 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RegistryState {
    Initialized,
    Running,
    Stopped,
}

/// 컨테이너 레지스트리
///
/// # 사용 예시
/// ```ignore
/// use dockroute_registry::{BollardDirectoryClient, ContainerRegistryBuilder};
///
/// let mut registry = ContainerRegistryBuilder::new()
///     .config(config)
///     .docker_client(Arc::new(BollardDirectoryClient::connect_local()?))
///     .build()?;
///
/// let router = registry.alias_router();
/// registry.start().await?;
/// ```
pub struct ContainerRegistry<D: DirectoryClient> {
    config: ContainerRegistryConfig,
    state: RegistryState,
    docker: Arc<D>,
    refresher: Arc<Refresher<D>>,
    targets: Arc<SelectedTargetRegistry>,
    trigger: DebounceHandle,
    trigger_rx: Option<mpsc::Receiver<Trigger>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<D: DirectoryClient> ContainerRegistry<D> {
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            RegistryState::Initialized => "initialized",
            RegistryState::Running => "running",
            RegistryState::Stopped => "stopped",
        }
    }

    /// 레지스트리 설정
    pub fn config(&self) -> &ContainerRegistryConfig {
        &self.config
    }

    /// Docker 클라이언트 (셸 브릿지와 공유)
    pub fn docker(&self) -> Arc<D> {
        Arc::clone(&self.docker)
    }

    /// 스냅샷 저장소
    pub fn store(&self) -> &SnapshotStore {
        self.refresher.store()
    }

    /// 스냅샷 reader
    pub fn reader(&self) -> SnapshotReader {
        self.store().reader()
    }

    /// 별칭 라우터
    pub fn alias_router(&self) -> AliasRouter {
        AliasRouter::new(self.reader())
    }

    /// 선택 대상 레지스트리
    pub fn targets(&self) -> Arc<SelectedTargetRegistry> {
        Arc::clone(&self.targets)
    }

    /// 관리 서비스
    pub fn admin(&self) -> AdminService {
        AdminService::new(self.reader(), self.targets())
    }

    /// 재구성기
    pub fn refresher(&self) -> Arc<Refresher<D>> {
        Arc::clone(&self.refresher)
    }

    /// 디바운서 트리거 핸들
    pub fn trigger_handle(&self) -> DebounceHandle {
        self.trigger.clone()
    }
}

impl<D: DirectoryClient> Pipeline for ContainerRegistry<D> {
    async fn start(&mut self) -> Result<(), DockrouteError> {
        if self.state == RegistryState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }

        info!(
            network_pattern = %self.config.network_pattern,
            debounce_secs = self.config.debounce_secs,
            "starting container registry"
        );

        // 1. Docker 연결 확인
        if let Err(e) = self.docker.ping().await {
            warn!(error = %e, "docker daemon not available, registry will run in degraded mode");
        }

        // 2. 디바운서
        let trigger_rx = self.trigger_rx.take().ok_or_else(|| {
            DockrouteError::Pipeline(PipelineError::InitFailed(
                "trigger receiver already consumed, rebuild the registry to restart".to_owned(),
            ))
        })?;

        let refresher = Arc::clone(&self.refresher);
        self.tasks.push(tokio::spawn(run_debouncer(
            trigger_rx,
            self.config.debounce_window(),
            self.cancel.clone(),
            move || {
                let refresher = Arc::clone(&refresher);
                async move {
                    // 실패는 Refresher가 기록함
                    if let Ok(outcome) = refresher.refresh().await {
                        debug!(?outcome, "debounced refresh finished");
                    }
                }
            },
        )));

        // 3. 이벤트 구독은 초기 스냅샷보다 먼저. 그 사이 이벤트는 디바운스된 재구성으로 반영됨
        let events = self.docker.subscribe_events();
        self.tasks.push(tokio::spawn(watch_events(
            Arc::clone(&self.docker),
            events,
            self.trigger.clone(),
            self.config.event_reconnect(),
            self.cancel.clone(),
        )));

        // 4. 초기 스냅샷 구성 (실패해도 이벤트/재동기화로 재시도)
        if let Err(e) = self.refresher.refresh().await {
            warn!(error = %e, "initial registry snapshot failed, waiting for next trigger");
        }

        // 5. 주기적 재동기화 (선택)
        if let Some(interval) = self.config.resync_interval() {
            self.tasks.push(tokio::spawn(resync_loop(
                self.trigger.clone(),
                interval,
                self.cancel.clone(),
            )));
        }

        self.state = RegistryState::Running;
        info!(tasks = self.tasks.len(), "container registry started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DockrouteError> {
        if self.state != RegistryState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping container registry");
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }

        self.state = RegistryState::Stopped;
        info!("container registry stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            RegistryState::Running => {
                if self.docker.ping().await.is_err() {
                    HealthStatus::Degraded("docker daemon not reachable".to_owned())
                } else if self.store().current().version == 0 {
                    HealthStatus::Degraded("no snapshot built yet".to_owned())
                } else {
                    HealthStatus::Healthy
                }
            }
            RegistryState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            RegistryState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

/// 컨테이너 레지스트리 빌더
pub struct ContainerRegistryBuilder<D: DirectoryClient> {
    config: ContainerRegistryConfig,
    docker: Option<Arc<D>>,
    targets: Option<Arc<SelectedTargetRegistry>>,
}

impl<D: DirectoryClient> ContainerRegistryBuilder<D> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ContainerRegistryConfig::default(),
            docker: None,
            targets: None,
        }
    }

    /// 레지스트리 설정을 지정합니다.
    pub fn config(mut self, config: ContainerRegistryConfig) -> Self {
        self.config = config;
        self
    }

    /// Docker 클라이언트를 설정합니다.
    pub fn docker_client(mut self, docker: Arc<D>) -> Self {
        self.docker = Some(docker);
        self
    }

    /// 외부에서 만든 선택 대상 레지스트리를 사용합니다.
    ///
    /// 설정하지 않으면 설정의 `selected_targets`로 새로 만듭니다.
    pub fn targets(mut self, targets: Arc<SelectedTargetRegistry>) -> Self {
        self.targets = Some(targets);
        self
    }

    /// 레지스트리를 빌드합니다.
    pub fn build(self) -> Result<ContainerRegistry<D>, RegistryError> {
        self.config.validate()?;

        let docker = self.docker.ok_or_else(|| RegistryError::Config {
            field: "docker_client".to_owned(),
            reason: "docker client must be provided".to_owned(),
        })?;

        let refresher = Refresher::new(
            Arc::clone(&docker),
            &self.config.network_pattern,
            self.config.query_timeout(),
            SnapshotStore::new(),
        )?;

        let targets = self.targets.unwrap_or_else(|| {
            Arc::new(SelectedTargetRegistry::from_config(
                &self.config.selected_targets,
            ))
        });

        let (trigger, trigger_rx) = trigger_channel(self.config.trigger_channel_capacity);

        Ok(ContainerRegistry {
            config: self.config,
            state: RegistryState::Initialized,
            docker,
            refresher: Arc::new(refresher),
            targets,
            trigger,
            trigger_rx: Some(trigger_rx),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }
}

impl<D: DirectoryClient> Default for ContainerRegistryBuilder<D> {
    fn default() -> Self {
        Self::new()
    }
}
