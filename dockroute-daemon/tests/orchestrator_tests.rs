//! Orchestrator lifecycle tests with an in-memory Docker client.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::StreamExt;

use dockroute_core::config::DockrouteConfig;
use dockroute_core::pipeline::HealthStatus;
use dockroute_core::types::{Container, Network, NetworkAttachment};
use dockroute_daemon::orchestrator::Orchestrator;
use dockroute_registry::{
    ContainerDetail, ContainerExec, DirectoryClient, EventStream, ExecSession, RegistryError,
};

/// 컨테이너 하나와 네트워크 하나를 보고하는 Docker
#[derive(Default)]
struct StaticDocker {
    list_calls: AtomicUsize,
}

impl StaticDocker {
    fn container() -> Container {
        let mut networks = BTreeMap::new();
        networks.insert(
            "proj_net_1".to_owned(),
            NetworkAttachment {
                network_id: "n1".to_owned(),
                ip_address: "172.20.0.5".to_owned(),
                aliases: Vec::new(),
            },
        );
        Container {
            id: "aaaa1111".to_owned(),
            names: vec!["/web1".to_owned()],
            labels: BTreeMap::new(),
            networks,
            network_mode: "proj_net_1".to_owned(),
        }
    }
}

impl DirectoryClient for StaticDocker {
    async fn list_containers(&self) -> Result<Vec<Container>, RegistryError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![Self::container()])
    }

    async fn list_networks(&self) -> Result<Vec<Network>, RegistryError> {
        Ok(vec![Network {
            id: "n1".to_owned(),
            name: "proj_net_1".to_owned(),
        }])
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, RegistryError> {
        let mut aliases = BTreeMap::new();
        aliases.insert("proj_net_1".to_owned(), vec!["web1.loc".to_owned()]);
        Ok(ContainerDetail {
            id: id.to_owned(),
            aliases,
        })
    }

    fn subscribe_events(&self) -> EventStream {
        futures::stream::pending().boxed()
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        Ok(())
    }
}

impl ContainerExec for StaticDocker {
    async fn create_exec(&self, _container_id: &str, _cmd: &[String]) -> Result<String, RegistryError> {
        Err(RegistryError::Exec("exec not available in tests".to_owned()))
    }

    async fn start_exec(&self, _exec_id: &str) -> Result<ExecSession, RegistryError> {
        Err(RegistryError::Exec("exec not available in tests".to_owned()))
    }

    async fn resize_exec(&self, _exec_id: &str, _cols: u16, _rows: u16) -> Result<(), RegistryError> {
        Ok(())
    }
}

/// 레지스트리만 켠 최소 설정
fn registry_only() -> DockrouteConfig {
    let mut config = DockrouteConfig::default();
    config.registry.network_pattern = "proj_net_[0-9]+".to_owned();
    config.registry.debounce_secs = 1;
    config.router.enabled = false;
    config
}

#[tokio::test]
async fn invalid_config_rejected_before_any_module() {
    let mut config = registry_only();
    config.registry.network_pattern = String::new();

    let err = Orchestrator::build_with_client(config, Arc::new(StaticDocker::default()))
        .err()
        .expect("empty network pattern must be rejected");

    assert!(err.to_string().contains("network_pattern"), "got: {err}");
}

#[tokio::test]
async fn enabled_modules_registered_in_start_order() {
    // Given: 모든 모듈 활성화
    let mut config = registry_only();
    config.router.enabled = true;
    config.router.host_pattern = r"^.*\.loc$".to_owned();
    config.router.listen_port = 18080;
    config.router.selected_targets = Vec::new();
    config.shell.enabled = true;
    config.admin.enabled = true;

    // When
    let orchestrator =
        Orchestrator::build_with_client(config, Arc::new(StaticDocker::default())).unwrap();

    // Then
    assert_eq!(
        orchestrator.module_names(),
        vec!["registry", "router", "shell", "admin"]
    );
}

#[tokio::test]
async fn modules_unhealthy_before_start() {
    let orchestrator =
        Orchestrator::build_with_client(registry_only(), Arc::new(StaticDocker::default()))
            .unwrap();

    let report = orchestrator.health().await;

    assert!(report.status.is_unhealthy());
    assert_eq!(report.modules.len(), 1);
    assert_eq!(report.modules[0].name, "registry");
}

#[tokio::test(start_paused = true)]
async fn run_publishes_health_refreshes_and_shuts_down() {
    // Given
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("dockroute.pid");
    let mut config = registry_only();
    config.general.pid_file = pid_file.display().to_string();

    let docker = Arc::new(StaticDocker::default());
    let mut orchestrator =
        Orchestrator::build_with_client(config, Arc::clone(&docker)).unwrap();
    let mut health = orchestrator.health_receiver();
    let refresh = orchestrator.refresh_handle();

    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let run = tokio::spawn(async move {
        orchestrator
            .run_until(async move {
                let _ = stop_rx.await;
                Ok("test")
            })
            .await
    });

    // When: 시작 완료
    health
        .wait_for(|report| report.status == HealthStatus::Healthy)
        .await
        .unwrap();

    // Then: PID 파일 생성, 초기 스냅샷 1회
    assert!(pid_file.exists());
    assert_eq!(docker.list_calls.load(Ordering::SeqCst), 1);

    // When: 수동 재구성 요청 (SIGHUP과 같은 경로)
    refresh.notify(dockroute_registry::Trigger::Manual);
    tokio::time::sleep(Duration::from_secs(2)).await;

    // Then: 디바운스 후 한 번 더 조회
    assert_eq!(docker.list_calls.load(Ordering::SeqCst), 2);

    // When: 종료
    stop_tx.send(()).unwrap();
    run.await.unwrap().unwrap();

    // Then: PID 파일 정리
    assert!(!pid_file.exists());
}

#[tokio::test]
async fn start_failure_rolls_back_and_removes_pid_file() {
    // Given: 존재하지 않는 호스트 키로 셸 브릿지 활성화
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("dockroute.pid");
    let mut config = registry_only();
    config.general.pid_file = pid_file.display().to_string();
    config.shell.enabled = true;
    config.shell.host_key_path = dir.path().join("missing_key").display().to_string();

    let mut orchestrator =
        Orchestrator::build_with_client(config, Arc::new(StaticDocker::default())).unwrap();

    // When
    let err = orchestrator
        .run_until(std::future::pending::<anyhow::Result<&'static str>>())
        .await
        .unwrap_err();

    // Then: 실패 모듈 이름, PID 파일 제거, 레지스트리는 롤백으로 정지
    assert!(err.to_string().contains("shell"), "got: {err}");
    assert!(!pid_file.exists());
    let report = orchestrator.health().await;
    assert!(report.modules.iter().all(|m| !m.status.is_healthy()));
}
