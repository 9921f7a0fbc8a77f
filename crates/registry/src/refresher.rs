//! 레지스트리 재구성 -- Docker 상태를 조회해 새 스냅샷을 게시
//!
//! [`Refresher`]는 한 번에 하나의 재구성만 실행합니다. 재구성 중에 들어온
//! 요청들은 하나의 후속 재구성으로 합쳐지고, 이미 처리된 요청은
//! [`RefreshOutcome::Coalesced`]를 반환합니다.
//!
//! 조회 실패 시 재구성은 중단되고 이전 스냅샷이 그대로 유지됩니다.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use regex::Regex;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use dockroute_core::metrics as m;
use dockroute_core::types::{Network, Snapshot};

use crate::docker::DirectoryClient;
use crate::error::RegistryError;
use crate::snapshot::SnapshotStore;

/// 재구성 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// 새 스냅샷을 게시함
    Rebuilt {
        /// 게시된 스냅샷 버전
        version: u64,
        /// 컨테이너 수
        containers: usize,
        /// 필터링된 네트워크 수
        networks: usize,
    },
    /// 진행 중이던 재구성이 이 요청을 이미 반영함
    Coalesced,
}

/// 스냅샷 재구성기
pub struct Refresher<D: DirectoryClient> {
    docker: Arc<D>,
    network_pattern: Regex,
    query_timeout: Duration,
    store: SnapshotStore,
    /// 재구성 직렬화 (tokio Mutex는 FIFO 공정성을 보장)
    gate: Mutex<()>,
    /// 아직 반영되지 않은 요청이 있음
    pending: AtomicBool,
}

impl<D: DirectoryClient> Refresher<D> {
    /// 새 재구성기를 생성합니다.
    pub fn new(
        docker: Arc<D>,
        network_pattern: &str,
        query_timeout: Duration,
        store: SnapshotStore,
    ) -> Result<Self, RegistryError> {
        let network_pattern = Regex::new(network_pattern).map_err(|e| RegistryError::Config {
            field: "network_pattern".to_owned(),
            reason: format!("invalid regex: {e}"),
        })?;
        Ok(Self {
            docker,
            network_pattern,
            query_timeout,
            store,
            gate: Mutex::new(()),
            pending: AtomicBool::new(false),
        })
    }

    /// 스냅샷 저장소
    pub fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// 스냅샷을 재구성합니다.
    ///
    /// 실패하면 이전 스냅샷이 유지되고 에러가 반환됩니다. 재시도는 하지 않습니다.
    pub async fn refresh(&self) -> Result<RefreshOutcome, RegistryError> {
        self.pending.store(true, Ordering::SeqCst);
        let _gate = self.gate.lock().await;

        if !self.pending.swap(false, Ordering::SeqCst) {
            debug!("refresh request already covered by previous rebuild");
            counter!(m::REGISTRY_REFRESH_TOTAL, m::LABEL_RESULT => "coalesced").increment(1);
            return Ok(RefreshOutcome::Coalesced);
        }

        let started = Instant::now();
        let result = self.rebuild().await;
        histogram!(m::REGISTRY_REFRESH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        match &result {
            Ok(RefreshOutcome::Rebuilt {
                version,
                containers,
                networks,
            }) => {
                counter!(m::REGISTRY_REFRESH_TOTAL, m::LABEL_RESULT => "success").increment(1);
                info!(
                    version,
                    containers,
                    networks,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "registry snapshot rebuilt"
                );
            }
            Ok(RefreshOutcome::Coalesced) => {}
            Err(e) => {
                counter!(m::REGISTRY_REFRESH_TOTAL, m::LABEL_RESULT => "failure").increment(1);
                warn!(
                    error = %e,
                    version = self.store.current().version,
                    "registry refresh failed, keeping previous snapshot"
                );
            }
        }
        result
    }

    async fn rebuild(&self) -> Result<RefreshOutcome, RegistryError> {
        let listed = self
            .bounded("list containers", self.docker.list_containers())
            .await?;
        let all_networks = self
            .bounded("list networks", self.docker.list_networks())
            .await?;

        let networks: Vec<Network> = all_networks
            .into_iter()
            .filter(|n| self.network_pattern.is_match(&n.name))
            .collect();
        let matched: HashSet<&str> = networks.iter().map(|n| n.name.as_str()).collect();

        let mut containers = Vec::with_capacity(listed.len());
        for mut container in listed {
            if !container
                .networks
                .keys()
                .any(|name| matched.contains(name.as_str()))
            {
                continue;
            }

            let detail = match self
                .bounded("inspect container", self.docker.inspect_container(&container.id))
                .await
            {
                Ok(detail) => detail,
                Err(RegistryError::ContainerNotFound(id)) => {
                    debug!(container_id = %id, "container vanished before inspect, skipping");
                    continue;
                }
                Err(e) => return Err(e),
            };

            for (name, attachment) in container.networks.iter_mut() {
                attachment.aliases = if matched.contains(name.as_str()) {
                    detail.aliases.get(name).cloned().unwrap_or_default()
                } else {
                    Vec::new()
                };
            }
            containers.push(container);
        }

        let version = self.store.current().version + 1;
        let snapshot = Snapshot::new(version, networks, containers);

        let ambiguous = snapshot.ambiguous_aliases();
        for (alias, owners) in &ambiguous {
            warn!(
                alias = *alias,
                containers = ?owners,
                "alias advertised by multiple containers, first listed container wins"
            );
        }
        gauge!(m::REGISTRY_AMBIGUOUS_ALIASES).set(ambiguous.len() as f64);

        let outcome = RefreshOutcome::Rebuilt {
            version,
            containers: snapshot.containers.len(),
            networks: snapshot.networks.len(),
        };
        gauge!(m::REGISTRY_CONTAINERS).set(snapshot.containers.len() as f64);
        gauge!(m::REGISTRY_NETWORKS).set(snapshot.networks.len() as f64);

        self.store.publish(snapshot);
        Ok(outcome)
    }

    async fn bounded<T>(
        &self,
        operation: &'static str,
        query: impl Future<Output = Result<T, RegistryError>>,
    ) -> Result<T, RegistryError> {
        tokio::time::timeout(self.query_timeout, query)
            .await
            .map_err(|_| RegistryError::Timeout {
                operation,
                secs: self.query_timeout.as_secs(),
            })?
    }
}
