//! 관리 서비스 -- 대시보드가 사용하는 조회/변경 표면
//!
//! HTTP 계층과 분리된 라이브러리 서비스입니다. 조회는 항상 현재 스냅샷을 기준으로
//! 하고, 선택 대상 변경은 [`SelectedTargetRegistry`]에 위임합니다.

use std::sync::Arc;
use std::time::UNIX_EPOCH;

use metrics::counter;
use serde::Serialize;

use dockroute_core::metrics as m;
use dockroute_core::types::{Container, Network};

use crate::error::RegistryError;
use crate::snapshot::SnapshotReader;
use crate::targets::{SelectedTargetRegistry, SelectedTargetView, TargetKey};

/// 네트워크와 연결된 컨테이너
#[derive(Debug, Clone, Serialize)]
pub struct NetworkView {
    /// 네트워크
    pub network: Network,
    /// 이 네트워크에 연결된 컨테이너
    pub containers: Vec<Arc<Container>>,
}

/// 스냅샷 요약
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    /// 스냅샷 버전 (0 = 아직 구성되지 않음)
    pub version: u64,
    /// 구성 시각 (Unix 초)
    pub built_at: u64,
    /// 컨테이너 수
    pub containers: usize,
    /// 네트워크 수
    pub networks: usize,
    /// 둘 이상의 컨테이너가 광고하는 별칭
    pub ambiguous_aliases: Vec<String>,
}

/// 관리 서비스
#[derive(Clone)]
pub struct AdminService {
    reader: SnapshotReader,
    targets: Arc<SelectedTargetRegistry>,
}

impl AdminService {
    /// 새 관리 서비스를 생성합니다.
    pub fn new(reader: SnapshotReader, targets: Arc<SelectedTargetRegistry>) -> Self {
        Self { reader, targets }
    }

    /// 현재 스냅샷의 컨테이너 목록
    pub fn containers(&self) -> Vec<Arc<Container>> {
        self.reader.current().containers.clone()
    }

    /// 현재 스냅샷의 네트워크 목록
    pub fn networks(&self) -> Vec<Network> {
        self.reader.current().networks.clone()
    }

    /// 네트워크 ID로 네트워크와 연결된 컨테이너를 조회합니다.
    pub fn network(&self, id: &str) -> Option<NetworkView> {
        let snapshot = self.reader.current();
        let network = snapshot.network_by_id(id)?.clone();
        let containers = snapshot
            .containers_on_network(&network.name)
            .into_iter()
            .cloned()
            .collect();
        Some(NetworkView {
            network,
            containers,
        })
    }

    /// 스냅샷 요약
    pub fn snapshot_summary(&self) -> SnapshotSummary {
        let snapshot = self.reader.current();
        SnapshotSummary {
            version: snapshot.version,
            built_at: snapshot
                .built_at
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or_default(),
            containers: snapshot.containers.len(),
            networks: snapshot.networks.len(),
            ambiguous_aliases: snapshot
                .ambiguous_aliases()
                .into_iter()
                .map(|(alias, _)| alias.to_owned())
                .collect(),
        }
    }

    /// 선택 대상 목록
    pub async fn selected_targets(&self) -> Vec<SelectedTargetView> {
        self.targets.entries().await
    }

    /// 선택 대상에 컨테이너를 지정합니다.
    ///
    /// `reference`는 전체 ID, 유일한 ID 접두어, 또는 컨테이너 이름입니다.
    ///
    /// # Errors
    /// - `TargetNotFound`: 포트에 설정된 대상이 없음 (아무것도 변경하지 않음)
    /// - `ContainerNotFound`: 현재 스냅샷에 해당 컨테이너가 없음
    pub async fn set_selected_target(
        &self,
        port: u16,
        reference: &str,
    ) -> Result<SelectedTargetView, RegistryError> {
        let entry = self.targets.get(port).ok_or_else(|| {
            counter!(m::ADMIN_TARGET_UPDATES_TOTAL, m::LABEL_RESULT => "target_not_found")
                .increment(1);
            RegistryError::TargetNotFound(port.to_string())
        })?;

        let snapshot = self.reader.current();
        let container = snapshot.find_container(reference).cloned().ok_or_else(|| {
            counter!(m::ADMIN_TARGET_UPDATES_TOTAL, m::LABEL_RESULT => "container_not_found")
                .increment(1);
            RegistryError::ContainerNotFound(reference.to_owned())
        })?;

        self.targets
            .set_target(TargetKey::Port(port), Some(container))
            .await?;
        counter!(m::ADMIN_TARGET_UPDATES_TOTAL, m::LABEL_RESULT => "set").increment(1);
        Ok(entry.view().await)
    }

    /// 선택 대상을 해제합니다.
    pub async fn clear_selected_target(&self, port: u16) -> Result<(), RegistryError> {
        self.targets.set_target(TargetKey::Port(port), None).await?;
        counter!(m::ADMIN_TARGET_UPDATES_TOTAL, m::LABEL_RESULT => "cleared").increment(1);
        Ok(())
    }
}
