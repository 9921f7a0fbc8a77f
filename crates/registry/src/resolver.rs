//! 별칭 라우터 -- 라우팅 키를 컨테이너 주소로 변환
//!
//! 스냅샷의 컨테이너를 목록 순서대로 순회하며, 각 네트워크 연결의 별칭이
//! 라우팅 키의 접두어인지 확인합니다. 라우팅 키에는 별칭 뒤에 포트 등이 붙어
//! 있을 수 있으므로 (`web1.proj.loc:8080`) 정확히 일치가 아닌 접두어 매칭입니다.
//!
//! 같은 별칭을 여러 컨테이너가 광고하면 Docker 목록 순서상 첫 컨테이너가 선택됩니다.
//! 재구성 시 경고 로그로 알립니다 ([`Refresher`](crate::refresher::Refresher)).

use std::net::IpAddr;
use std::sync::Arc;

use dockroute_core::types::Snapshot;
use serde::Serialize;

use crate::snapshot::SnapshotReader;

/// 라우팅 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedBackend {
    /// 컨테이너 ID
    pub container_id: String,
    /// 컨테이너 표시 이름
    pub container_name: String,
    /// 매칭된 별칭
    pub alias: String,
    /// 기본 네트워크 주소
    pub address: IpAddr,
}

/// 별칭 라우터
#[derive(Clone)]
pub struct AliasRouter {
    reader: SnapshotReader,
}

impl AliasRouter {
    /// 스냅샷 reader로 라우터를 생성합니다.
    pub fn new(reader: SnapshotReader) -> Self {
        Self { reader }
    }

    /// 현재 스냅샷에서 라우팅 키를 해석합니다.
    pub fn resolve(&self, routing_key: &str) -> Option<ResolvedBackend> {
        let snapshot = self.reader.current();
        resolve_in(&snapshot, routing_key)
    }

    /// 현재 스냅샷
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.reader.current()
    }
}

/// 주어진 스냅샷에서 라우팅 키를 해석합니다.
///
/// 첫 번째로 매칭된 별칭의 컨테이너 기본 네트워크 주소가 비어 있으면
/// 실패하지 않고 다음 컨테이너를 계속 탐색합니다.
pub fn resolve_in(snapshot: &Snapshot, routing_key: &str) -> Option<ResolvedBackend> {
    if routing_key.is_empty() {
        return None;
    }

    for container in &snapshot.containers {
        let matched = container
            .networks
            .values()
            .flat_map(|attachment| attachment.aliases.iter())
            .find(|alias| !alias.is_empty() && routing_key.starts_with(alias.as_str()));

        let Some(alias) = matched else {
            continue;
        };

        // 연결/해제 중인 컨테이너는 주소가 비어 있음
        let Some(address) = container.primary_address() else {
            continue;
        };

        return Some(ResolvedBackend {
            container_id: container.id.clone(),
            container_name: container.display_name().to_owned(),
            alias: alias.clone(),
            address,
        });
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotStore;
    use dockroute_core::types::{Container, NetworkAttachment};
    use std::collections::BTreeMap;

    fn container(id: &str, name: &str, ip: &str, aliases: &[&str]) -> Container {
        let mut networks = BTreeMap::new();
        networks.insert(
            "proj_net_1".to_owned(),
            NetworkAttachment {
                network_id: "n1".to_owned(),
                ip_address: ip.to_owned(),
                aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
            },
        );
        Container {
            id: id.to_owned(),
            names: vec![format!("/{name}")],
            labels: BTreeMap::new(),
            networks,
            network_mode: "proj_net_1".to_owned(),
        }
    }

    fn snapshot(containers: Vec<Container>) -> Snapshot {
        Snapshot::new(1, Vec::new(), containers)
    }

    #[test]
    fn host_with_port_resolves_by_prefix() {
        let snap = snapshot(vec![container("a1", "web1", "10.0.0.5", &["web1.proj.loc"])]);
        let backend = resolve_in(&snap, "web1.proj.loc:8080").unwrap();
        assert_eq!(backend.address, "10.0.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(backend.container_name, "web1");
        assert_eq!(backend.alias, "web1.proj.loc");
    }

    #[test]
    fn exact_key_resolves() {
        let snap = snapshot(vec![container("a1", "web1", "10.0.0.5", &["web1.proj.loc"])]);
        assert!(resolve_in(&snap, "web1.proj.loc").is_some());
    }

    #[test]
    fn unknown_key_is_not_found() {
        let snap = snapshot(vec![container("a1", "web1", "10.0.0.5", &["web1.proj.loc"])]);
        assert!(resolve_in(&snap, "api.proj.loc").is_none());
        assert!(resolve_in(&snap, "").is_none());
        // 별칭이 키의 접두어여야 하며 그 반대는 아님
        assert!(resolve_in(&snap, "web1").is_none());
    }

    #[test]
    fn empty_address_continues_scanning() {
        let snap = snapshot(vec![
            container("a1", "web1-old", "", &["web1.proj.loc"]),
            container("b2", "web1-new", "10.0.0.9", &["web1.proj.loc"]),
        ]);
        let backend = resolve_in(&snap, "web1.proj.loc").unwrap();
        assert_eq!(backend.container_id, "b2");
    }

    #[test]
    fn empty_address_without_fallback_is_not_found() {
        let snap = snapshot(vec![container("a1", "web1", "", &["web1.proj.loc"])]);
        assert!(resolve_in(&snap, "web1.proj.loc").is_none());
    }

    #[test]
    fn shared_alias_uses_listing_order() {
        let snap = snapshot(vec![
            container("a1", "first", "10.0.0.1", &["shared.proj.loc"]),
            container("b2", "second", "10.0.0.2", &["shared.proj.loc"]),
        ]);
        assert_eq!(resolve_in(&snap, "shared.proj.loc").unwrap().container_id, "a1");
    }

    #[test]
    fn address_comes_from_primary_network() {
        let mut c = container("a1", "web1", "10.0.0.5", &[]);
        c.networks.insert(
            "proj_net_2".to_owned(),
            NetworkAttachment {
                network_id: "n2".to_owned(),
                ip_address: "10.1.0.7".to_owned(),
                aliases: vec!["web1.other.loc".to_owned()],
            },
        );
        let snap = snapshot(vec![c]);
        // 별칭은 proj_net_2에 있지만 주소는 기본 네트워크(proj_net_1)에서
        let backend = resolve_in(&snap, "web1.other.loc").unwrap();
        assert_eq!(backend.address, "10.0.0.5".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn router_sees_latest_snapshot() {
        let store = SnapshotStore::new();
        let router = AliasRouter::new(store.reader());
        assert!(router.resolve("web1.proj.loc").is_none());

        store.publish(snapshot(vec![container(
            "a1",
            "web1",
            "10.0.0.5",
            &["web1.proj.loc"],
        )]));
        assert!(router.resolve("web1.proj.loc").is_some());
    }
}
