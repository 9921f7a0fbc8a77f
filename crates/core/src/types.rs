//! 도메인 타입 -- 레지스트리 스냅샷 데이터 모델
//!
//! Docker 호스트의 컨테이너/네트워크 상태를 불변 스냅샷으로 표현합니다.
//! 스냅샷은 재구성 시 통째로 교체되며, 제자리에서 수정되지 않습니다.

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// 컨테이너의 네트워크 연결 정보
///
/// 하나의 컨테이너와 하나의 네트워크에 속합니다.
/// 별칭(alias)은 필터링된 네트워크에 대해서만 채워집니다.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkAttachment {
    /// 네트워크 ID
    pub network_id: String,
    /// IP 주소 (연결/해제 중에는 빈 문자열일 수 있음)
    pub ip_address: String,
    /// 이 네트워크에서 컨테이너에 접근 가능한 호스트명 목록
    pub aliases: Vec<String>,
}

impl NetworkAttachment {
    /// IP 주소를 파싱합니다. 비어 있거나 파싱할 수 없으면 `None`.
    pub fn address(&self) -> Option<IpAddr> {
        if self.ip_address.is_empty() {
            return None;
        }
        self.ip_address.parse().ok()
    }
}

/// 컨테이너
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// 컨테이너 ID
    pub id: String,
    /// 컨테이너 이름 목록 (Docker 형식, `/` 접두어 포함)
    pub names: Vec<String>,
    /// 레이블
    pub labels: BTreeMap<String, String>,
    /// 네트워크 이름 -> 연결 정보
    pub networks: BTreeMap<String, NetworkAttachment>,
    /// 선언된 네트워크 모드 (기본 네트워크 이름)
    pub network_mode: String,
}

impl Container {
    /// 사람이 읽기 쉬운 이름 (첫 번째 이름에서 `/` 제거). 이름이 없으면 ID.
    pub fn display_name(&self) -> &str {
        self.names
            .first()
            .map(|n| n.trim_start_matches('/'))
            .unwrap_or(&self.id)
    }

    /// `/<name>` 형식의 이름과 정확히 일치하는지 확인합니다.
    pub fn has_name(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|n| n.strip_prefix('/').is_some_and(|rest| rest == name))
    }

    /// 기본 네트워크 연결 정보 (네트워크 이름 == network_mode)
    pub fn primary_attachment(&self) -> Option<&NetworkAttachment> {
        self.networks.get(&self.network_mode)
    }

    /// 기본 네트워크 주소. 연결이 없거나 주소가 비어 있으면 `None`.
    pub fn primary_address(&self) -> Option<IpAddr> {
        self.primary_attachment().and_then(NetworkAttachment::address)
    }

    /// 지정된 네트워크에 연결되어 있는지 확인합니다.
    pub fn is_attached_to(&self, network_name: &str) -> bool {
        self.networks.contains_key(network_name)
    }
}

impl fmt::Display for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_id = self.id.get(..12).unwrap_or(&self.id);
        write!(f, "{} ({})", self.display_name(), short_id)
    }
}

/// Docker 네트워크
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    /// 네트워크 ID
    pub id: String,
    /// 네트워크 이름
    pub name: String,
}

/// 레지스트리 스냅샷
///
/// 필터링된 네트워크 목록과 그 네트워크에 연결된 컨테이너 목록입니다.
/// 컨테이너 순서는 Docker 목록 조회 순서를 따르며, 별칭 매칭의 우선순위가 됩니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// 재구성 카운터 (0 = 아직 한 번도 구성되지 않음)
    pub version: u64,
    /// 구성 시각
    pub built_at: SystemTime,
    /// 필터링된 네트워크
    pub networks: Vec<Network>,
    /// 필터링된 네트워크에 연결된 컨테이너
    pub containers: Vec<Arc<Container>>,
}

impl Snapshot {
    /// 새 스냅샷을 생성합니다.
    pub fn new(version: u64, networks: Vec<Network>, containers: Vec<Container>) -> Self {
        Self {
            version,
            built_at: SystemTime::now(),
            networks,
            containers: containers.into_iter().map(Arc::new).collect(),
        }
    }

    /// 빈 스냅샷 (최초 구성 전 상태)
    pub fn empty() -> Self {
        Self::new(0, Vec::new(), Vec::new())
    }

    /// 컨테이너 ID로 검색합니다 (정확히 일치).
    pub fn container_by_id(&self, id: &str) -> Option<&Arc<Container>> {
        self.containers.iter().find(|c| c.id == id)
    }

    /// 컨테이너 이름으로 검색합니다 (`/<name>` 정확히 일치).
    pub fn container_by_name(&self, name: &str) -> Option<&Arc<Container>> {
        self.containers.iter().find(|c| c.has_name(name))
    }

    /// 정확한 ID, 이름, 유일한 ID 접두어 순서로 컨테이너를 찾습니다.
    ///
    /// 접두어가 여러 컨테이너와 일치하면 `None`을 반환합니다.
    pub fn find_container(&self, reference: &str) -> Option<&Arc<Container>> {
        if reference.is_empty() {
            return None;
        }
        if let Some(found) = self
            .container_by_id(reference)
            .or_else(|| self.container_by_name(reference))
        {
            return Some(found);
        }
        let mut by_prefix = self.containers.iter().filter(|c| c.id.starts_with(reference));
        match (by_prefix.next(), by_prefix.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// 네트워크 ID로 검색합니다.
    pub fn network_by_id(&self, id: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.id == id)
    }

    /// 지정된 네트워크에 연결된 컨테이너 목록
    pub fn containers_on_network(&self, network_name: &str) -> Vec<&Arc<Container>> {
        self.containers
            .iter()
            .filter(|c| c.is_attached_to(network_name))
            .collect()
    }

    /// 별칭 -> 해당 별칭을 광고하는 컨테이너 ID 목록
    pub fn alias_owners(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for container in &self.containers {
            for attachment in container.networks.values() {
                for alias in &attachment.aliases {
                    let ids = owners.entry(alias.as_str()).or_default();
                    if !ids.contains(&container.id.as_str()) {
                        ids.push(container.id.as_str());
                    }
                }
            }
        }
        owners
    }

    /// 두 개 이상의 컨테이너가 광고하는 별칭 목록
    pub fn ambiguous_aliases(&self) -> Vec<(&str, Vec<&str>)> {
        self.alias_owners()
            .into_iter()
            .filter(|(_, ids)| ids.len() > 1)
            .collect()
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attachment(ip: &str, aliases: &[&str]) -> NetworkAttachment {
        NetworkAttachment {
            network_id: "net-1".to_owned(),
            ip_address: ip.to_owned(),
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
        }
    }

    fn container(id: &str, name: &str, ip: &str, aliases: &[&str]) -> Container {
        let mut networks = BTreeMap::new();
        networks.insert("proj_net_1".to_owned(), attachment(ip, aliases));
        Container {
            id: id.to_owned(),
            names: vec![format!("/{name}")],
            labels: BTreeMap::new(),
            networks,
            network_mode: "proj_net_1".to_owned(),
        }
    }

    #[test]
    fn display_name_strips_slash() {
        let c = container("abc", "web1", "10.0.0.5", &[]);
        assert_eq!(c.display_name(), "web1");
    }

    #[test]
    fn display_name_falls_back_to_id() {
        let c = Container {
            id: "abc123".to_owned(),
            ..Default::default()
        };
        assert_eq!(c.display_name(), "abc123");
    }

    #[test]
    fn has_name_requires_exact_match() {
        let c = container("abc", "web1", "10.0.0.5", &[]);
        assert!(c.has_name("web1"));
        assert!(!c.has_name("web"));
        assert!(!c.has_name("/web1"));
    }

    #[test]
    fn primary_address_parses_ip() {
        let c = container("abc", "web1", "10.0.0.5", &[]);
        assert_eq!(c.primary_address(), Some("10.0.0.5".parse().unwrap()));
    }

    #[test]
    fn primary_address_empty_ip_is_none() {
        let c = container("abc", "web1", "", &[]);
        assert_eq!(c.primary_address(), None);
    }

    #[test]
    fn primary_address_missing_network_is_none() {
        let mut c = container("abc", "web1", "10.0.0.5", &[]);
        c.network_mode = "host".to_owned();
        assert_eq!(c.primary_address(), None);
    }

    #[test]
    fn find_container_by_id_prefix_and_name() {
        let snapshot = Snapshot::new(
            1,
            Vec::new(),
            vec![
                container("abc123", "web1", "10.0.0.5", &[]),
                container("abd456", "db1", "10.0.0.9", &[]),
            ],
        );
        assert_eq!(snapshot.find_container("abc123").unwrap().id, "abc123");
        assert_eq!(snapshot.find_container("abd").unwrap().id, "abd456");
        assert_eq!(snapshot.find_container("db1").unwrap().id, "abd456");
        // "ab"는 두 컨테이너와 일치하므로 모호함
        assert!(snapshot.find_container("ab").is_none());
        assert!(snapshot.find_container("").is_none());
    }

    #[test]
    fn find_container_name_wins_over_id_prefix() {
        // Given: 이름 "abc"인 컨테이너와 ID가 "abc"로 시작하는 컨테이너
        let snapshot = Snapshot::new(
            1,
            Vec::new(),
            vec![
                container("abc123", "web1", "10.0.0.5", &[]),
                container("fff999", "abc", "10.0.0.7", &[]),
            ],
        );

        // Then: 정확한 이름이 접두어보다 우선
        assert_eq!(snapshot.find_container("abc").unwrap().id, "fff999");
        assert_eq!(snapshot.find_container("abc1").unwrap().id, "abc123");
    }

    #[test]
    fn containers_on_network_groups_by_name() {
        let mut other = container("def", "cache", "10.1.0.2", &[]);
        other.networks = BTreeMap::from([("proj_net_2".to_owned(), attachment("10.1.0.2", &[]))]);
        other.network_mode = "proj_net_2".to_owned();
        let snapshot = Snapshot::new(
            1,
            Vec::new(),
            vec![container("abc", "web1", "10.0.0.5", &[]), other],
        );
        assert_eq!(snapshot.containers_on_network("proj_net_1").len(), 1);
        assert_eq!(snapshot.containers_on_network("proj_net_2").len(), 1);
        assert!(snapshot.containers_on_network("missing").is_empty());
    }

    #[test]
    fn ambiguous_aliases_lists_shared_aliases() {
        let snapshot = Snapshot::new(
            1,
            Vec::new(),
            vec![
                container("a1", "web1", "10.0.0.5", &["web.proj.loc", "web1.proj.loc"]),
                container("a2", "web2", "10.0.0.6", &["web.proj.loc"]),
            ],
        );
        let ambiguous = snapshot.ambiguous_aliases();
        assert_eq!(ambiguous.len(), 1);
        assert_eq!(ambiguous[0].0, "web.proj.loc");
        assert_eq!(ambiguous[0].1, vec!["a1", "a2"]);
    }

    #[test]
    fn empty_snapshot_has_version_zero() {
        let snapshot = Snapshot::default();
        assert_eq!(snapshot.version, 0);
        assert!(snapshot.containers.is_empty());
        assert!(snapshot.networks.is_empty());
    }

    #[test]
    fn container_display_uses_short_id() {
        let c = container("0123456789abcdef", "web1", "10.0.0.5", &[]);
        assert_eq!(c.to_string(), "web1 (0123456789ab)");
    }
}
