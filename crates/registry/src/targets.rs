//! 선택 대상 레지스트리
//!
//! 호스트명을 싣지 않는 프로토콜 포트(DB, ssh)마다 운영자가 지정한 컨테이너 하나를
//! 고정합니다. 표는 시작 시 설정으로 고정되고, 각 항목의 컨테이너만 런타임에
//! 교체됩니다. 항목마다 별도의 `RwLock`을 사용하므로 한 항목의 갱신이 다른 항목의
//! 조회를 막지 않습니다.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::RwLock;
use tracing::info;

use dockroute_core::config::SelectedTargetConfig;
use dockroute_core::types::Container;

use crate::error::RegistryError;

/// 선택 대상 항목
#[derive(Debug)]
pub struct SelectedTarget {
    /// 논리 서비스 이름
    pub name: String,
    /// 리스닝 포트 (레지스트리 키)
    pub port: u16,
    /// 백엔드 포트
    pub backend_port: u16,
    container: RwLock<Option<Arc<Container>>>,
}

impl SelectedTarget {
    /// 비어 있는 항목을 생성합니다.
    pub fn new(name: impl Into<String>, port: u16, backend_port: u16) -> Self {
        Self {
            name: name.into(),
            port,
            backend_port,
            container: RwLock::new(None),
        }
    }

    /// 현재 지정된 컨테이너
    pub async fn container(&self) -> Option<Arc<Container>> {
        self.container.read().await.clone()
    }

    /// 컨테이너를 교체하고 이전 값을 반환합니다.
    async fn replace(&self, container: Option<Arc<Container>>) -> Option<Arc<Container>> {
        let mut slot = self.container.write().await;
        std::mem::replace(&mut *slot, container)
    }

    /// 현재 상태의 복사본
    pub async fn view(&self) -> SelectedTargetView {
        let container = self.container().await;
        SelectedTargetView {
            name: self.name.clone(),
            port: self.port,
            backend_port: self.backend_port,
            container_id: container.as_ref().map(|c| c.id.clone()),
            container_name: container.as_ref().map(|c| c.display_name().to_owned()),
        }
    }
}

/// 선택 대상의 시점 복사본 (관리 API 응답용)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SelectedTargetView {
    /// 논리 서비스 이름
    pub name: String,
    /// 리스닝 포트
    pub port: u16,
    /// 백엔드 포트
    pub backend_port: u16,
    /// 지정된 컨테이너 ID
    pub container_id: Option<String>,
    /// 지정된 컨테이너 이름
    pub container_name: Option<String>,
}

/// 선택 대상 조회 키 -- 포트 또는 논리 이름
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TargetKey {
    /// 리스닝 포트
    Port(u16),
    /// 논리 서비스 이름
    Name(String),
}

impl From<u16> for TargetKey {
    fn from(port: u16) -> Self {
        Self::Port(port)
    }
}

impl From<&str> for TargetKey {
    /// 숫자 문자열은 포트로 해석합니다.
    fn from(key: &str) -> Self {
        match key.parse::<u16>() {
            Ok(port) => Self::Port(port),
            Err(_) => Self::Name(key.to_owned()),
        }
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Port(port) => write!(f, "{port}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// 선택 대상 레지스트리
#[derive(Debug, Default)]
pub struct SelectedTargetRegistry {
    entries: Vec<Arc<SelectedTarget>>,
}

impl SelectedTargetRegistry {
    /// 설정 목록으로 레지스트리를 생성합니다.
    pub fn from_config(targets: &[SelectedTargetConfig]) -> Self {
        Self {
            entries: targets
                .iter()
                .map(|t| Arc::new(SelectedTarget::new(&t.name, t.port, t.backend_port())))
                .collect(),
        }
    }

    /// 기본 대상(ssh, postgres, mysql, mongodb)으로 레지스트리를 생성합니다.
    pub fn with_defaults() -> Self {
        Self::from_config(&SelectedTargetConfig::defaults())
    }

    /// 등록된 항목 수
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// 비어 있는지 여부
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 포트로 항목을 찾습니다.
    pub fn get(&self, port: u16) -> Option<Arc<SelectedTarget>> {
        self.lookup(&TargetKey::Port(port))
    }

    /// 키로 항목을 찾습니다.
    pub fn lookup(&self, key: &TargetKey) -> Option<Arc<SelectedTarget>> {
        self.entries
            .iter()
            .find(|entry| match key {
                TargetKey::Port(port) => entry.port == *port,
                TargetKey::Name(name) => entry.name == *name,
            })
            .cloned()
    }

    /// 항목의 컨테이너를 교체하거나(`Some`) 해제합니다(`None`).
    ///
    /// 일치하는 항목이 없으면 아무것도 바꾸지 않고 `TargetNotFound`를 반환합니다.
    pub async fn set_target(
        &self,
        key: impl Into<TargetKey>,
        container: Option<Arc<Container>>,
    ) -> Result<Option<Arc<Container>>, RegistryError> {
        let key = key.into();
        let entry = self
            .lookup(&key)
            .ok_or_else(|| RegistryError::TargetNotFound(key.to_string()))?;

        let describe = |c: &Option<Arc<Container>>| {
            c.as_ref()
                .map_or_else(|| "<none>".to_owned(), |c| c.to_string())
        };
        let current = describe(&container);
        let previous = entry.replace(container).await;
        info!(
            target_name = %entry.name,
            port = entry.port,
            container = %current,
            previous = %describe(&previous),
            "selected target updated"
        );
        Ok(previous)
    }

    /// 포트에 지정된 컨테이너
    pub async fn get_target(&self, port: u16) -> Option<Arc<Container>> {
        match self.get(port) {
            Some(entry) => entry.container().await,
            None => None,
        }
    }

    /// 전체 항목의 시점 복사본
    pub async fn entries(&self) -> Vec<SelectedTargetView> {
        let mut views = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            views.push(entry.view().await);
        }
        views
    }

    /// 항목 핸들 목록 (라우터 리스너 구성용)
    pub fn targets(&self) -> impl Iterator<Item = &Arc<SelectedTarget>> {
        self.entries.iter()
    }
}
