//! 스냅샷 게시 -- 단일 writer, 다수 reader
//!
//! [`SnapshotStore`]는 재구성된 [`Snapshot`]을 `watch` 채널로 원자적으로 교체합니다.
//! [`SnapshotReader`]는 현재 스냅샷의 `Arc`를 복제해 사용하므로, 교체 이후에도
//! 이전 스냅샷을 들고 있던 reader는 그대로 사용할 수 있습니다.

use std::sync::Arc;

use tokio::sync::watch;

use dockroute_core::types::Snapshot;

/// 스냅샷 저장소 (writer 측)
#[derive(Clone)]
pub struct SnapshotStore {
    tx: Arc<watch::Sender<Arc<Snapshot>>>,
}

impl SnapshotStore {
    /// 빈 스냅샷(version 0)으로 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::with_initial(Snapshot::empty())
    }

    /// 주어진 스냅샷으로 저장소를 생성합니다.
    pub fn with_initial(snapshot: Snapshot) -> Self {
        let (tx, _rx) = watch::channel(Arc::new(snapshot));
        Self { tx: Arc::new(tx) }
    }

    /// 새 스냅샷을 게시합니다. reader가 없어도 실패하지 않습니다.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(Arc::clone(&snapshot));
        snapshot
    }

    /// 현재 스냅샷
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.tx.borrow())
    }

    /// reader를 생성합니다.
    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

/// 스냅샷 reader
#[derive(Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Arc<Snapshot>>,
}

impl SnapshotReader {
    /// 현재 스냅샷
    pub fn current(&self) -> Arc<Snapshot> {
        Arc::clone(&self.rx.borrow())
    }

    /// 다음 게시까지 대기합니다. 저장소가 사라지면 `false`.
    pub async fn changed(&mut self) -> bool {
        self.rx.changed().await.is_ok()
    }
}
