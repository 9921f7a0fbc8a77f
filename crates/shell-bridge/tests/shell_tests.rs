//! 통합 테스트 -- 사용자 이름 → 컨테이너 → exec 브릿지 전체 플로우
//!
//! 스냅샷은 `SnapshotStore`로 게시하고, Docker exec는 로컬 mock으로 대체합니다.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures::StreamExt;
use futures::channel::mpsc::unbounded;
use tokio_util::sync::CancellationToken;

use dockroute_core::types::{Container, Snapshot};
use dockroute_registry::{ContainerExec, ExecSession, RegistryError, SnapshotStore};
use dockroute_shell_bridge::{
    EXIT_NOT_INTERACTIVE, EXIT_OK, PtySize, SessionPlan, SessionSink, ShellBridgeError,
    ShellRequest, bridge_channels, close_session, plan_session, run_bridge,
};

#[derive(Default)]
struct Transcript {
    output: Mutex<Vec<u8>>,
    exit_status: Mutex<Option<u32>>,
}

impl SessionSink for Transcript {
    async fn write(&self, data: Bytes) -> Result<(), ShellBridgeError> {
        self.output.lock().unwrap().extend_from_slice(&data);
        Ok(())
    }

    async fn finish(&self, exit_status: u32) {
        *self.exit_status.lock().unwrap() = Some(exit_status);
    }
}

/// 한 줄을 출력하고 바로 종료하는 셸
#[derive(Default)]
struct ScriptedExec {
    creates: AtomicUsize,
    targets: Mutex<Vec<String>>,
}

impl ContainerExec for ScriptedExec {
    async fn create_exec(&self, container_id: &str, _cmd: &[String]) -> Result<String, RegistryError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().unwrap().push(container_id.to_owned());
        Ok("exec-1".to_owned())
    }

    async fn start_exec(&self, _exec_id: &str) -> Result<ExecSession, RegistryError> {
        let (tx, rx) = unbounded();
        tx.unbounded_send(Ok(Bytes::from_static(b"/ # ")))
            .map_err(|e| RegistryError::Exec(e.to_string()))?;
        drop(tx);
        Ok(ExecSession {
            output: rx.boxed(),
            input: Box::pin(tokio::io::sink()),
        })
    }

    async fn resize_exec(&self, _exec_id: &str, _cols: u16, _rows: u16) -> Result<(), RegistryError> {
        Ok(())
    }
}

fn container(id: &str, name: &str) -> Container {
    Container {
        id: id.to_owned(),
        names: vec![format!("/{name}")],
        labels: BTreeMap::new(),
        networks: BTreeMap::new(),
        network_mode: "proj_default".to_owned(),
    }
}

fn store() -> SnapshotStore {
    SnapshotStore::with_initial(Snapshot::new(
        1,
        Vec::new(),
        vec![container("aaaa1111", "web1"), container("bbbb2222", "db")],
    ))
}

/// 셸 요청 하나를 끝까지 처리합니다.
async fn run_session(
    store: &SnapshotStore,
    exec: &ScriptedExec,
    user: &str,
    request: ShellRequest,
) -> Transcript {
    let transcript = Transcript::default();
    let snapshot = store.reader().current();
    match plan_session(&snapshot, user, &request) {
        SessionPlan::Close {
            message,
            exit_status,
        } => close_session(&transcript, &message, exit_status).await,
        SessionPlan::Attach { container, pty } => {
            let (_handles, channels) = bridge_channels();
            let command = vec!["sh".to_owned()];
            let shutdown = CancellationToken::new();
            run_bridge(exec, &transcript, &container, &command, pty, channels, &shutdown).await;
        }
    }
    transcript
}

fn interactive() -> ShellRequest {
    ShellRequest::Shell {
        pty: Some(PtySize { cols: 80, rows: 24 }),
    }
}

#[tokio::test]
async fn user_name_selects_container() {
    // Given
    let store = store();
    let exec = ScriptedExec::default();

    // When: web1로 접속
    let transcript = run_session(&store, &exec, "web1", interactive()).await;

    // Then: 환영 메시지 후 셸 출력, 종료 상태 0
    let output = String::from_utf8(transcript.output.lock().unwrap().clone()).unwrap();
    assert_eq!(output, "Connected to container web1\r\n/ # ");
    assert_eq!(*transcript.exit_status.lock().unwrap(), Some(EXIT_OK));
    assert_eq!(*exec.targets.lock().unwrap(), vec!["aaaa1111".to_owned()]);
}

#[tokio::test]
async fn unknown_user_creates_no_exec() {
    let store = store();
    let exec = ScriptedExec::default();

    let transcript = run_session(&store, &exec, "ghost", interactive()).await;

    assert_eq!(*transcript.exit_status.lock().unwrap(), Some(EXIT_OK));
    assert_eq!(exec.creates.load(Ordering::SeqCst), 0);
    let output = String::from_utf8(transcript.output.lock().unwrap().clone()).unwrap();
    assert!(output.contains("ghost"));
}

#[tokio::test]
async fn non_interactive_requests_exit_two() {
    let store = store();
    let exec = ScriptedExec::default();

    let no_pty = run_session(&store, &exec, "web1", ShellRequest::Shell { pty: None }).await;
    let exec_req = run_session(
        &store,
        &exec,
        "web1",
        ShellRequest::Exec {
            command: "cat /etc/passwd".to_owned(),
        },
    )
    .await;

    assert_eq!(*no_pty.exit_status.lock().unwrap(), Some(EXIT_NOT_INTERACTIVE));
    assert_eq!(*exec_req.exit_status.lock().unwrap(), Some(EXIT_NOT_INTERACTIVE));
    assert_eq!(exec.creates.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn lookup_uses_current_snapshot() {
    // Given: 처음엔 web2가 없음
    let store = store();
    let exec = ScriptedExec::default();
    run_session(&store, &exec, "web2", interactive()).await;
    assert_eq!(exec.creates.load(Ordering::SeqCst), 0);

    // When: 재구성으로 web2가 추가됨
    store.publish(Snapshot::new(
        2,
        Vec::new(),
        vec![container("cccc3333", "web2")],
    ));

    // Then
    run_session(&store, &exec, "web2", interactive()).await;
    assert_eq!(*exec.targets.lock().unwrap(), vec!["cccc3333".to_owned()]);
}
