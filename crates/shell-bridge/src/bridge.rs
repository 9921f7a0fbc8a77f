//! exec 브릿지 -- 컨테이너 셸과 SSH 채널 사이의 양방향 복사
//!
//! 출력 방향(exec → 세션)이 끝나면 입력 방향(세션 → exec)을 취소하고 join한 뒤에
//! 종료 상태를 보냅니다. 입력 태스크가 세션보다 오래 남지 않습니다.

use std::future::Future;

use bytes::Bytes;
use futures::StreamExt;
use metrics::{counter, gauge};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use dockroute_core::metrics as m;
use dockroute_core::types::Container;
use dockroute_registry::{ContainerExec, ExecInput, ExecSession};

use crate::error::ShellBridgeError;
use crate::session::{EXIT_EXEC_FAILED, EXIT_OK, PtySize, welcome_line};

/// 세션 입력 채널 용량 (SSH data 메시지 단위)
const INPUT_CHANNEL_CAPACITY: usize = 64;
/// 창 크기 변경 채널 용량
const RESIZE_CHANNEL_CAPACITY: usize = 8;

/// 세션 쪽 출력 대상
///
/// 실제 구현은 russh 채널 핸들이며, 테스트에서는 기록용 mock을 사용합니다.
pub trait SessionSink: Send + Sync {
    /// 세션에 데이터를 씁니다. 클라이언트가 떠났으면 `SessionClosed`.
    fn write(&self, data: Bytes) -> impl Future<Output = Result<(), ShellBridgeError>> + Send;

    /// 종료 상태, EOF, close를 순서대로 보냅니다. 실패는 무시합니다.
    fn finish(&self, exit_status: u32) -> impl Future<Output = ()> + Send;
}

/// SSH 핸들러가 브릿지로 보내는 쪽
#[derive(Debug)]
pub struct BridgeHandles {
    /// 세션 입력
    pub input: mpsc::Sender<Bytes>,
    /// 창 크기 변경
    pub resize: mpsc::Sender<PtySize>,
}

/// 브릿지가 받는 쪽
#[derive(Debug)]
pub struct BridgeChannels {
    /// 세션 입력. 모든 송신자가 드롭되면 exec 입력을 닫습니다.
    pub input: mpsc::Receiver<Bytes>,
    /// 창 크기 변경
    pub resize: mpsc::Receiver<PtySize>,
}

/// 브릿지 채널 쌍을 생성합니다.
pub fn bridge_channels() -> (BridgeHandles, BridgeChannels) {
    let (input_tx, input_rx) = mpsc::channel(INPUT_CHANNEL_CAPACITY);
    let (resize_tx, resize_rx) = mpsc::channel(RESIZE_CHANNEL_CAPACITY);
    (
        BridgeHandles {
            input: input_tx,
            resize: resize_tx,
        },
        BridgeChannels {
            input: input_rx,
            resize: resize_rx,
        },
    )
}

/// 브릿지 결과
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeOutcome {
    /// 세션에 보낸 종료 상태
    pub exit_status: u32,
    /// exec → 세션 바이트 (환영 메시지 제외)
    pub to_session: u64,
    /// 세션 → exec 바이트
    pub to_exec: u64,
}

/// 메시지를 쓰고 종료 상태와 함께 세션을 닫습니다.
pub async fn close_session<S: SessionSink>(sink: &S, message: &str, exit_status: u32) {
    if !message.is_empty() && sink.write(Bytes::copy_from_slice(message.as_bytes())).await.is_err() {
        debug!("client left before close message");
    }
    sink.finish(exit_status).await;
}

/// 컨테이너에 셸을 만들고 세션과 연결합니다.
///
/// exec 생성/시작에 실패하면 메시지와 종료 상태 1로 세션을 닫습니다.
/// `shutdown`이 취소되면 출력 대기를 멈추고 같은 정리 절차로 세션을 닫습니다.
pub async fn run_bridge<E, S>(
    exec: &E,
    sink: &S,
    container: &Container,
    command: &[String],
    pty: PtySize,
    channels: BridgeChannels,
    shutdown: &CancellationToken,
) -> BridgeOutcome
where
    E: ContainerExec,
    S: SessionSink,
{
    let session = match start_shell(exec, container, command, pty).await {
        Ok(session) => session,
        Err(e) => {
            counter!(m::SHELL_EXEC_FAILURES_TOTAL).increment(1);
            counter!(m::SHELL_SESSIONS_TOTAL, m::LABEL_RESULT => "exec_failed").increment(1);
            warn!(container = %container, error = %e, "failed to start shell");
            let message = format!(
                "dockroute: failed to start shell in {}: {e}\r\n",
                container.display_name()
            );
            close_session(sink, &message, EXIT_EXEC_FAILED).await;
            return BridgeOutcome {
                exit_status: EXIT_EXEC_FAILED,
                to_session: 0,
                to_exec: 0,
            };
        }
    };
    let (exec_id, ExecSession { mut output, input }) = session;

    counter!(m::SHELL_SESSIONS_TOTAL, m::LABEL_RESULT => "attached").increment(1);
    gauge!(m::SHELL_ACTIVE_SESSIONS).increment(1.0);

    let BridgeChannels {
        input: input_rx,
        mut resize,
    } = channels;
    let cancel = CancellationToken::new();
    let forward = tokio::spawn(forward_input(input, input_rx, cancel.clone()));

    let mut to_session = 0u64;
    let mut client_open = sink
        .write(Bytes::from(welcome_line(container)))
        .await
        .is_ok();
    let mut resize_open = true;

    while client_open {
        tokio::select! {
            chunk = output.next() => match chunk {
                Some(Ok(data)) => {
                    let len = data.len() as u64;
                    if sink.write(data).await.is_err() {
                        debug!(container = %container, "client left, stopping shell output");
                        client_open = false;
                    } else {
                        to_session += len;
                    }
                }
                Some(Err(e)) => {
                    warn!(container = %container, error = %e, "shell output failed");
                    break;
                }
                None => break,
            },
            size = resize.recv(), if resize_open => match size {
                Some(size) => resize_shell(exec, &exec_id, size).await,
                None => resize_open = false,
            },
            _ = shutdown.cancelled() => {
                debug!(container = %container, "shell bridge shutting down");
                let _ = sink
                    .write(Bytes::from_static(b"\r\ndockroute: shutting down\r\n"))
                    .await;
                break;
            }
        }
    }

    // 입력 방향 정리 후 종료
    cancel.cancel();
    let to_exec = match forward.await {
        Ok(forwarded) => forwarded,
        Err(e) => {
            warn!(error = %e, "input forwarder panicked");
            0
        }
    };
    sink.finish(EXIT_OK).await;
    gauge!(m::SHELL_ACTIVE_SESSIONS).decrement(1.0);

    BridgeOutcome {
        exit_status: EXIT_OK,
        to_session,
        to_exec,
    }
}

async fn start_shell<E: ContainerExec>(
    exec: &E,
    container: &Container,
    command: &[String],
    pty: PtySize,
) -> Result<(String, ExecSession), ShellBridgeError> {
    let exec_id = exec.create_exec(&container.id, command).await?;
    let session = exec.start_exec(&exec_id).await?;
    // Docker는 시작된 exec만 크기 조정을 허용
    resize_shell(exec, &exec_id, pty).await;
    Ok((exec_id, session))
}

async fn resize_shell<E: ContainerExec>(exec: &E, exec_id: &str, size: PtySize) {
    if size.is_unset() {
        return;
    }
    if let Err(e) = exec.resize_exec(exec_id, size.cols, size.rows).await {
        debug!(exec_id, error = %e, "failed to resize shell");
    }
}

async fn forward_input(
    mut input: ExecInput,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) -> u64 {
    let mut forwarded = 0u64;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            data = rx.recv() => match data {
                Some(data) => {
                    if let Err(e) = input.write_all(&data).await {
                        debug!(error = %e, "shell input closed");
                        break;
                    }
                    forwarded += data.len() as u64;
                }
                None => {
                    // 클라이언트 EOF -> exec stdin 닫기
                    let _ = input.shutdown().await;
                    break;
                }
            },
        }
    }
    forwarded
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use dockroute_registry::{ExecOutput, RegistryError};
    use futures::channel::mpsc::{UnboundedSender, unbounded};
    use tokio::io::{AsyncReadExt, DuplexStream};

    #[derive(Default)]
    struct RecordingSink {
        written: Mutex<Vec<u8>>,
        finished: Mutex<Option<u32>>,
    }

    impl RecordingSink {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.written.lock().unwrap()).into_owned()
        }

        fn exit_status(&self) -> Option<u32> {
            *self.finished.lock().unwrap()
        }
    }

    impl SessionSink for RecordingSink {
        async fn write(&self, data: Bytes) -> Result<(), ShellBridgeError> {
            self.written.lock().unwrap().extend_from_slice(&data);
            Ok(())
        }

        async fn finish(&self, exit_status: u32) {
            *self.finished.lock().unwrap() = Some(exit_status);
        }
    }

    /// 출력은 테스트가 밀어 넣고, 입력은 duplex 반대편에서 읽는 mock exec
    struct MockExec {
        output: Mutex<Option<ExecOutput>>,
        stdin: Mutex<Option<DuplexStream>>,
        fail_create: bool,
        creates: AtomicUsize,
        resizes: Mutex<Vec<(u16, u16)>>,
    }

    impl MockExec {
        fn new() -> (Self, UnboundedSender<Result<Bytes, RegistryError>>, DuplexStream) {
            let (out_tx, out_rx) = unbounded();
            let (stdin, stdin_reader) = tokio::io::duplex(1024);
            let exec = Self {
                output: Mutex::new(Some(out_rx.boxed())),
                stdin: Mutex::new(Some(stdin)),
                fail_create: false,
                creates: AtomicUsize::new(0),
                resizes: Mutex::new(Vec::new()),
            };
            (exec, out_tx, stdin_reader)
        }
    }

    impl ContainerExec for MockExec {
        async fn create_exec(&self, container_id: &str, cmd: &[String]) -> Result<String, RegistryError> {
            self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(RegistryError::Exec("container is not running".to_owned()));
            }
            assert_eq!(cmd, ["sh".to_owned()]);
            Ok(format!("exec-{container_id}"))
        }

        async fn start_exec(&self, _exec_id: &str) -> Result<ExecSession, RegistryError> {
            let output = self.output.lock().unwrap().take();
            let stdin = self.stdin.lock().unwrap().take();
            match (output, stdin) {
                (Some(output), Some(stdin)) => Ok(ExecSession {
                    output,
                    input: Box::pin(stdin),
                }),
                _ => Err(RegistryError::Exec("already started".to_owned())),
            }
        }

        async fn resize_exec(&self, _exec_id: &str, cols: u16, rows: u16) -> Result<(), RegistryError> {
            self.resizes.lock().unwrap().push((cols, rows));
            Ok(())
        }
    }

    fn web1() -> Container {
        Container {
            id: "aaaa1111".to_owned(),
            names: vec!["/web1".to_owned()],
            labels: BTreeMap::new(),
            networks: BTreeMap::new(),
            network_mode: "default".to_owned(),
        }
    }

    fn sh() -> Vec<String> {
        vec!["sh".to_owned()]
    }

    #[tokio::test]
    async fn bridges_until_shell_exits() {
        // Given
        let (exec, out_tx, mut stdin_reader) = MockExec::new();
        let sink = RecordingSink::default();
        let (handles, channels) = bridge_channels();
        let container = web1();
        let command = sh();

        let shutdown = CancellationToken::new();

        let bridge = run_bridge(
            &exec,
            &sink,
            &container,
            &command,
            PtySize { cols: 80, rows: 24 },
            channels,
            &shutdown,
        );
        let driver = async {
            // When: 셸 출력과 사용자 입력이 오간 뒤 셸 종료
            out_tx.unbounded_send(Ok(Bytes::from_static(b"$ "))).unwrap();
            handles.input.send(Bytes::from_static(b"exit\n")).await.unwrap();
            let mut got = [0u8; 5];
            stdin_reader.read_exact(&mut got).await.unwrap();
            assert_eq!(&got, b"exit\n");
            handles.resize.send(PtySize { cols: 100, rows: 30 }).await.unwrap();
            tokio::task::yield_now().await;
            drop(out_tx);
        };
        let (outcome, ()) = tokio::join!(bridge, driver);

        // Then
        assert_eq!(outcome.exit_status, EXIT_OK);
        assert_eq!(outcome.to_exec, 5);
        assert_eq!(outcome.to_session, 2);
        assert_eq!(sink.text(), "Connected to container web1\r\n$ ");
        assert_eq!(sink.exit_status(), Some(EXIT_OK));
        assert_eq!(exec.resizes.lock().unwrap()[0], (80, 24));
    }

    #[tokio::test]
    async fn client_eof_closes_exec_stdin() {
        let (exec, out_tx, mut stdin_reader) = MockExec::new();
        let sink = RecordingSink::default();
        let (handles, channels) = bridge_channels();
        let container = web1();
        let command = sh();

        let shutdown = CancellationToken::new();

        let bridge = run_bridge(
            &exec,
            &sink,
            &container,
            &command,
            PtySize::default(),
            channels,
            &shutdown,
        );
        let driver = async {
            handles.input.send(Bytes::from_static(b"echo hi\n")).await.unwrap();
            // 클라이언트 EOF
            drop(handles);
            let mut buf = Vec::new();
            stdin_reader.read_to_end(&mut buf).await.unwrap();
            assert_eq!(buf, b"echo hi\n");
            drop(out_tx);
        };
        let (outcome, ()) = tokio::join!(bridge, driver);

        assert_eq!(outcome.exit_status, EXIT_OK);
        // 크기 0은 전달하지 않음
        assert!(exec.resizes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exec_failure_exits_with_one() {
        let (mut exec, _out_tx, _stdin) = MockExec::new();
        exec.fail_create = true;
        let sink = RecordingSink::default();
        let (_handles, channels) = bridge_channels();

        let shutdown = CancellationToken::new();

        let outcome = run_bridge(
            &exec,
            &sink,
            &web1(),
            &sh(),
            PtySize::default(),
            channels,
            &shutdown,
        )
        .await;

        assert_eq!(outcome.exit_status, EXIT_EXEC_FAILED);
        assert_eq!(sink.exit_status(), Some(EXIT_EXEC_FAILED));
        assert!(sink.text().contains("container is not running"));
    }

    #[tokio::test]
    async fn shutdown_ends_idle_shell() {
        // Given: 셸이 아무것도 출력하지 않고 클라이언트도 조용함
        let (exec, _out_tx, _stdin) = MockExec::new();
        let sink = RecordingSink::default();
        let (_handles, channels) = bridge_channels();
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();

        // When
        let target = web1();
        let shell = sh();
        let bridge = run_bridge(
            &exec,
            &sink,
            &target,
            &shell,
            PtySize::default(),
            channels,
            &shutdown,
        );
        let driver = async {
            tokio::task::yield_now().await;
            trigger.cancel();
        };
        let (outcome, ()) = tokio::time::timeout(
            std::time::Duration::from_secs(2),
            async { tokio::join!(bridge, driver) },
        )
        .await
        .expect("bridge should stop on shutdown");

        // Then: 입력 방향까지 정리하고 세션을 닫음
        assert_eq!(outcome.exit_status, EXIT_OK);
        assert_eq!(sink.exit_status(), Some(EXIT_OK));
        assert!(sink.text().contains("shutting down"));
    }

    #[tokio::test]
    async fn close_session_writes_message() {
        let sink = RecordingSink::default();
        close_session(&sink, "bye\r\n", 2).await;
        assert_eq!(sink.text(), "bye\r\n");
        assert_eq!(sink.exit_status(), Some(2));
    }
}
