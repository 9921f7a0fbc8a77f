//! SSH 서버 -- russh 핸들러와 리스너 생명주기
//!
//! [`ShellBridge`]는 core의 [`Pipeline`] trait을 구현합니다.
//! SSH 세션마다 태스크 하나, 셸이 연결된 채널마다 브릿지 태스크 하나가 생깁니다.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use metrics::counter;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, CryptoVec, MethodSet, Pty};
use russh_keys::key::KeyPair;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dockroute_core::error::{DockrouteError, PipelineError};
use dockroute_core::metrics as m;
use dockroute_core::pipeline::{HealthStatus, Pipeline};
use dockroute_registry::{ContainerExec, SnapshotReader};

use crate::bridge::{SessionSink, bridge_channels, close_session, run_bridge};
use crate::config::ShellBridgeConfig;
use crate::error::ShellBridgeError;
use crate::session::{EXIT_OK, PtySize, SessionPlan, ShellRequest, plan_session};

/// 인증 실패 응답 지연
const AUTH_REJECTION_TIME: Duration = Duration::from_secs(1);
/// 종료 시 세션이 exit-status/close를 보내고 끝날 때까지 기다리는 시간
const SESSION_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// OpenSSH 형식의 호스트 키를 읽습니다.
pub fn load_host_key(path: &str) -> Result<KeyPair, ShellBridgeError> {
    russh_keys::load_secret_key(path, None).map_err(|e| ShellBridgeError::HostKey {
        path: path.to_owned(),
        reason: e.to_string(),
    })
}

/// russh 채널 핸들을 [`SessionSink`]로 감쌉니다.
pub struct ChannelSink {
    handle: server::Handle,
    channel: ChannelId,
}

impl SessionSink for ChannelSink {
    async fn write(&self, data: Bytes) -> Result<(), ShellBridgeError> {
        self.handle
            .data(self.channel, CryptoVec::from_slice(&data))
            .await
            .map_err(|_| ShellBridgeError::SessionClosed)
    }

    async fn finish(&self, exit_status: u32) {
        let _ = self
            .handle
            .exit_status_request(self.channel, exit_status)
            .await;
        let _ = self.handle.eof(self.channel).await;
        let _ = self.handle.close(self.channel).await;
    }
}

#[derive(Default)]
struct ChannelState {
    pty: Option<PtySize>,
    started: bool,
    input: Option<mpsc::Sender<Bytes>>,
    resize: Option<mpsc::Sender<PtySize>>,
}

/// SSH 세션 하나의 핸들러
struct SessionHandler<E> {
    exec: Arc<E>,
    reader: SnapshotReader,
    command: Arc<Vec<String>>,
    peer: SocketAddr,
    user: Option<String>,
    channels: HashMap<ChannelId, ChannelState>,
    /// 서버 토큰의 자식. 취소되면 브릿지가 셸을 닫음
    shutdown: CancellationToken,
    /// 채널별 브릿지 태스크. 핸들러가 드롭되면 함께 중단됨
    bridges: JoinSet<()>,
}

impl<E: ContainerExec> SessionHandler<E> {
    fn new(context: &AcceptContext<E>, peer: SocketAddr, shutdown: CancellationToken) -> Self {
        Self {
            exec: Arc::clone(&context.exec),
            reader: context.reader.clone(),
            command: Arc::clone(&context.command),
            peer,
            user: None,
            channels: HashMap::new(),
            shutdown,
            bridges: JoinSet::new(),
        }
    }

    fn accept_user(&mut self, user: &str, method: &str) -> Auth {
        debug!(peer = %self.peer, user, method, "ssh user accepted");
        self.user = Some(user.to_owned());
        Auth::Accept
    }

    /// shell/exec 요청을 계획하고 처리 태스크를 스폰합니다.
    fn start(&mut self, channel: ChannelId, request: ShellRequest, handle: server::Handle) {
        let Some(state) = self.channels.get_mut(&channel) else {
            return;
        };
        if state.started {
            debug!(peer = %self.peer, "ignoring repeated shell request on channel");
            return;
        }
        state.started = true;
        // 끝난 브릿지 정리
        while self.bridges.try_join_next().is_some() {}

        let user = self.user.clone().unwrap_or_default();
        let snapshot = self.reader.current();
        let sink = ChannelSink { handle, channel };

        match plan_session(&snapshot, &user, &request) {
            SessionPlan::Close {
                message,
                exit_status,
            } => {
                let result = if exit_status == EXIT_OK {
                    "unknown_user"
                } else {
                    "not_interactive"
                };
                counter!(m::SHELL_SESSIONS_TOTAL, m::LABEL_RESULT => result).increment(1);
                info!(peer = %self.peer, user = %user, exit_status, reason = result, "closing shell session");
                self.bridges.spawn(async move {
                    close_session(&sink, &message, exit_status).await;
                });
            }
            SessionPlan::Attach { container, pty } => {
                let (handles, bridge) = bridge_channels();
                state.input = Some(handles.input);
                state.resize = Some(handles.resize);

                info!(peer = %self.peer, user = %user, container = %container, "attaching shell");
                let exec = Arc::clone(&self.exec);
                let command = Arc::clone(&self.command);
                let peer = self.peer;
                let shutdown = self.shutdown.clone();
                self.bridges.spawn(async move {
                    let outcome = run_bridge(
                        exec.as_ref(),
                        &sink,
                        &container,
                        &command,
                        pty,
                        bridge,
                        &shutdown,
                    )
                    .await;
                    info!(
                        %peer,
                        container = %container,
                        exit_status = outcome.exit_status,
                        to_session = outcome.to_session,
                        to_exec = outcome.to_exec,
                        "shell session finished"
                    );
                });
            }
        }
    }
}

#[async_trait]
impl<E: ContainerExec> server::Handler for SessionHandler<E> {
    type Error = ShellBridgeError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept_user(user, "none"))
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept_user(user, "password"))
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        // 데이터는 핸들러 콜백으로 받으므로 채널 객체는 보관하지 않음
        self.channels.insert(channel.id(), ChannelState::default());
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn pty_request(
        &mut self,
        channel: ChannelId,
        _term: &str,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.pty = Some(PtySize::from_request(col_width, row_height));
        }
        let _ = session.channel_success(channel);
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let pty = self.channels.get(&channel).and_then(|state| state.pty);
        let _ = session.channel_success(channel);
        self.start(channel, ShellRequest::Shell { pty }, session.handle());
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        let command = String::from_utf8_lossy(data).into_owned();
        let _ = session.channel_success(channel);
        self.start(channel, ShellRequest::Exec { command }, session.handle());
        Ok(())
    }

    async fn data(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(input) = self.channels.get(&channel).and_then(|s| s.input.as_ref()) {
            // 브릿지가 이미 끝났으면 버림
            let _ = input.send(Bytes::copy_from_slice(data)).await;
        }
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        col_width: u32,
        row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(resize) = self.channels.get(&channel).and_then(|s| s.resize.as_ref()) {
            let _ = resize.try_send(PtySize::from_request(col_width, row_height));
        }
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        if let Some(state) = self.channels.get_mut(&channel) {
            state.input = None;
        }
        Ok(())
    }

    async fn channel_close(
        &mut self,
        channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.channels.remove(&channel);
        Ok(())
    }
}

/// 셸 브릿지 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BridgeState {
    Initialized,
    Running,
    Stopped,
}

/// SSH 셸 브릿지
///
/// # 사용 예시
/// ```ignore
/// use dockroute_shell_bridge::{ShellBridgeBuilder, ShellBridgeConfig};
///
/// let mut bridge = ShellBridgeBuilder::new()
///     .config(ShellBridgeConfig::from_core(&core_config))
///     .exec(registry.docker())
///     .reader(registry.reader())
///     .build()?;
/// bridge.start().await?;
/// ```
pub struct ShellBridge<E: ContainerExec> {
    config: ShellBridgeConfig,
    exec: Arc<E>,
    reader: SnapshotReader,
    bind: Option<SocketAddr>,
    state: BridgeState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl<E: ContainerExec> ShellBridge<E> {
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            BridgeState::Initialized => "initialized",
            BridgeState::Running => "running",
            BridgeState::Stopped => "stopped",
        }
    }

    /// 셸 브릿지 설정
    pub fn config(&self) -> &ShellBridgeConfig {
        &self.config
    }

    /// 바인드된 리스너 주소 (실행 중일 때만)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl<E: ContainerExec> Pipeline for ShellBridge<E> {
    async fn start(&mut self) -> Result<(), DockrouteError> {
        if self.state == BridgeState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        if self.state == BridgeState::Stopped {
            return Err(PipelineError::InitFailed(
                "shell bridge was stopped, rebuild it to restart".to_owned(),
            )
            .into());
        }

        // 1. 호스트 키 (없으면 시작 실패)
        let key = load_host_key(&self.config.host_key_path)?;
        let ssh_config = Arc::new(server::Config {
            methods: MethodSet::NONE | MethodSet::PASSWORD,
            auth_rejection_time: AUTH_REJECTION_TIME,
            inactivity_timeout: self.config.inactivity_timeout(),
            keys: vec![key],
            ..Default::default()
        });

        // 2. 리스너 바인드
        let addr = match self.bind {
            Some(addr) => addr,
            None => self.config.socket_addr()?,
        };
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ShellBridgeError::Bind {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        let local = listener.local_addr().map_err(|e| ShellBridgeError::Bind {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        // 3. accept 루프
        let context = AcceptContext {
            ssh_config,
            exec: Arc::clone(&self.exec),
            reader: self.reader.clone(),
            command: Arc::new(self.config.command.clone()),
        };
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            context,
            self.cancel.clone(),
        )));
        self.local_addr = Some(local);

        self.state = BridgeState::Running;
        info!(addr = %local, "shell bridge listening");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DockrouteError> {
        if self.state != BridgeState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping shell bridge");
        self.cancel.cancel();
        if let Some(mut task) = self.task.take() {
            // accept 루프는 세션이 정리될 때까지 기다린 뒤 끝남
            if tokio::time::timeout(SESSION_DRAIN_TIMEOUT * 2, &mut task)
                .await
                .is_err()
            {
                warn!("ssh sessions did not drain in time, aborting");
                task.abort();
                let _ = task.await;
            }
        }
        self.local_addr = None;

        self.state = BridgeState::Stopped;
        info!("shell bridge stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            BridgeState::Running => match &self.task {
                Some(task) if !task.is_finished() => HealthStatus::Healthy,
                _ => HealthStatus::Unhealthy("ssh listener exited".to_owned()),
            },
            BridgeState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            BridgeState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

struct AcceptContext<E> {
    ssh_config: Arc<server::Config>,
    exec: Arc<E>,
    reader: SnapshotReader,
    command: Arc<Vec<String>>,
}

async fn accept_loop<E: ContainerExec>(
    listener: TcpListener,
    context: AcceptContext<E>,
    cancel: CancellationToken,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(active = sessions.len(), "ssh listener shutting down");
                break;
            }
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(error = %e, "ssh accept failed");
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        continue;
                    }
                };

                let shutdown = cancel.child_token();
                let handler = SessionHandler::new(&context, peer, shutdown.clone());
                let config = Arc::clone(&context.ssh_config);
                sessions.spawn(run_session(config, stream, handler, peer, shutdown));
            }
        }
    }

    // 리스너를 먼저 닫고 남은 세션을 기다림
    drop(listener);
    while sessions.join_next().await.is_some() {}
}

/// SSH 세션 하나를 끝까지 처리합니다.
///
/// `shutdown` 이후에는 브릿지가 세션을 닫을 시간을 [`SESSION_DRAIN_TIMEOUT`]만큼 주고,
/// 그래도 남아 있으면 세션을 드롭해 연결을 끊습니다.
async fn run_session<E: ContainerExec>(
    config: Arc<server::Config>,
    stream: TcpStream,
    handler: SessionHandler<E>,
    peer: SocketAddr,
    shutdown: CancellationToken,
) {
    let session = serve_session(config, stream, handler);
    tokio::pin!(session);

    let result = tokio::select! {
        result = &mut session => result,
        _ = shutdown.cancelled() => {
            match tokio::time::timeout(SESSION_DRAIN_TIMEOUT, &mut session).await {
                Ok(result) => result,
                Err(_) => {
                    debug!(%peer, "ssh session cancelled");
                    return;
                }
            }
        }
    };
    if let Err(e) = result {
        debug!(%peer, error = %e, "ssh session ended with error");
    }
}

async fn serve_session<E: ContainerExec>(
    config: Arc<server::Config>,
    stream: TcpStream,
    handler: SessionHandler<E>,
) -> Result<(), ShellBridgeError> {
    let session = server::run_stream(config, stream, handler).await?;
    session.await
}

/// 셸 브릿지 빌더
pub struct ShellBridgeBuilder<E: ContainerExec> {
    config: ShellBridgeConfig,
    exec: Option<Arc<E>>,
    reader: Option<SnapshotReader>,
    bind: Option<SocketAddr>,
}

impl<E: ContainerExec> ShellBridgeBuilder<E> {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ShellBridgeConfig::default(),
            exec: None,
            reader: None,
            bind: None,
        }
    }

    /// 셸 브릿지 설정을 지정합니다.
    pub fn config(mut self, config: ShellBridgeConfig) -> Self {
        self.config = config;
        self
    }

    /// exec 클라이언트를 설정합니다.
    pub fn exec(mut self, exec: Arc<E>) -> Self {
        self.exec = Some(exec);
        self
    }

    /// 스냅샷 리더를 설정합니다.
    pub fn reader(mut self, reader: SnapshotReader) -> Self {
        self.reader = Some(reader);
        self
    }

    /// 바인드 주소를 직접 지정합니다.
    pub fn bind(mut self, addr: SocketAddr) -> Self {
        self.bind = Some(addr);
        self
    }

    /// 셸 브릿지를 빌드합니다.
    pub fn build(self) -> Result<ShellBridge<E>, ShellBridgeError> {
        self.config.validate()?;

        let exec = self.exec.ok_or_else(|| ShellBridgeError::Config {
            field: "exec".to_owned(),
            reason: "exec client must be provided".to_owned(),
        })?;
        let reader = self.reader.ok_or_else(|| ShellBridgeError::Config {
            field: "reader".to_owned(),
            reason: "snapshot reader must be provided".to_owned(),
        })?;

        Ok(ShellBridge {
            config: self.config,
            exec,
            reader,
            bind: self.bind,
            state: BridgeState::Initialized,
            cancel: CancellationToken::new(),
            task: None,
            local_addr: None,
        })
    }
}

impl<E: ContainerExec> Default for ShellBridgeBuilder<E> {
    fn default() -> Self {
        Self::new()
    }
}
