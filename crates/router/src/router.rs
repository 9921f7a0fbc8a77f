//! 연결 라우터 -- 라우트별 리스너와 연결 처리
//!
//! [`ConnectionRouter`]는 core의 [`Pipeline`] trait을 구현하여
//! `dockroute-daemon`에서 다른 모듈과 동일한 생명주기로 관리됩니다.
//!
//! # 라우트
//! - 호스트 라우트: 스니핑한 Host/SNI가 `host_pattern`과 일치하면 [`AliasRouter`]로
//!   컨테이너를 찾아 `ip:backend_port`로 연결합니다.
//! - 선택 대상 라우트: 포트마다 하나. 운영자가 지정한 컨테이너의 `ip:backend_port`로 연결합니다.
//!
//! 모든 리스너는 시작 시 먼저 바인드되며, 하나라도 실패하면 어떤 accept 루프도
//! 시작되지 않습니다.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use regex::Regex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dockroute_core::error::{DockrouteError, PipelineError};
use dockroute_core::metrics as m;
use dockroute_core::pipeline::{HealthStatus, Pipeline};
use dockroute_registry::{AliasRouter, SelectedTarget, SelectedTargetRegistry};

use crate::config::ConnectionRouterConfig;
use crate::error::RouterError;
use crate::relay::{RelayEnd, RelayStats, dial_backend, relay};
use crate::sniff::{SniffLimits, sniff_routing_key};

/// 호스트 라우트 이름
pub const HOST_ROUTE: &str = "host";

/// accept 실패 후 재시도 대기
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// 라우터 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RouterState {
    Initialized,
    Running,
    Stopped,
}

/// 라우트 종류
pub enum RouteKind {
    /// Host/SNI 기반 별칭 라우팅
    Host {
        /// 허용 호스트 패턴
        pattern: Regex,
        /// 백엔드 포트
        backend_port: u16,
    },
    /// 고정 포트의 선택 대상
    Selected(Arc<SelectedTarget>),
}

/// 리스너 하나에 대응하는 라우트
pub struct Route {
    /// 라우트 이름 (`host` 또는 선택 대상 이름)
    pub name: String,
    /// 바인드 주소
    pub bind: SocketAddr,
    /// 라우트 종류
    pub kind: RouteKind,
}

/// 연결 처리에 필요한 공유 상태
struct RouteContext {
    route: Route,
    alias_router: AliasRouter,
    limits: SniffLimits,
    dial_timeout: Duration,
}

/// 연결 라우터
///
/// # 사용 예시
/// ```ignore
/// use dockroute_router::{ConnectionRouterBuilder, ConnectionRouterConfig};
///
/// let mut router = ConnectionRouterBuilder::new()
///     .config(ConnectionRouterConfig::from_core(&core_config))
///     .alias_router(registry.alias_router())
///     .targets(registry.targets())
///     .build()?;
/// router.start().await?;
/// ```
pub struct ConnectionRouter {
    config: ConnectionRouterConfig,
    state: RouterState,
    routes: Vec<Arc<RouteContext>>,
    permits: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
    tasks: Vec<(String, JoinHandle<()>)>,
    local_addrs: Vec<(String, SocketAddr)>,
}

impl ConnectionRouter {
    /// 현재 상태명을 반환합니다.
    pub fn state_name(&self) -> &str {
        match self.state {
            RouterState::Initialized => "initialized",
            RouterState::Running => "running",
            RouterState::Stopped => "stopped",
        }
    }

    /// 라우터 설정
    pub fn config(&self) -> &ConnectionRouterConfig {
        &self.config
    }

    /// 라우트 이름 목록
    pub fn route_names(&self) -> Vec<&str> {
        self.routes.iter().map(|r| r.route.name.as_str()).collect()
    }

    /// 바인드된 리스너 주소 (시작 후에만 채워짐)
    pub fn local_addrs(&self) -> &[(String, SocketAddr)] {
        &self.local_addrs
    }

    /// 라우트 이름으로 바인드된 주소를 찾습니다.
    pub fn local_addr(&self, route: &str) -> Option<SocketAddr> {
        self.local_addrs
            .iter()
            .find(|(name, _)| name == route)
            .map(|(_, addr)| *addr)
    }
}

impl Pipeline for ConnectionRouter {
    async fn start(&mut self) -> Result<(), DockrouteError> {
        if self.state == RouterState::Running {
            return Err(PipelineError::AlreadyRunning.into());
        }
        if self.state == RouterState::Stopped {
            return Err(PipelineError::InitFailed(
                "router was stopped, rebuild it to restart".to_owned(),
            )
            .into());
        }

        // 1. 모든 리스너를 먼저 바인드
        let mut listeners = Vec::with_capacity(self.routes.len());
        for ctx in &self.routes {
            let listener =
                TcpListener::bind(ctx.route.bind)
                    .await
                    .map_err(|e| RouterError::Bind {
                        addr: ctx.route.bind.to_string(),
                        reason: e.to_string(),
                    })?;
            let local = listener.local_addr().map_err(|e| RouterError::Bind {
                addr: ctx.route.bind.to_string(),
                reason: e.to_string(),
            })?;
            listeners.push((Arc::clone(ctx), listener, local));
        }

        // 2. accept 루프 스폰
        for (ctx, listener, local) in listeners {
            info!(route = %ctx.route.name, addr = %local, "router listening");
            self.local_addrs.push((ctx.route.name.clone(), local));
            let name = ctx.route.name.clone();
            let task = tokio::spawn(accept_loop(
                listener,
                ctx,
                self.permits.clone(),
                self.cancel.clone(),
            ));
            self.tasks.push((name, task));
        }

        self.state = RouterState::Running;
        info!(routes = self.tasks.len(), "connection router started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DockrouteError> {
        if self.state != RouterState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        info!("stopping connection router");
        // 리스너와 진행 중인 릴레이 모두 취소
        self.cancel.cancel();
        for (_, task) in self.tasks.drain(..) {
            task.abort();
            let _ = task.await;
        }
        self.local_addrs.clear();

        self.state = RouterState::Stopped;
        info!("connection router stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.state {
            RouterState::Running => {
                match self.tasks.iter().find(|(_, task)| task.is_finished()) {
                    Some((name, _)) => HealthStatus::Unhealthy(format!("listener {name} exited")),
                    None => HealthStatus::Healthy,
                }
            }
            RouterState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            RouterState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    ctx: Arc<RouteContext>,
    permits: Option<Arc<Semaphore>>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!(route = %ctx.route.name, "listener shutting down");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!(route = %ctx.route.name, error = %e, "accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                        continue;
                    }
                };

                let permit = match &permits {
                    Some(semaphore) => match Arc::clone(semaphore).try_acquire_owned() {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            counter!(
                                m::ROUTER_REJECTED_TOTAL,
                                m::LABEL_ROUTE => ctx.route.name.clone(),
                                m::LABEL_REASON => "capacity"
                            )
                            .increment(1);
                            warn!(route = %ctx.route.name, %peer, "max connections reached, closing connection");
                            continue;
                        }
                    },
                    None => None,
                };

                let ctx = Arc::clone(&ctx);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    gauge!(m::ROUTER_ACTIVE_CONNECTIONS).increment(1.0);
                    let result = serve_connection(&ctx, stream, &cancel).await;
                    gauge!(m::ROUTER_ACTIVE_CONNECTIONS).decrement(1.0);
                    record_outcome(&ctx.route.name, peer, result);
                    drop(permit);
                });
            }
        }
    }
}

fn record_outcome(route: &str, peer: SocketAddr, result: Result<RelayStats, RouterError>) {
    match result {
        Ok(stats) => {
            let outcome = match stats.end {
                RelayEnd::Closed => "closed",
                RelayEnd::Cancelled => "cancelled",
            };
            counter!(
                m::ROUTER_CONNECTIONS_TOTAL,
                m::LABEL_ROUTE => route.to_owned(),
                m::LABEL_RESULT => outcome
            )
            .increment(1);
            counter!(m::ROUTER_BYTES_TOTAL, m::LABEL_ROUTE => route.to_owned())
                .increment(stats.client_to_backend + stats.backend_to_client);
            debug!(
                route,
                %peer,
                sent = stats.client_to_backend,
                received = stats.backend_to_client,
                outcome,
                "connection finished"
            );
        }
        Err(e) => {
            counter!(
                m::ROUTER_REJECTED_TOTAL,
                m::LABEL_ROUTE => route.to_owned(),
                m::LABEL_REASON => e.reason()
            )
            .increment(1);
            match e {
                RouterError::Dial { .. } | RouterError::Relay(_) => {
                    warn!(route, %peer, error = %e, "connection failed");
                }
                _ => debug!(route, %peer, error = %e, "connection closed without routing"),
            }
        }
    }
}

async fn serve_connection(
    ctx: &RouteContext,
    mut client: TcpStream,
    cancel: &CancellationToken,
) -> Result<RelayStats, RouterError> {
    let (addr, prefix) = match &ctx.route.kind {
        RouteKind::Host {
            pattern,
            backend_port,
        } => {
            let started = Instant::now();
            let sniffed = sniff_routing_key(&mut client, ctx.limits).await?;
            histogram!(m::ROUTER_SNIFF_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

            if !pattern.is_match(&sniffed.host) {
                return Err(RouterError::HostMismatch(sniffed.host));
            }
            let backend = ctx
                .alias_router
                .resolve(&sniffed.host)
                .ok_or_else(|| RouterError::NoRoute(sniffed.host.clone()))?;

            let addr = SocketAddr::new(backend.address, *backend_port);
            info!(
                host = %sniffed.host,
                protocol = %sniffed.protocol,
                container = %backend.container_name,
                backend = %addr,
                "forwarding connection"
            );
            (addr, sniffed.buffered.freeze())
        }
        RouteKind::Selected(target) => {
            let pinned = target
                .container()
                .await
                .ok_or(RouterError::NoTarget(target.port))?;
            // 고정 이후 재구성으로 주소가 바뀌었을 수 있으므로 현재 스냅샷에서 다시 찾음
            let snapshot = ctx.alias_router.snapshot();
            let current = snapshot
                .container_by_id(&pinned.id)
                .cloned()
                .unwrap_or(pinned);
            let ip = current
                .primary_address()
                .ok_or(RouterError::NoTarget(target.port))?;

            let addr = SocketAddr::new(ip, target.backend_port);
            info!(
                target_name = %target.name,
                container = %current,
                backend = %addr,
                "forwarding connection"
            );
            (addr, bytes::Bytes::new())
        }
    };

    let mut upstream = dial_backend(addr, ctx.dial_timeout).await?;
    relay(&mut client, &mut upstream, &prefix, cancel).await
}

/// 연결 라우터 빌더
pub struct ConnectionRouterBuilder {
    config: ConnectionRouterConfig,
    alias_router: Option<AliasRouter>,
    targets: Option<Arc<SelectedTargetRegistry>>,
    host_bind: Option<SocketAddr>,
    target_binds: HashMap<u16, SocketAddr>,
}

impl ConnectionRouterBuilder {
    /// 새 빌더를 생성합니다.
    pub fn new() -> Self {
        Self {
            config: ConnectionRouterConfig::default(),
            alias_router: None,
            targets: None,
            host_bind: None,
            target_binds: HashMap::new(),
        }
    }

    /// 라우터 설정을 지정합니다.
    pub fn config(mut self, config: ConnectionRouterConfig) -> Self {
        self.config = config;
        self
    }

    /// 별칭 라우터를 설정합니다.
    pub fn alias_router(mut self, router: AliasRouter) -> Self {
        self.alias_router = Some(router);
        self
    }

    /// 선택 대상 레지스트리를 설정합니다. 항목마다 리스너가 하나씩 생깁니다.
    pub fn targets(mut self, targets: Arc<SelectedTargetRegistry>) -> Self {
        self.targets = Some(targets);
        self
    }

    /// 호스트 라우트 바인드 주소를 직접 지정합니다.
    pub fn host_bind(mut self, addr: SocketAddr) -> Self {
        self.host_bind = Some(addr);
        self
    }

    /// 선택 대상 포트의 바인드 주소를 직접 지정합니다.
    pub fn target_bind(mut self, port: u16, addr: SocketAddr) -> Self {
        self.target_binds.insert(port, addr);
        self
    }

    /// 라우터를 빌드합니다.
    pub fn build(self) -> Result<ConnectionRouter, RouterError> {
        self.config.validate()?;

        let alias_router = self.alias_router.ok_or_else(|| RouterError::Config {
            field: "alias_router".to_owned(),
            reason: "alias router must be provided".to_owned(),
        })?;
        let pattern = Regex::new(&self.config.host_pattern).map_err(|e| RouterError::Config {
            field: "host_pattern".to_owned(),
            reason: format!("invalid regex: {e}"),
        })?;
        let ip = self.config.listen_ip()?;
        let limits = self.config.sniff_limits();
        let dial_timeout = self.config.dial_timeout();

        let context = |route: Route| {
            Arc::new(RouteContext {
                route,
                alias_router: alias_router.clone(),
                limits,
                dial_timeout,
            })
        };

        let mut routes = vec![context(Route {
            name: HOST_ROUTE.to_owned(),
            bind: self
                .host_bind
                .unwrap_or_else(|| SocketAddr::new(ip, self.config.listen_port)),
            kind: RouteKind::Host {
                pattern,
                backend_port: self.config.backend_port,
            },
        })];

        if let Some(targets) = &self.targets {
            for target in targets.targets() {
                routes.push(context(Route {
                    name: target.name.clone(),
                    bind: self
                        .target_binds
                        .get(&target.port)
                        .copied()
                        .unwrap_or_else(|| SocketAddr::new(ip, target.port)),
                    kind: RouteKind::Selected(Arc::clone(target)),
                }));
            }
        }

        let permits = (self.config.max_connections > 0)
            .then(|| Arc::new(Semaphore::new(self.config.max_connections)));

        Ok(ConnectionRouter {
            config: self.config,
            state: RouterState::Initialized,
            routes,
            permits,
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            local_addrs: Vec::new(),
        })
    }
}

impl Default for ConnectionRouterBuilder {
    fn default() -> Self {
        Self::new()
    }
}
