//! Admin dashboard -- JSON HTTP surface over [`AdminService`].
//!
//! [`AdminServer`] implements [`Pipeline`] so the orchestrator manages it like
//! any other module. Handlers never touch Docker: reads come from the current
//! snapshot and target changes go through the selected-target registry.
//!
//! # Routes
//!
//! | Method | Path | Result |
//! |--------|------|--------|
//! | GET | `/health` | aggregated daemon health (503 when unhealthy) |
//! | GET | `/api/snapshot` | snapshot version and counts |
//! | GET | `/api/containers` | containers in the current snapshot |
//! | GET | `/api/networks` | matching networks |
//! | GET | `/api/networks/:id` | network with its containers |
//! | GET | `/api/targets` | selected targets |
//! | PUT | `/api/targets/:port` | pin a container (`{"container": "<id or name>"}`) |
//! | DELETE | `/api/targets/:port` | clear the pin |

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dockroute_core::error::{DockrouteError, PipelineError};
use dockroute_core::pipeline::{HealthStatus, Pipeline};
use dockroute_core::types::{Container, Network};
use dockroute_registry::{
    AdminService, NetworkView, RegistryError, SelectedTargetView, SnapshotSummary,
};

use crate::health::DaemonHealth;

/// 핸들러 공유 상태
#[derive(Clone)]
pub struct AppState {
    admin: AdminService,
    health: watch::Receiver<DaemonHealth>,
}

impl AppState {
    /// 관리 서비스와 건강 상태 수신기로 상태를 만듭니다.
    pub fn new(admin: AdminService, health: watch::Receiver<DaemonHealth>) -> Self {
        Self { admin, health }
    }
}

/// `PUT /api/targets/:port` 요청 본문
#[derive(Debug, Deserialize)]
pub struct SetTargetRequest {
    /// 컨테이너 ID, 유일한 ID 접두어, 또는 이름
    pub container: String,
}

/// API 에러 응답
///
/// 본문은 항상 `{"error": "<message>"}` 입니다.
#[derive(Debug)]
pub enum ApiError {
    /// 404
    NotFound(String),
    /// 500
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn message(&self) -> &str {
        match self {
            Self::NotFound(msg) | Self::Internal(msg) => msg,
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::TargetNotFound(_) | RegistryError::ContainerNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = serde_json::json!({ "error": self.message() });
        (status, Json(body)).into_response()
    }
}

/// 대시보드 라우터를 만듭니다.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/snapshot", get(snapshot))
        .route("/api/containers", get(containers))
        .route("/api/networks", get(networks))
        .route("/api/networks/:id", get(network))
        .route("/api/targets", get(targets))
        .route("/api/targets/:port", get(target).put(set_target).delete(clear_target))
        .with_state(state)
}

/// GET /health
async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let report = state.health.borrow().clone();
    let status = if report.status.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(report))
}

/// GET /api/snapshot
async fn snapshot(State(state): State<AppState>) -> Json<SnapshotSummary> {
    Json(state.admin.snapshot_summary())
}

/// GET /api/containers
async fn containers(State(state): State<AppState>) -> Json<Vec<Arc<Container>>> {
    Json(state.admin.containers())
}

/// GET /api/networks
async fn networks(State(state): State<AppState>) -> Json<Vec<Network>> {
    Json(state.admin.networks())
}

/// GET /api/networks/:id
async fn network(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<NetworkView>, ApiError> {
    state
        .admin
        .network(&id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("network not found: {id}")))
}

/// GET /api/targets
async fn targets(State(state): State<AppState>) -> Json<Vec<SelectedTargetView>> {
    Json(state.admin.selected_targets().await)
}

/// GET /api/targets/:port
async fn target(
    State(state): State<AppState>,
    Path(port): Path<u16>,
) -> Result<Json<SelectedTargetView>, ApiError> {
    state
        .admin
        .selected_targets()
        .await
        .into_iter()
        .find(|t| t.port == port)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("selected target not found: {port}")))
}

/// PUT /api/targets/:port
async fn set_target(
    State(state): State<AppState>,
    Path(port): Path<u16>,
    Json(body): Json<SetTargetRequest>,
) -> Result<Json<SelectedTargetView>, ApiError> {
    let view = state.admin.set_selected_target(port, &body.container).await?;
    info!(port, container = %body.container, "selected target updated via dashboard");
    Ok(Json(view))
}

/// DELETE /api/targets/:port
async fn clear_target(
    State(state): State<AppState>,
    Path(port): Path<u16>,
) -> Result<StatusCode, ApiError> {
    state.admin.clear_selected_target(port).await?;
    info!(port, "selected target cleared via dashboard");
    Ok(StatusCode::NO_CONTENT)
}

/// 서버 실행 상태
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerState {
    Initialized,
    Running,
    Stopped,
}

/// 대시보드 HTTP 서버
pub struct AdminServer {
    listen_addr: SocketAddr,
    state: AppState,
    server_state: ServerState,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl AdminServer {
    /// 새 서버를 생성합니다. 바인딩은 `start()`에서 합니다.
    pub fn new(listen_addr: SocketAddr, state: AppState) -> Self {
        Self {
            listen_addr,
            state,
            server_state: ServerState::Initialized,
            cancel: CancellationToken::new(),
            task: None,
            local_addr: None,
        }
    }

    /// 실제 바인딩된 주소 (포트 0으로 바인딩한 경우 확인용)
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Pipeline for AdminServer {
    async fn start(&mut self) -> Result<(), DockrouteError> {
        match self.server_state {
            ServerState::Running => return Err(PipelineError::AlreadyRunning.into()),
            ServerState::Stopped => {
                return Err(PipelineError::InitFailed(
                    "admin server cannot be restarted after stop".to_owned(),
                )
                .into());
            }
            ServerState::Initialized => {}
        }

        let listener = TcpListener::bind(self.listen_addr).await.map_err(|e| {
            PipelineError::InitFailed(format!(
                "failed to bind admin dashboard on {}: {e}",
                self.listen_addr
            ))
        })?;
        let local_addr = listener.local_addr()?;

        let app = router(self.state.clone());
        let cancel = self.cancel.clone();
        self.task = Some(tokio::spawn(async move {
            let shutdown = async move { cancel.cancelled().await };
            if let Err(e) = axum::serve(listener, app)
                .with_graceful_shutdown(shutdown)
                .await
            {
                warn!(error = %e, "admin dashboard server exited with error");
            }
        }));

        self.local_addr = Some(local_addr);
        self.server_state = ServerState::Running;
        info!(listen_addr = %local_addr, "admin dashboard listening");
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DockrouteError> {
        if self.server_state != ServerState::Running {
            return Err(PipelineError::NotRunning.into());
        }

        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }

        self.server_state = ServerState::Stopped;
        info!("admin dashboard stopped");
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match self.server_state {
            ServerState::Running => match &self.task {
                Some(task) if !task.is_finished() => HealthStatus::Healthy,
                _ => HealthStatus::Unhealthy("dashboard server exited".to_owned()),
            },
            ServerState::Initialized => HealthStatus::Unhealthy("not started".to_owned()),
            ServerState::Stopped => HealthStatus::Unhealthy("stopped".to_owned()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use dockroute_core::config::SelectedTargetConfig;
    use dockroute_core::types::{NetworkAttachment, Snapshot};
    use dockroute_registry::{SelectedTargetRegistry, SnapshotStore};

    use crate::health::health_channel;

    fn container(id: &str, name: &str) -> Container {
        let mut networks = BTreeMap::new();
        networks.insert(
            "proj_net_1".to_owned(),
            NetworkAttachment {
                network_id: "n1".to_owned(),
                ip_address: "172.20.0.5".to_owned(),
                aliases: vec![format!("{name}.loc")],
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

    fn app() -> (Router, watch::Sender<DaemonHealth>, SnapshotStore) {
        let store = SnapshotStore::new();
        store.publish(Snapshot::new(
            3,
            vec![Network {
                id: "n1".to_owned(),
                name: "proj_net_1".to_owned(),
            }],
            vec![container("aaaa1111", "web1"), container("bbbb2222", "pg")],
        ));
        let targets = Arc::new(SelectedTargetRegistry::from_config(&[
            SelectedTargetConfig::new("postgres", 5432),
        ]));
        let admin = AdminService::new(store.reader(), targets);
        let (health_tx, health_rx) = health_channel();
        (router(AppState::new(admin, health_rx)), health_tx, store)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, serde_json::Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_owned())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), 1024 * 1024).await.unwrap();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn snapshot_summary() {
        let (app, _health, _store) = app();
        let (status, json) = send(&app, "GET", "/api/snapshot", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["version"], 3);
        assert_eq!(json["containers"], 2);
        assert_eq!(json["networks"], 1);
    }

    #[tokio::test]
    async fn lists_containers_and_networks() {
        let (app, _health, _store) = app();

        let (_, containers) = send(&app, "GET", "/api/containers", None).await;
        assert_eq!(containers.as_array().unwrap().len(), 2);
        assert_eq!(containers[0]["id"], "aaaa1111");

        let (_, networks) = send(&app, "GET", "/api/networks", None).await;
        assert_eq!(networks[0]["name"], "proj_net_1");
    }

    #[tokio::test]
    async fn network_detail_and_unknown_network() {
        let (app, _health, _store) = app();

        let (status, json) = send(&app, "GET", "/api/networks/n1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["containers"].as_array().unwrap().len(), 2);

        let (status, json) = send(&app, "GET", "/api/networks/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("nope"));
    }

    #[tokio::test]
    async fn set_and_clear_selected_target() {
        // Given
        let (app, _health, _store) = app();

        // When: 이름으로 지정
        let (status, json) =
            send(&app, "PUT", "/api/targets/5432", Some(r#"{"container":"pg"}"#)).await;

        // Then
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["container_id"], "bbbb2222");

        let (_, list) = send(&app, "GET", "/api/targets", None).await;
        assert_eq!(list[0]["container_name"], "pg");

        // When: 해제
        let (status, _) = send(&app, "DELETE", "/api/targets/5432", None).await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (_, json) = send(&app, "GET", "/api/targets/5432", None).await;
        assert!(json["container_id"].is_null());
    }

    #[tokio::test]
    async fn unknown_target_or_container_is_404() {
        let (app, _health, _store) = app();

        let (status, _) =
            send(&app, "PUT", "/api/targets/9999", Some(r#"{"container":"pg"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, json) =
            send(&app, "PUT", "/api/targets/5432", Some(r#"{"container":"ghost"}"#)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json["error"].as_str().unwrap().contains("ghost"));

        let (status, _) = send(&app, "DELETE", "/api/targets/9999", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_follows_published_report() {
        let (app, health_tx, _store) = app();

        // 시작 중에는 Degraded -> 200
        let (status, json) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"]["status"], "degraded");

        health_tx
            .send(DaemonHealth {
                status: HealthStatus::Unhealthy("router: listener died".to_owned()),
                uptime_secs: 7,
                modules: Vec::new(),
            })
            .unwrap();
        let (status, json) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["uptime_secs"], 7);
    }

    #[tokio::test]
    async fn server_lifecycle() {
        let store = SnapshotStore::new();
        let admin = AdminService::new(
            store.reader(),
            Arc::new(SelectedTargetRegistry::from_config(&[])),
        );
        let (_tx, rx) = health_channel();
        let mut server = AdminServer::new("127.0.0.1:0".parse().unwrap(), AppState::new(admin, rx));

        assert!(server.health_check().await.is_unhealthy());
        server.start().await.unwrap();
        assert!(server.local_addr().is_some());
        assert!(server.health_check().await.is_healthy());
        assert!(server.start().await.is_err());

        server.stop().await.unwrap();
        assert!(server.health_check().await.is_unhealthy());
        assert!(server.start().await.is_err());
    }
}
