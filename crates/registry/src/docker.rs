//! Docker API abstraction for testability.
//!
//! The [`DirectoryClient`] trait covers the read-only queries the registry needs
//! (containers, networks, per-container aliases, lifecycle events), and
//! [`ContainerExec`] covers the interactive `exec` calls used by the shell bridge.
//! Production code uses [`BollardDirectoryClient`] for both; tests use
//! `MockDirectoryClient`.
//!
//! # Architecture
//!
//! ```text
//!   ┌────────────┐     ┌─────────────┐
//!   │ Refresher  │     │ Shell bridge│
//!   └─────┬──────┘     └──────┬──────┘
//!         ▼                   ▼
//!  ┌───────────────┐   ┌──────────────┐
//!  │DirectoryClient│   │ContainerExec │ (traits)
//!  └───────┬───────┘   └──────┬───────┘
//!          └────────┬─────────┘
//!                   ▼
//!        BollardDirectoryClient ──> Docker Daemon
//! ```
//!
//! # Container ID Validation
//!
//! Methods that pass a container ID to the Docker API validate it first:
//! 1-64 characters, ASCII hex digits only.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::io::AsyncWrite;

use dockroute_core::types::{Container, Network, NetworkAttachment};

use crate::error::RegistryError;

/// Docker 이벤트 스트림
pub type EventStream = BoxStream<'static, Result<DirectoryEvent, RegistryError>>;

/// exec 출력 스트림 (TTY 모드이므로 stdout/stderr 구분 없음)
pub type ExecOutput = BoxStream<'static, Result<Bytes, RegistryError>>;

/// exec 입력 writer
pub type ExecInput = Pin<Box<dyn AsyncWrite + Send>>;

/// 컨테이너 상세 조회 결과 중 레지스트리가 사용하는 부분
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerDetail {
    /// 컨테이너 ID
    pub id: String,
    /// 네트워크 이름 -> 별칭 목록
    pub aliases: BTreeMap<String, Vec<String>>,
}

/// Docker 라이프사이클 이벤트
///
/// 레지스트리는 이벤트 내용을 해석하지 않고 재구성 트리거로만 사용합니다.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryEvent {
    /// 이벤트 대상 종류 (container, network, ...)
    pub kind: String,
    /// 액션 (start, die, connect, ...)
    pub action: String,
    /// 대상 ID
    pub actor_id: String,
}

/// 연결된 exec 세션
pub struct ExecSession {
    /// exec 출력
    pub output: ExecOutput,
    /// exec 입력
    pub input: ExecInput,
}

/// Validates a container ID before it reaches the Docker API.
fn validate_container_id(id: &str) -> Result<(), RegistryError> {
    if id.is_empty() || id.len() > 64 {
        return Err(RegistryError::DockerApi(format!(
            "invalid container ID: length {} (must be 1-64)",
            id.len()
        )));
    }
    if !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RegistryError::DockerApi(
            "invalid container ID: contains non-hex characters".to_owned(),
        ));
    }
    Ok(())
}

/// Read-only Docker queries used to build registry snapshots.
///
/// # Error Handling
///
/// - **404 errors**: Converted to `RegistryError::ContainerNotFound`
/// - **Connection errors**: Wrapped as `RegistryError::DockerConnection`
/// - **Other API errors**: Wrapped as `RegistryError::DockerApi`
pub trait DirectoryClient: Send + Sync + 'static {
    /// Lists running containers with their network attachments.
    ///
    /// Aliases in the returned attachments are whatever the list endpoint reports
    /// (usually nothing); use [`inspect_container`](Self::inspect_container) for aliases.
    fn list_containers(&self) -> impl Future<Output = Result<Vec<Container>, RegistryError>> + Send;

    /// Lists all networks.
    fn list_networks(&self) -> impl Future<Output = Result<Vec<Network>, RegistryError>> + Send;

    /// Inspects a container and returns its per-network aliases.
    ///
    /// # Errors
    ///
    /// - `RegistryError::ContainerNotFound`: the container vanished (404)
    /// - `RegistryError::DockerApi`: invalid ID or other API errors
    fn inspect_container(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<ContainerDetail, RegistryError>> + Send;

    /// Subscribes to the Docker event stream.
    ///
    /// The stream ends or yields an error when the connection drops;
    /// callers re-subscribe.
    fn subscribe_events(&self) -> EventStream;

    /// Checks Docker daemon connectivity.
    fn ping(&self) -> impl Future<Output = Result<(), RegistryError>> + Send;
}

/// Interactive `exec` operations used by the shell bridge.
pub trait ContainerExec: Send + Sync + 'static {
    /// Creates a TTY exec with stdin/stdout/stderr attached. Returns the exec ID.
    fn create_exec(
        &self,
        container_id: &str,
        cmd: &[String],
    ) -> impl Future<Output = Result<String, RegistryError>> + Send;

    /// Starts an exec in attached mode.
    fn start_exec(
        &self,
        exec_id: &str,
    ) -> impl Future<Output = Result<ExecSession, RegistryError>> + Send;

    /// Resizes the exec TTY.
    fn resize_exec(
        &self,
        exec_id: &str,
        cols: u16,
        rows: u16,
    ) -> impl Future<Output = Result<(), RegistryError>> + Send;
}

/// Production Docker client implementation using `bollard`.
///
/// Internally uses `Arc<bollard::Docker>` for safe sharing across async tasks.
///
/// # Examples
///
/// ```ignore
/// use dockroute_registry::BollardDirectoryClient;
///
/// let client = BollardDirectoryClient::connect_with_socket("/var/run/docker.sock")?;
/// let networks = client.list_networks().await?;
/// # Ok::<(), dockroute_registry::RegistryError>(())
/// ```
#[derive(Clone)]
pub struct BollardDirectoryClient {
    docker: Arc<bollard::Docker>,
}

impl BollardDirectoryClient {
    /// Connects to Docker using the default local socket.
    pub fn connect_local() -> Result<Self, RegistryError> {
        let docker = bollard::Docker::connect_with_local_defaults().map_err(|e| {
            RegistryError::DockerConnection(format!("failed to connect to docker: {e}"))
        })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }

    /// Connects to Docker using a specific socket path.
    pub fn connect_with_socket(socket_path: &str) -> Result<Self, RegistryError> {
        let docker =
            bollard::Docker::connect_with_socket(socket_path, 120, bollard::API_DEFAULT_VERSION)
                .map_err(|e| {
                    RegistryError::DockerConnection(format!(
                        "failed to connect to docker at {socket_path}: {e}"
                    ))
                })?;
        Ok(Self {
            docker: Arc::new(docker),
        })
    }
}

/// 404는 `ContainerNotFound`, 나머지는 `DockerApi`로 변환합니다.
fn map_container_error(id: &str, context: &str, err: bollard::errors::Error) -> RegistryError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => RegistryError::ContainerNotFound(id.to_owned()),
        other => RegistryError::DockerApi(format!("{context} failed: {other}")),
    }
}

fn attachment_from(endpoint: bollard::models::EndpointSettings) -> NetworkAttachment {
    NetworkAttachment {
        network_id: endpoint.network_id.unwrap_or_default(),
        ip_address: endpoint.ip_address.unwrap_or_default(),
        aliases: endpoint.aliases.unwrap_or_default(),
    }
}

impl DirectoryClient for BollardDirectoryClient {
    async fn list_containers(&self) -> Result<Vec<Container>, RegistryError> {
        use bollard::container::ListContainersOptions;

        // 실행 중인 컨테이너만 (all: false)
        let options = ListContainersOptions::<String>::default();

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| RegistryError::DockerApi(format!("list containers failed: {e}")))?;

        let mut result = Vec::with_capacity(summaries.len());
        for summary in summaries {
            let networks = summary
                .network_settings
                .and_then(|settings| settings.networks)
                .unwrap_or_default()
                .into_iter()
                .map(|(name, endpoint)| (name, attachment_from(endpoint)))
                .collect();

            result.push(Container {
                id: summary.id.unwrap_or_default(),
                names: summary.names.unwrap_or_default(),
                labels: summary.labels.unwrap_or_default().into_iter().collect(),
                networks,
                network_mode: summary
                    .host_config
                    .and_then(|host| host.network_mode)
                    .unwrap_or_default(),
            });
        }

        Ok(result)
    }

    async fn list_networks(&self) -> Result<Vec<Network>, RegistryError> {
        use bollard::network::ListNetworksOptions;

        let networks = self
            .docker
            .list_networks(None::<ListNetworksOptions<String>>)
            .await
            .map_err(|e| RegistryError::DockerApi(format!("list networks failed: {e}")))?;

        Ok(networks
            .into_iter()
            .map(|n| Network {
                id: n.id.unwrap_or_default(),
                name: n.name.unwrap_or_default(),
            })
            .collect())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, RegistryError> {
        use bollard::container::InspectContainerOptions;

        validate_container_id(id)?;

        let details = self
            .docker
            .inspect_container(id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| map_container_error(id, "inspect container", e))?;

        let aliases = details
            .network_settings
            .and_then(|settings| settings.networks)
            .unwrap_or_default()
            .into_iter()
            .map(|(name, endpoint)| (name, endpoint.aliases.unwrap_or_default()))
            .collect();

        Ok(ContainerDetail {
            id: details.id.unwrap_or_else(|| id.to_owned()),
            aliases,
        })
    }

    fn subscribe_events(&self) -> EventStream {
        use bollard::system::EventsOptions;

        self.docker
            .events(Some(EventsOptions::<String>::default()))
            .map(|item| {
                item.map(|message| DirectoryEvent {
                    kind: message
                        .typ
                        .map(|t| format!("{t:?}").to_lowercase())
                        .unwrap_or_default(),
                    action: message.action.unwrap_or_default(),
                    actor_id: message.actor.and_then(|a| a.id).unwrap_or_default(),
                })
                .map_err(|e| RegistryError::DockerApi(format!("event stream failed: {e}")))
            })
            .boxed()
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        self.docker
            .ping()
            .await
            .map_err(|e| RegistryError::DockerConnection(format!("ping failed: {e}")))?;
        Ok(())
    }
}

impl ContainerExec for BollardDirectoryClient {
    async fn create_exec(&self, container_id: &str, cmd: &[String]) -> Result<String, RegistryError> {
        use bollard::exec::CreateExecOptions;

        validate_container_id(container_id)?;

        let options = CreateExecOptions::<String> {
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            cmd: Some(cmd.to_vec()),
            ..Default::default()
        };

        let created = self
            .docker
            .create_exec(container_id, options)
            .await
            .map_err(|e| match map_container_error(container_id, "create exec", e) {
                RegistryError::DockerApi(msg) => RegistryError::Exec(msg),
                other => other,
            })?;
        Ok(created.id)
    }

    async fn start_exec(&self, exec_id: &str) -> Result<ExecSession, RegistryError> {
        use bollard::container::LogOutput;
        use bollard::exec::{StartExecOptions, StartExecResults};

        let options = StartExecOptions {
            detach: false,
            tty: true,
            ..Default::default()
        };

        let started = self
            .docker
            .start_exec(exec_id, Some(options))
            .await
            .map_err(|e| RegistryError::Exec(format!("start exec failed: {e}")))?;

        match started {
            StartExecResults::Attached { output, input } => Ok(ExecSession {
                output: output
                    .map(|item| {
                        item.map(LogOutput::into_bytes)
                            .map_err(|e| RegistryError::Exec(format!("exec output failed: {e}")))
                    })
                    .boxed(),
                input,
            }),
            StartExecResults::Detached => {
                Err(RegistryError::Exec("exec started in detached mode".to_owned()))
            }
        }
    }

    async fn resize_exec(&self, exec_id: &str, cols: u16, rows: u16) -> Result<(), RegistryError> {
        use bollard::exec::ResizeExecOptions;

        self.docker
            .resize_exec(
                exec_id,
                ResizeExecOptions {
                    height: rows,
                    width: cols,
                },
            )
            .await
            .map_err(|e| RegistryError::Exec(format!("resize exec failed: {e}")))
    }
}

/// 테스트용 컨테이너를 생성합니다 (단일 네트워크, 기본 네트워크 = 해당 네트워크).
#[cfg(test)]
pub fn sample_container(id: &str, name: &str, network: &str, ip: &str) -> Container {
    let mut networks = BTreeMap::new();
    networks.insert(
        network.to_owned(),
        NetworkAttachment {
            network_id: format!("{network}-id"),
            ip_address: ip.to_owned(),
            aliases: Vec::new(),
        },
    );
    Container {
        id: id.to_owned(),
        names: vec![format!("/{name}")],
        labels: BTreeMap::new(),
        networks,
        network_mode: network.to_owned(),
    }
}

/// 테스트용 Mock Docker 클라이언트 상태
#[cfg(test)]
#[derive(Default)]
pub struct MockState {
    pub containers: Vec<Container>,
    pub networks: Vec<Network>,
    /// 컨테이너 ID -> (네트워크 이름 -> 별칭)
    pub aliases: std::collections::HashMap<String, BTreeMap<String, Vec<String>>>,
    /// 목록에는 있지만 상세 조회 시 404를 반환할 컨테이너
    pub vanished: std::collections::HashSet<String>,
    pub fail_list: bool,
    pub fail_inspect: bool,
    pub ping_fails: bool,
    pub list_delay: Option<std::time::Duration>,
    pub events: Vec<DirectoryEvent>,
    /// true면 이벤트를 모두 보낸 뒤 스트림을 종료
    pub end_event_stream: bool,
}

/// 테스트용 Mock Docker 클라이언트
///
/// 설정 가능한 응답을 반환하여 Docker 없이도 테스트할 수 있습니다.
#[cfg(test)]
#[derive(Default)]
pub struct MockDirectoryClient {
    pub state: std::sync::Mutex<MockState>,
    pub list_calls: std::sync::atomic::AtomicUsize,
    pub inspect_calls: std::sync::atomic::AtomicUsize,
    pub subscriptions: std::sync::atomic::AtomicUsize,
}

#[cfg(test)]
impl MockDirectoryClient {
    /// 빈 상태로 mock 클라이언트를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    /// 네트워크를 추가합니다.
    pub fn with_network(self, id: &str, name: &str) -> Self {
        self.state.lock().unwrap().networks.push(Network {
            id: id.to_owned(),
            name: name.to_owned(),
        });
        self
    }

    /// 컨테이너와 해당 네트워크의 별칭을 추가합니다.
    pub fn with_container(self, container: Container, aliases: &[&str]) -> Self {
        self.add_container(container, aliases);
        self
    }

    /// 실행 중에 컨테이너를 추가합니다.
    pub fn add_container(&self, container: Container, aliases: &[&str]) {
        let mut state = self.state.lock().unwrap();
        let by_network = container
            .networks
            .keys()
            .map(|net| (net.clone(), aliases.iter().map(|a| (*a).to_owned()).collect()))
            .collect();
        state.aliases.insert(container.id.clone(), by_network);
        state.containers.push(container);
    }

    /// 컨테이너를 제거합니다.
    pub fn remove_container(&self, id: &str) {
        let mut state = self.state.lock().unwrap();
        state.containers.retain(|c| c.id != id);
        state.aliases.remove(id);
    }

    /// 상태를 직접 수정합니다.
    pub fn update(&self, f: impl FnOnce(&mut MockState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn list_call_count(&self) -> usize {
        self.list_calls.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn inspect_call_count(&self) -> usize {
        self.inspect_calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[cfg(test)]
impl DirectoryClient for MockDirectoryClient {
    async fn list_containers(&self) -> Result<Vec<Container>, RegistryError> {
        self.list_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let (delay, fail, containers) = {
            let state = self.state.lock().unwrap();
            (state.list_delay, state.fail_list, state.containers.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(RegistryError::DockerApi("mock list failure".to_owned()));
        }
        Ok(containers)
    }

    async fn list_networks(&self) -> Result<Vec<Network>, RegistryError> {
        Ok(self.state.lock().unwrap().networks.clone())
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerDetail, RegistryError> {
        self.inspect_calls
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        if state.fail_inspect {
            return Err(RegistryError::DockerApi("mock inspect failure".to_owned()));
        }
        if state.vanished.contains(id) {
            return Err(RegistryError::ContainerNotFound(id.to_owned()));
        }
        state
            .aliases
            .get(id)
            .map(|aliases| ContainerDetail {
                id: id.to_owned(),
                aliases: aliases.clone(),
            })
            .ok_or_else(|| RegistryError::ContainerNotFound(id.to_owned()))
    }

    fn subscribe_events(&self) -> EventStream {
        self.subscriptions
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let state = self.state.lock().unwrap();
        let events = futures::stream::iter(state.events.clone().into_iter().map(Ok));
        if state.end_event_stream {
            events.boxed()
        } else {
            events.chain(futures::stream::pending()).boxed()
        }
    }

    async fn ping(&self) -> Result<(), RegistryError> {
        if self.state.lock().unwrap().ping_fails {
            return Err(RegistryError::DockerConnection("mock ping failure".to_owned()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_container_id_accepts_hex() {
        validate_container_id("abc123def456").unwrap();
        validate_container_id(&"a".repeat(64)).unwrap();
    }

    #[test]
    fn validate_container_id_rejects_invalid() {
        assert!(validate_container_id("").is_err());
        assert!(validate_container_id(&"a".repeat(65)).is_err());
        assert!(validate_container_id("web1; rm -rf /").is_err());
        assert!(validate_container_id("../etc").is_err());
    }

    #[test]
    fn attachment_from_endpoint_defaults() {
        let endpoint = bollard::models::EndpointSettings {
            network_id: Some("net-1".to_owned()),
            ip_address: Some("10.0.0.5".to_owned()),
            aliases: Some(vec!["web1.proj.loc".to_owned()]),
            ..Default::default()
        };
        let attachment = attachment_from(endpoint);
        assert_eq!(attachment.network_id, "net-1");
        assert_eq!(attachment.ip_address, "10.0.0.5");
        assert_eq!(attachment.aliases, vec!["web1.proj.loc"]);

        let empty = attachment_from(bollard::models::EndpointSettings::default());
        assert!(empty.ip_address.is_empty());
        assert!(empty.aliases.is_empty());
    }

    #[test]
    fn not_found_maps_to_container_not_found() {
        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 404,
            message: "No such container".to_owned(),
        };
        assert!(matches!(
            map_container_error("abc", "inspect container", err),
            RegistryError::ContainerNotFound(ref id) if id == "abc"
        ));

        let err = bollard::errors::Error::DockerResponseServerError {
            status_code: 500,
            message: "boom".to_owned(),
        };
        assert!(matches!(
            map_container_error("abc", "inspect container", err),
            RegistryError::DockerApi(_)
        ));
    }

    #[tokio::test]
    async fn mock_client_lists_and_inspects() {
        let client = MockDirectoryClient::new()
            .with_network("n1", "proj_net_1")
            .with_container(
                sample_container("abc", "web1", "proj_net_1", "10.0.0.5"),
                &["web1.proj.loc"],
            );

        assert_eq!(client.list_containers().await.unwrap().len(), 1);
        assert_eq!(client.list_networks().await.unwrap()[0].name, "proj_net_1");

        let detail = client.inspect_container("abc").await.unwrap();
        assert_eq!(detail.aliases["proj_net_1"], vec!["web1.proj.loc"]);
        assert_eq!(client.inspect_call_count(), 1);
    }

    #[tokio::test]
    async fn mock_client_vanished_container_is_not_found() {
        let client = MockDirectoryClient::new().with_container(
            sample_container("abc", "web1", "proj_net_1", "10.0.0.5"),
            &[],
        );
        client.update(|state| {
            state.vanished.insert("abc".to_owned());
        });
        assert!(matches!(
            client.inspect_container("abc").await,
            Err(RegistryError::ContainerNotFound(_))
        ));
    }

    #[tokio::test]
    async fn mock_client_event_stream_replays_events() {
        let client = MockDirectoryClient::new();
        client.update(|state| {
            state.events = vec![DirectoryEvent {
                kind: "container".to_owned(),
                action: "start".to_owned(),
                actor_id: "abc".to_owned(),
            }];
            state.end_event_stream = true;
        });
        let events: Vec<_> = client.subscribe_events().collect().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].as_ref().unwrap().action, "start");
    }

    #[tokio::test]
    async fn mock_client_ping_failure() {
        let client = MockDirectoryClient::new();
        client.ping().await.unwrap();
        client.update(|state| state.ping_fails = true);
        assert!(client.ping().await.is_err());
    }

    #[test]
    fn directory_client_is_send_sync() {
        fn assert_send_sync<T: Send + Sync + 'static>() {}
        assert_send_sync::<MockDirectoryClient>();
        assert_send_sync::<BollardDirectoryClient>();
    }
}
