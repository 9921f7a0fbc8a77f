//! 메트릭 상수 및 설명 등록
//!
//! 모든 Prometheus 메트릭의 이름과 설명을 중앙에서 정의합니다.
//! 각 모듈은 이 상수를 사용하여 `metrics::counter!()`, `metrics::gauge!()`,
//! `metrics::histogram!()` 매크로를 호출합니다.
//!
//! # 네이밍 컨벤션
//!
//! - 접두어: `dockroute_`
//! - 모듈명: `registry_`, `router_`, `shell_`, `admin_`
//! - 접미어: `_total` (counter), `_seconds` (histogram/latency), 없음 (gauge)
//!
//! # 사용 예시
//!
//! ```ignore
//! use metrics::counter;
//!
//! counter!(dockroute_core::metrics::ROUTER_CONNECTIONS_TOTAL).increment(1);
//! ```

use metrics::{describe_counter, describe_gauge, describe_histogram};

// ─── 레이블 키 상수 ────────────────────────────────────────────────

/// 라우트 종류 레이블 키 (host, selected)
pub const LABEL_ROUTE: &str = "route";

/// 실패/종료 사유 레이블 키 (sniff, no_match, dial, pattern, no_target)
pub const LABEL_REASON: &str = "reason";

/// 결과 레이블 키 (success, failure, coalesced)
pub const LABEL_RESULT: &str = "result";

// ─── Registry 메트릭 ───────────────────────────────────────────────

/// Registry: 재구성 시도 수 (counter, label: result)
pub const REGISTRY_REFRESH_TOTAL: &str = "dockroute_registry_refresh_total";

/// Registry: 재구성 소요 시간 (histogram, 초)
pub const REGISTRY_REFRESH_DURATION_SECONDS: &str = "dockroute_registry_refresh_duration_seconds";

/// Registry: 스냅샷 내 컨테이너 수 (gauge)
pub const REGISTRY_CONTAINERS: &str = "dockroute_registry_containers";

/// Registry: 스냅샷 내 네트워크 수 (gauge)
pub const REGISTRY_NETWORKS: &str = "dockroute_registry_networks";

/// Registry: 수신한 Docker 이벤트 수 (counter)
pub const REGISTRY_EVENTS_TOTAL: &str = "dockroute_registry_events_total";

/// Registry: 여러 컨테이너가 공유하는 별칭 수 (gauge)
pub const REGISTRY_AMBIGUOUS_ALIASES: &str = "dockroute_registry_ambiguous_aliases";

// ─── Router 메트릭 ─────────────────────────────────────────────────

/// Router: 수락한 연결 수 (counter, label: route)
pub const ROUTER_CONNECTIONS_TOTAL: &str = "dockroute_router_connections_total";

/// Router: 백엔드 없이 닫힌 연결 수 (counter, label: route, reason)
pub const ROUTER_REJECTED_TOTAL: &str = "dockroute_router_rejected_total";

/// Router: 현재 릴레이 중인 연결 수 (gauge)
pub const ROUTER_ACTIVE_CONNECTIONS: &str = "dockroute_router_active_connections";

/// Router: 릴레이된 바이트 수 (counter)
pub const ROUTER_BYTES_TOTAL: &str = "dockroute_router_bytes_total";

/// Router: 라우팅 키 추출 소요 시간 (histogram, 초)
pub const ROUTER_SNIFF_DURATION_SECONDS: &str = "dockroute_router_sniff_duration_seconds";

// ─── Shell 메트릭 ──────────────────────────────────────────────────

/// Shell: 시작된 SSH 세션 수 (counter)
pub const SHELL_SESSIONS_TOTAL: &str = "dockroute_shell_sessions_total";

/// Shell: 현재 연결된 셸 수 (gauge)
pub const SHELL_ACTIVE_SESSIONS: &str = "dockroute_shell_active_sessions";

/// Shell: exec 실패 수 (counter)
pub const SHELL_EXEC_FAILURES_TOTAL: &str = "dockroute_shell_exec_failures_total";

// ─── Admin 메트릭 ──────────────────────────────────────────────────

/// Admin: 선택 대상 변경 수 (counter, label: result)
pub const ADMIN_TARGET_UPDATES_TOTAL: &str = "dockroute_admin_target_updates_total";

// ─── Daemon 메트릭 ─────────────────────────────────────────────────

/// Daemon: 가동 시간 (gauge, 초)
pub const DAEMON_UPTIME_SECONDS: &str = "dockroute_daemon_uptime_seconds";

/// Daemon: 등록된 모듈 수 (gauge)
pub const DAEMON_MODULES_REGISTERED: &str = "dockroute_daemon_modules_registered";

/// Daemon: 빌드 정보 (gauge, 항상 1)
pub const DAEMON_BUILD_INFO: &str = "dockroute_daemon_build_info";

// ─── 히스토그램 버킷 ───────────────────────────────────────────────

/// 재구성 소요 시간 버킷 (초)
pub const REFRESH_DURATION_BUCKETS: &[f64] = &[0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

/// 스니핑 소요 시간 버킷 (초)
pub const SNIFF_DURATION_BUCKETS: &[f64] = &[0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0];

/// 모든 메트릭의 설명을 등록합니다.
///
/// 레코더 설치 직후 한 번 호출합니다. 레코더가 없으면 아무 일도 하지 않습니다.
pub fn describe_all() {
    // Registry
    describe_counter!(
        REGISTRY_REFRESH_TOTAL,
        "Total number of registry rebuild attempts by result"
    );
    describe_histogram!(
        REGISTRY_REFRESH_DURATION_SECONDS,
        "Time to rebuild the registry snapshot in seconds"
    );
    describe_gauge!(
        REGISTRY_CONTAINERS,
        "Number of containers in the current snapshot"
    );
    describe_gauge!(
        REGISTRY_NETWORKS,
        "Number of networks matching the network pattern"
    );
    describe_counter!(
        REGISTRY_EVENTS_TOTAL,
        "Total number of Docker lifecycle events received"
    );
    describe_gauge!(
        REGISTRY_AMBIGUOUS_ALIASES,
        "Number of aliases advertised by more than one container"
    );

    // Router
    describe_counter!(
        ROUTER_CONNECTIONS_TOTAL,
        "Total number of accepted inbound connections"
    );
    describe_counter!(
        ROUTER_REJECTED_TOTAL,
        "Total number of connections closed without a backend"
    );
    describe_gauge!(
        ROUTER_ACTIVE_CONNECTIONS,
        "Number of connections currently being relayed"
    );
    describe_counter!(ROUTER_BYTES_TOTAL, "Total bytes relayed in both directions");
    describe_histogram!(
        ROUTER_SNIFF_DURATION_SECONDS,
        "Time to extract the routing key in seconds"
    );

    // Shell
    describe_counter!(SHELL_SESSIONS_TOTAL, "Total number of SSH sessions accepted");
    describe_gauge!(
        SHELL_ACTIVE_SESSIONS,
        "Number of shells currently bridged to a container"
    );
    describe_counter!(
        SHELL_EXEC_FAILURES_TOTAL,
        "Total number of failed container exec attempts"
    );

    // Admin
    describe_counter!(
        ADMIN_TARGET_UPDATES_TOTAL,
        "Total number of selected target updates by result"
    );

    // Daemon
    describe_gauge!(DAEMON_UPTIME_SECONDS, "dockroute daemon uptime in seconds");
    describe_gauge!(
        DAEMON_MODULES_REGISTERED,
        "Number of modules registered in the daemon"
    );
    describe_gauge!(
        DAEMON_BUILD_INFO,
        "Build information (always 1, with version label)"
    );
}
