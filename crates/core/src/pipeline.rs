//! 파이프라인 trait -- 모듈 생명주기 정의
//!
//! 각 모듈(레지스트리, 라우터, 셸 브릿지, 관리 서버)은 [`Pipeline`]을 구현하여
//! `dockroute-daemon`에서 동일한 생명주기(start/stop/health_check)로 관리됩니다.
//!
//! # 생명주기
//! ```text
//! Initialized → start() → Running → stop() → Stopped
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use serde::Serialize;

use crate::error::DockrouteError;

/// `dyn` 호환을 위한 boxed future
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 모듈 건강 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum HealthStatus {
    /// 정상
    Healthy,
    /// 동작 중이나 일부 기능 저하
    Degraded(String),
    /// 비정상
    Unhealthy(String),
}

impl HealthStatus {
    /// 정상 상태인지 확인합니다.
    pub fn is_healthy(&self) -> bool {
        matches!(self, Self::Healthy)
    }

    /// 비정상 상태인지 확인합니다.
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, Self::Unhealthy(_))
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded(reason) => write!(f, "degraded: {reason}"),
            Self::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// 모든 모듈이 구현하는 생명주기 trait
///
/// RPITIT를 사용하므로 `dyn Pipeline`은 불가합니다.
/// 동적 관리가 필요하면 [`DynPipeline`]을 사용합니다.
pub trait Pipeline: Send + Sync {
    /// 모듈을 시작합니다. 백그라운드 태스크를 spawn하고 즉시 반환합니다.
    fn start(&mut self) -> impl Future<Output = Result<(), DockrouteError>> + Send;

    /// 모듈을 정지합니다. 실행 중인 태스크를 취소하고 정리합니다.
    fn stop(&mut self) -> impl Future<Output = Result<(), DockrouteError>> + Send;

    /// 모듈의 건강 상태를 확인합니다.
    fn health_check(&self) -> impl Future<Output = HealthStatus> + Send;
}

/// dyn-compatible 파이프라인 trait
///
/// `Vec<Box<dyn DynPipeline>>`으로 모듈을 등록 순서대로 관리할 수 있게 합니다.
pub trait DynPipeline: Send + Sync {
    /// 모듈을 시작합니다.
    fn start(&mut self) -> BoxFuture<'_, Result<(), DockrouteError>>;

    /// 모듈을 정지합니다.
    fn stop(&mut self) -> BoxFuture<'_, Result<(), DockrouteError>>;

    /// 모듈의 건강 상태를 확인합니다.
    fn health_check(&self) -> BoxFuture<'_, HealthStatus>;
}

/// Pipeline을 구현한 타입은 자동으로 DynPipeline도 구현됩니다.
impl<T: Pipeline> DynPipeline for T {
    fn start(&mut self) -> BoxFuture<'_, Result<(), DockrouteError>> {
        Box::pin(Pipeline::start(self))
    }

    fn stop(&mut self) -> BoxFuture<'_, Result<(), DockrouteError>> {
        Box::pin(Pipeline::stop(self))
    }

    fn health_check(&self) -> BoxFuture<'_, HealthStatus> {
        Box::pin(Pipeline::health_check(self))
    }
}
