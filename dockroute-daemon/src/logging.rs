//! tracing-subscriber 초기화
//!
//! `RUST_LOG`가 있으면 그대로 쓰고, 없으면 `general.log_level`로 필터를 만듭니다.
//! 이때 Docker/SSH/HTTP 의존 크레이트는 `warn`까지만 출력해 연결마다 쏟아지는
//! 내부 로그가 라우팅 로그를 덮지 않게 합니다.

use anyhow::{Result, anyhow};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

use dockroute_core::config::GeneralConfig;

/// `general.log_level`이 `warn`보다 자세할 때 `warn`으로 묶이는 의존 크레이트
const NOISY_DEPENDENCIES: &[&str] = &["bollard", "hyper", "hyper_util", "h2", "russh", "russh_keys"];

/// 설정 로그 레벨에서 `EnvFilter` 지시문을 만듭니다.
///
/// 예: `"debug"` → `"debug,bollard=warn,hyper=warn,..."`
pub fn filter_directives(log_level: &str) -> String {
    let verbose = log_level
        .parse::<LevelFilter>()
        .is_ok_and(|level| level > LevelFilter::WARN);
    if !verbose {
        return log_level.to_owned();
    }

    let mut directives = log_level.to_owned();
    for dependency in NOISY_DEPENDENCIES {
        directives.push(',');
        directives.push_str(dependency);
        directives.push_str("=warn");
    }
    directives
}

/// 전역 subscriber를 설치합니다. 프로세스당 한 번만 호출합니다.
///
/// `general.log_format`: `"json"`(기본) 또는 `"pretty"`.
pub fn init_tracing(config: &GeneralConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(from_env) => from_env,
        Err(_) => EnvFilter::try_new(filter_directives(&config.log_level))
            .map_err(|e| anyhow!("invalid log level '{}': {e}", config.log_level))?,
    };

    let layer: Box<dyn Layer<Registry> + Send + Sync> = match config.log_format.as_str() {
        "json" => tracing_subscriber::fmt::layer()
            .json()
            .with_filter(filter)
            .boxed(),
        "pretty" => tracing_subscriber::fmt::layer()
            .pretty()
            .with_filter(filter)
            .boxed(),
        other => return Err(anyhow!("unknown log format '{other}', expected 'json' or 'pretty'")),
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize tracing subscriber: {e}"))
}
