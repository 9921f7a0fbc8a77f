//! Prometheus metrics HTTP server.
//!
//! Uses the built-in HTTP listener from `metrics-exporter-prometheus`.
//! After [`install_metrics_recorder`] every `metrics::counter!()` in the
//! registry, router and shell bridge is exported.

use std::net::SocketAddr;

use anyhow::Result;
use metrics_exporter_prometheus::PrometheusBuilder;

use dockroute_core::config::MetricsConfig;
use dockroute_core::metrics as m;

/// 메트릭 리스너 주소를 계산합니다.
///
/// # Errors
///
/// 지원하지 않는 엔드포인트이거나 주소를 파싱할 수 없는 경우
pub fn metrics_addr(config: &MetricsConfig) -> Result<SocketAddr> {
    if config.endpoint != "/metrics" {
        return Err(anyhow::anyhow!(
            "unsupported metrics endpoint '{}': only '/metrics' is currently supported",
            config.endpoint
        ));
    }

    format!("{}:{}", config.listen_addr, config.port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid metrics listen address: {}", e))
}

/// Install the global metrics recorder and start the HTTP listener.
///
/// Call once per process.
///
/// # Errors
///
/// - invalid address or endpoint
/// - socket binding fails
/// - a global recorder is already installed
pub fn install_metrics_recorder(config: &MetricsConfig) -> Result<()> {
    let addr = metrics_addr(config)?;

    if addr.ip().is_unspecified() {
        tracing::warn!(
            listen_addr = %addr,
            "metrics endpoint is exposed on all interfaces; restrict listen_addr in untrusted networks"
        );
    }

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            metrics_exporter_prometheus::Matcher::Full(
                m::REGISTRY_REFRESH_DURATION_SECONDS.to_owned(),
            ),
            m::REFRESH_DURATION_BUCKETS,
        )
        .and_then(|builder| {
            builder.set_buckets_for_metric(
                metrics_exporter_prometheus::Matcher::Full(
                    m::ROUTER_SNIFF_DURATION_SECONDS.to_owned(),
                ),
                m::SNIFF_DURATION_BUCKETS,
            )
        })
        .map_err(|e| anyhow::anyhow!("invalid histogram buckets: {}", e))?
        .install()
        .map_err(|e| anyhow::anyhow!("failed to install metrics recorder: {}", e))?;

    m::describe_all();

    tracing::info!(listen_addr = %addr, "Prometheus metrics endpoint active");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_address() {
        let addr = metrics_addr(&MetricsConfig::default()).unwrap();
        assert_eq!(addr, "127.0.0.1:9100".parse().unwrap());
    }

    #[test]
    fn custom_endpoint_rejected() {
        let config = MetricsConfig {
            endpoint: "/stats".to_owned(),
            ..Default::default()
        };
        let err = metrics_addr(&config).unwrap_err();
        assert!(err.to_string().contains("/stats"));
    }

    #[test]
    fn bad_listen_addr_rejected() {
        let config = MetricsConfig {
            listen_addr: "not-an-ip".to_owned(),
            ..Default::default()
        };
        assert!(metrics_addr(&config).is_err());
    }
}
