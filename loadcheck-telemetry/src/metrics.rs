use std::net::{IpAddr, Ipv6Addr, SocketAddr};

use loadcheck_config::shared::MetricsConfig;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use tracing::info;

/// Installs the global Prometheus recorder and serves it on `[::]:{port}/metrics`.
///
/// Must be called from within a tokio runtime, since the HTTP listener is spawned onto it.
/// Every counter and gauge recorded by the harness through the `metrics` facade becomes visible
/// to scrapers once this returns.
pub fn init_metrics(config: &MetricsConfig) -> Result<(), BuildError> {
    let address = SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), config.port);

    PrometheusBuilder::new()
        .with_http_listener(address)
        .install()?;

    info!(%address, "prometheus metrics exporter listening");

    Ok(())
}
