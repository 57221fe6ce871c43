//! Logging and metrics exporter setup.

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use studyspark_common::{
    config::ObservabilityConfig,
    metrics::{METRICS_PREFIX, MODEL_LATENCY_BUCKETS},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_tracing(config: &ObservabilityConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_logging {
        builder
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .init();
    } else {
        builder.pretty().init();
    }
}

/// Serve Prometheus metrics on `port`. Port 0 leaves the exporter off.
pub fn install_metrics_exporter(port: u16) -> anyhow::Result<()> {
    if port == 0 {
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    prometheus_builder()?.with_http_listener(addr).install()?;
    info!(%addr, "Metrics exporter listening");
    Ok(())
}

/// Exporter settings shared by every listener: model latency is exported
/// as a histogram over `MODEL_LATENCY_BUCKETS`.
fn prometheus_builder() -> anyhow::Result<PrometheusBuilder> {
    let builder = PrometheusBuilder::new().set_buckets_for_metric(
        Matcher::Full(format!("{}_model_request_duration_seconds", METRICS_PREFIX)),
        MODEL_LATENCY_BUCKETS,
    )?;
    Ok(builder)
}

#[cfg(test)]
mod tests {
    use super::*;
    use studyspark_common::metrics::record_model_call;

    #[test]
    fn test_model_latency_is_bucketed() {
        let recorder = prometheus_builder().unwrap().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            record_model_call("generate", "gemini-2.0-flash", 1.5, true);
        });

        let rendered = handle.render();
        assert!(rendered.contains("studyspark_model_request_duration_seconds_bucket"));
        assert!(rendered.contains(r#"le="0.25""#));
        assert!(rendered.contains("studyspark_model_request_duration_seconds_count"));
    }
}
