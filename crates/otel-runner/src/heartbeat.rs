//! Periodic runtime metrics recorded through the active metrics bridge.
//!
//! Instruments are bound to one bridge. When the manager restarts and hands
//! out a new bridge they are recreated on the next tick.

use std::sync::Arc;
use std::time::{Duration, Instant};

use opentelemetry::metrics::{Counter, Gauge};
use otel_bridge::{Manager, MetricsBridge};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, warn};

pub const METER_NAME: &str = "otel-runner";
pub const HEARTBEATS: &str = "otel_runner.heartbeats";
pub const UPTIME_SECONDS: &str = "otel_runner.uptime_seconds";

struct Instruments {
    bridge: Arc<MetricsBridge>,
    heartbeats: Counter<u64>,
    uptime: Gauge<f64>,
}

impl Instruments {
    fn new(bridge: Arc<MetricsBridge>) -> Self {
        let meter = bridge.meter(METER_NAME);
        let heartbeats = meter
            .u64_counter(HEARTBEATS)
            .with_description("Heartbeat ticks since the runner started")
            .build();
        let uptime = meter
            .f64_gauge(UPTIME_SECONDS)
            .with_description("Seconds since the runner started")
            .with_unit("s")
            .build();
        Self {
            bridge,
            heartbeats,
            uptime,
        }
    }

    fn record(&self, uptime: Duration) {
        self.heartbeats.add(1, &[]);
        self.uptime.record(uptime.as_secs_f64(), &[]);
    }
}

/// Spawn the heartbeat task. It ticks every `interval` until aborted.
pub fn spawn(manager: Arc<Manager>, interval: Duration) -> JoinHandle<()> {
    let started = Instant::now();
    tokio::spawn(async move {
        let mut ticker = time::interval(interval);
        let mut instruments: Option<Instruments> = None;
        loop {
            ticker.tick().await;
            let Some(bridge) = manager.metrics_bridge() else {
                instruments = None;
                continue;
            };
            let current = match instruments.take() {
                Some(i) if Arc::ptr_eq(&i.bridge, &bridge) => i,
                _ => {
                    debug!("binding heartbeat instruments to metrics bridge");
                    Instruments::new(bridge)
                }
            };
            current.record(started.elapsed());
            instruments = Some(current);
        }
    })
}

/// Abort the heartbeat task and wait for it to finish.
///
/// Once this returns the task no longer touches the manager, so a blocking
/// shutdown cannot leave it parked on the manager lock on a runtime worker.
pub async fn stop(task: JoinHandle<()>) {
    task.abort();
    match task.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {}
        Err(e) => warn!(error = %e, "heartbeat task failed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry_sdk::logs::{InMemoryLogExporter, SdkLoggerProvider};
    use opentelemetry_sdk::metrics::{InMemoryMetricExporter, PeriodicReader};
    use opentelemetry_sdk::Resource;
    use otel_bridge::{Config, Deadline, ExporterFactory, LogEmitter, TelemetryError};

    #[derive(Clone, Default)]
    struct InMemoryFactory {
        metrics: InMemoryMetricExporter,
    }

    impl ExporterFactory for InMemoryFactory {
        fn log_emitter(&self, _: &Config, _: &Resource) -> Result<LogEmitter, TelemetryError> {
            let provider = SdkLoggerProvider::builder()
                .with_simple_exporter(InMemoryLogExporter::default())
                .build();
            Ok(LogEmitter::with_provider(provider))
        }

        fn metrics_bridge(&self, _: &Config, _: &Resource) -> Result<MetricsBridge, TelemetryError> {
            let reader = PeriodicReader::builder(self.metrics.clone()).build();
            Ok(MetricsBridge::from_reader(reader, None))
        }
    }

    fn enabled() -> Config {
        Config {
            enabled: true,
            endpoint: "collector:4317".into(),
            ..Config::default()
        }
    }

    fn metric_names(exporter: &InMemoryMetricExporter) -> Vec<String> {
        exporter
            .get_finished_metrics()
            .unwrap()
            .iter()
            .flat_map(|rm| rm.scope_metrics())
            .flat_map(|sm| sm.metrics())
            .map(|m| m.name().to_owned())
            .collect()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn records_heartbeat_metrics_while_active() {
        let factory = InMemoryFactory::default();
        let manager = Arc::new(Manager::with_factory(Arc::new(factory.clone())));
        manager.start(&enabled(), "", None).unwrap();

        let task = spawn(Arc::clone(&manager), Duration::from_millis(10));
        time::sleep(Duration::from_millis(100)).await;
        task.abort();

        let bridge = manager.metrics_bridge().unwrap();
        bridge.provider().force_flush().unwrap();
        let names = metric_names(&factory.metrics);
        assert!(names.iter().any(|n| n == HEARTBEATS));
        assert!(names.iter().any(|n| n == UPTIME_SECONDS));

        manager.shutdown(Deadline::after(Duration::from_secs(5))).unwrap();
    }

    #[tokio::test(flavor = "current_thread")]
    async fn stop_releases_manager_before_shutdown() {
        let manager = Arc::new(Manager::with_factory(Arc::new(InMemoryFactory::default())));
        manager.start(&enabled(), "", None).unwrap();

        let task = spawn(Arc::clone(&manager), Duration::from_millis(1));
        time::sleep(Duration::from_millis(20)).await;
        stop(task).await;
        assert_eq!(Arc::strong_count(&manager), 1);

        let teardown = Arc::clone(&manager);
        let result = tokio::task::spawn_blocking(move || {
            teardown.shutdown(Deadline::after(Duration::from_secs(5)))
        })
        .await
        .unwrap();
        assert!(result.is_ok());
        assert!(!manager.is_active());
    }

    #[tokio::test]
    async fn stop_after_task_finished_is_quiet() {
        let task = tokio::spawn(async {});
        time::sleep(Duration::from_millis(5)).await;
        stop(task).await;
    }

    #[tokio::test]
    async fn idles_without_active_pipeline() {
        let manager = Arc::new(Manager::with_factory(Arc::new(InMemoryFactory::default())));
        let task = spawn(Arc::clone(&manager), Duration::from_millis(5));
        time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());
        task.abort();
    }
}
