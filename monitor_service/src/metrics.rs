// monitor_service/src/metrics.rs
use prometheus::{Counter, Gauge, Registry};
use std::sync::Arc;

#[derive(Clone)]
pub struct MonitorMetrics {
    pub registry: Arc<Registry>,
    pub task_runs: Counter,
    pub task_errors: Counter,
    pub cycle_latency_ms: Gauge,
}

impl MonitorMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Arc::new(Registry::new());
        let task_runs = Counter::new("monitor_task_runs_total", "Total monitor task runs")?;
        let task_errors = Counter::new("monitor_task_errors_total", "Total monitor task errors")?;
        let cycle_latency_ms =
            Gauge::new("monitor_cycle_latency_ms", "Latency of the last monitor cycle")?;
        registry.register(Box::new(task_runs.clone()))?;
        registry.register(Box::new(task_errors.clone()))?;
        registry.register(Box::new(cycle_latency_ms.clone()))?;
        Ok(Self {
            registry,
            task_runs,
            task_errors,
            cycle_latency_ms,
        })
    }
}
