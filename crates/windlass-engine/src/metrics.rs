//! Prometheus metrics registry
//!
//! One registry per engine, constructed before the first task and owned by
//! the agent. Counter and histogram updates are atomic; labelled series
//! materialise lazily on first touch.

use prometheus::{
    Encoder, Gauge, GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};

pub struct Metrics {
    registry: Registry,

    executions_total: IntCounterVec,
    action_executions_total: IntCounterVec,
    trigger_fires_total: IntCounterVec,

    workflow_duration_seconds: HistogramVec,
    action_duration_seconds: HistogramVec,

    active_workflows: IntGauge,
    agent_uptime_seconds: Gauge,
    workflow_last_execution_timestamp: GaugeVec,
    workflow_info: GaugeVec,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let executions_total = IntCounterVec::new(
            Opts::new("executions_total", "Workflow executions by terminal status"),
            &["workflow", "status"],
        )?;
        let action_executions_total = IntCounterVec::new(
            Opts::new(
                "action_executions_total",
                "Action executions by terminal status",
            ),
            &["workflow", "action", "type", "status"],
        )?;
        let trigger_fires_total = IntCounterVec::new(
            Opts::new("trigger_fires_total", "Trigger firings"),
            &["workflow", "trigger_type"],
        )?;

        let workflow_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "workflow_duration_seconds",
                "End-to-end workflow execution duration",
            ),
            &["workflow"],
        )?;
        let action_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "action_duration_seconds",
                "Action duration including retries and backoff",
            ),
            &["workflow", "action"],
        )?;

        let active_workflows = IntGauge::new("active_workflows", "Workflows currently supervised")?;
        let agent_uptime_seconds =
            Gauge::new("agent_uptime_seconds", "Seconds since the agent started")?;
        let workflow_last_execution_timestamp = GaugeVec::new(
            Opts::new(
                "workflow_last_execution_timestamp",
                "Unix timestamp of the last execution",
            ),
            &["workflow"],
        )?;
        let workflow_info = GaugeVec::new(
            Opts::new("workflow_info", "Static workflow metadata, value is always 1"),
            &["workflow", "trigger_type", "schedule"],
        )?;

        registry.register(Box::new(executions_total.clone()))?;
        registry.register(Box::new(action_executions_total.clone()))?;
        registry.register(Box::new(trigger_fires_total.clone()))?;
        registry.register(Box::new(workflow_duration_seconds.clone()))?;
        registry.register(Box::new(action_duration_seconds.clone()))?;
        registry.register(Box::new(active_workflows.clone()))?;
        registry.register(Box::new(agent_uptime_seconds.clone()))?;
        registry.register(Box::new(workflow_last_execution_timestamp.clone()))?;
        registry.register(Box::new(workflow_info.clone()))?;

        Ok(Self {
            registry,
            executions_total,
            action_executions_total,
            trigger_fires_total,
            workflow_duration_seconds,
            action_duration_seconds,
            active_workflows,
            agent_uptime_seconds,
            workflow_last_execution_timestamp,
            workflow_info,
        })
    }

    pub fn record_execution(&self, workflow: &str, status: &str, duration_secs: f64) {
        self.executions_total
            .with_label_values(&[workflow, status])
            .inc();
        self.workflow_duration_seconds
            .with_label_values(&[workflow])
            .observe(duration_secs);
        self.workflow_last_execution_timestamp
            .with_label_values(&[workflow])
            .set(chrono::Utc::now().timestamp() as f64);
    }

    pub fn record_action(
        &self,
        workflow: &str,
        action: &str,
        action_type: &str,
        status: &str,
        duration_secs: f64,
    ) {
        self.action_executions_total
            .with_label_values(&[workflow, action, action_type, status])
            .inc();
        self.action_duration_seconds
            .with_label_values(&[workflow, action])
            .observe(duration_secs);
    }

    pub fn record_trigger_fire(&self, workflow: &str, trigger_type: &str) {
        self.trigger_fires_total
            .with_label_values(&[workflow, trigger_type])
            .inc();
    }

    pub fn set_active_workflows(&self, count: i64) {
        self.active_workflows.set(count);
    }

    pub fn set_uptime_seconds(&self, seconds: f64) {
        self.agent_uptime_seconds.set(seconds);
    }

    /// Publish static workflow metadata; `schedule` is empty for filewatch.
    pub fn set_workflow_info(&self, workflow: &str, trigger_type: &str, schedule: &str) {
        self.workflow_info
            .with_label_values(&[workflow, trigger_type, schedule])
            .set(1.0);
    }

    /// Prometheus text exposition of everything registered.
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer).unwrap_or_default())
    }

    #[cfg(test)]
    pub(crate) fn counter_value(&self, workflow: &str, status: &str) -> u64 {
        self.executions_total
            .with_label_values(&[workflow, status])
            .get()
    }

    #[cfg(test)]
    pub(crate) fn action_counter_value(
        &self,
        workflow: &str,
        action: &str,
        action_type: &str,
        status: &str,
    ) -> u64 {
        self.action_executions_total
            .with_label_values(&[workflow, action, action_type, status])
            .get()
    }

    #[cfg(test)]
    pub(crate) fn trigger_fire_value(&self, workflow: &str, trigger_type: &str) -> u64 {
        self.trigger_fires_total
            .with_label_values(&[workflow, trigger_type])
            .get()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new().unwrap();
        metrics.record_execution("w", "success", 0.5);
        metrics.record_execution("w", "success", 0.2);
        metrics.record_execution("w", "failed", 0.1);
        assert_eq!(metrics.counter_value("w", "success"), 2);
        assert_eq!(metrics.counter_value("w", "failed"), 1);
    }

    #[test]
    fn test_export_contains_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_action("w", "step", "bash", "success", 0.01);
        metrics.record_trigger_fire("w", "cron");
        metrics.set_active_workflows(3);
        metrics.set_workflow_info("w", "cron", "* * * * *");

        let text = metrics.export().unwrap();
        assert!(text.contains("action_executions_total"));
        assert!(text.contains("trigger_fires_total"));
        assert!(text.contains("active_workflows 3"));
        assert!(text.contains("workflow_info"));
    }

    #[test]
    fn test_series_materialise_lazily() {
        let metrics = Metrics::new().unwrap();
        let text = metrics.export().unwrap();
        assert!(!text.contains("workflow=\"ghost\""));
        metrics.record_trigger_fire("ghost", "cron");
        let text = metrics.export().unwrap();
        assert!(text.contains("workflow=\"ghost\""));
    }
}
