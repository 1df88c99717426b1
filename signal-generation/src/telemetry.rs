// Run telemetry
// Sinks are injected into the pipeline and receive every event of a run

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::pipeline::StepName;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryLevel {
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub at: DateTime<Utc>,
    pub execution_id: Uuid,
    pub step: Option<StepName>,
    pub level: TelemetryLevel,
    pub message: String,
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: &TelemetryEvent);
}

/// Forwards events to `tracing`
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        let step = event.step.map(|s| s.as_str()).unwrap_or("run");
        match event.level {
            TelemetryLevel::Debug => debug!(execution_id = %event.execution_id, step, "{}", event.message),
            TelemetryLevel::Info => info!(execution_id = %event.execution_id, step, "{}", event.message),
            TelemetryLevel::Warn => warn!(execution_id = %event.execution_id, step, "{}", event.message),
            TelemetryLevel::Error => error!(execution_id = %event.execution_id, step, "{}", event.message),
        }
    }
}

/// Keeps every event in memory
#[derive(Debug, Default)]
pub struct MemoryTelemetry {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl MemoryTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn events_for(&self, execution_id: Uuid) -> Vec<TelemetryEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.execution_id == execution_id)
            .collect()
    }
}

impl TelemetrySink for MemoryTelemetry {
    fn record(&self, event: &TelemetryEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink_filters_by_run() {
        let sink = MemoryTelemetry::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        for (id, message) in [(a, "one"), (b, "two"), (a, "three")] {
            sink.record(&TelemetryEvent {
                at: Utc::now(),
                execution_id: id,
                step: Some(StepName::FetchPrices),
                level: TelemetryLevel::Info,
                message: message.to_string(),
            });
        }

        assert_eq!(sink.events().len(), 3);
        let messages: Vec<String> = sink.events_for(a).into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["one", "three"]);
    }
}
