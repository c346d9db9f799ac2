use super::StreamMetrics;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub source_id: String,
    pub samples_received: u64,
    pub batches_received: u64,
    pub bytes_received: u64,
    pub errors_count: u64,
    pub avg_cycle_us: u64,
}

#[derive(Clone, Default)]
pub struct MetricsCollector {
    metrics: HashMap<String, Arc<StreamMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metrics: Arc<StreamMetrics>) {
        self.metrics.insert(metrics.source_id().to_string(), metrics);
    }

    pub fn snapshot(&self) -> HashMap<String, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(id, metrics)| {
                (
                    id.clone(),
                    MetricsSnapshot {
                        source_id: metrics.source_id().to_string(),
                        samples_received: metrics.samples_received(),
                        batches_received: metrics.batches_received(),
                        bytes_received: metrics.bytes_received(),
                        errors_count: metrics.errors_count(),
                        avg_cycle_us: metrics.avg_cycle_us(),
                    },
                )
            })
            .collect()
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<StreamMetrics>> {
        self.metrics.get(source_id).cloned()
    }
}
