use super::MetricsCollector;

pub struct AcquisitionMonitor {
    collector: MetricsCollector,
}

impl AcquisitionMonitor {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn generate_report(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No sources registered".to_string();
        }

        let mut ids: Vec<&String> = snapshot.keys().collect();
        ids.sort();

        let mut report = String::from("=== Acquisition Metrics ===\n");
        for id in ids {
            let metrics = &snapshot[id];
            report.push_str(&format!(
                "\n[{}]\n  Samples: {} in {} batches\n  Bytes: {}\n  Errors: {}\n  Avg Cycle: {}μs\n",
                id,
                metrics.samples_received,
                metrics.batches_received,
                metrics.bytes_received,
                match metrics.errors_count {
                    1 => "1 error".to_string(),
                    n => format!("{} errors", n),
                },
                metrics.avg_cycle_us
            ));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}
