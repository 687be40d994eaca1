use metrics::{counter, histogram};
use std::time::Instant;

pub struct Telemetry;

impl Telemetry {
    pub fn record_page(source: &str) {
        counter!("group_sync_pages_fetched_total", "source" => source.to_string()).increment(1);
    }

    pub fn record_group_created() {
        counter!("group_sync_groups_created_total").increment(1);
    }

    pub fn record_group_updated() {
        counter!("group_sync_groups_updated_total").increment(1);
    }

    pub fn record_run(outcome: &str, duration_ms: f64) {
        counter!("group_sync_runs_total", "outcome" => outcome.to_string()).increment(1);
        histogram!("group_sync_run_duration_ms").record(duration_ms);
    }
}

/// Measures one sync run and records it under the given outcome.
pub struct RunTimer {
    start: Instant
}

impl RunTimer {
    pub fn new() -> Self {
        Self {
            start: Instant::now()
        }
    }

    pub fn finish(self, outcome: &str) {
        let duration = self.start.elapsed().as_millis() as f64;
        Telemetry::record_run(outcome, duration);
    }
}

impl Default for RunTimer {
    fn default() -> Self {
        Self::new()
    }
}
