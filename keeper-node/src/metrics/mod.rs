use metrics::counter;
use metrics::histogram;
use metrics::SharedString;

/// Prometheus instruments of the node. Recording is a no-op until an exporter is
/// installed.
#[derive(Default)]
pub struct Metrics {}

impl Metrics {
    pub fn new() -> Self {
        Self {}
    }

    pub fn increment_rounds(&self) {
        counter!("keeper_node_rounds_total").increment(1);
    }

    pub fn increment_round_errors(
        &self,
        error_type: &str,
    ) {
        let error_type = SharedString::from(String::from(error_type));
        counter!("keeper_node_round_errors_total", "error_type" => error_type).increment(1);
    }

    pub fn increment_upkeeps_checked(
        &self,
        count: usize,
    ) {
        counter!("keeper_node_upkeeps_checked_total").increment(count as u64);
    }

    pub fn increment_upkeeps_eligible(
        &self,
        count: usize,
    ) {
        counter!("keeper_node_upkeeps_eligible_total").increment(count as u64);
    }

    pub fn observe_round_duration(
        &self,
        duration: f64,
    ) {
        histogram!("keeper_node_round_duration_seconds").record(duration);
    }

    pub fn observe_report_size(
        &self,
        bytes: usize,
    ) {
        histogram!("keeper_node_report_bytes").record(bytes as f64);
    }
}
