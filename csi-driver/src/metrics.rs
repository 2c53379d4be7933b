//! Prometheus metrics for the CSI driver.
//!
//! Covers both halves of the driver: CSI-facing operation counters/duration
//! (what the orchestrator sees) and backend-facing connection/call metrics
//! (what the WebSocket session sees). Mirrors the `metrics` + `OperationTimer`
//! pattern used throughout this codebase.

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;

/// Metric names.
pub mod names {
    /// Counter: total CSI operations by (method, code).
    pub const CSI_OPERATIONS_TOTAL: &str = "csi_operations_total";
    /// Histogram: duration of CSI operations in seconds.
    pub const CSI_OPERATION_DURATION_SECONDS: &str = "csi_operation_duration_seconds";
    /// Gauge: backend WebSocket connection status (1 = up, 0 = down).
    pub const BACKEND_CONNECTED: &str = "csi_backend_connected";
    /// Counter: backend reconnect attempts by outcome.
    pub const BACKEND_RECONNECTS_TOTAL: &str = "csi_backend_reconnects_total";
    /// Histogram: duration of individual backend JSON-RPC calls.
    pub const BACKEND_CALL_DURATION_SECONDS: &str = "csi_backend_call_duration_seconds";
    /// Counter: backend frames by (method, direction).
    pub const BACKEND_MESSAGES_TOTAL: &str = "csi_backend_messages_total";
    /// Gauge: last-known capacity in bytes per volume.
    pub const VOLUME_CAPACITY_BYTES: &str = "csi_volume_capacity_bytes";
}

/// Start the Prometheus exporter's `/metrics` HTTP listener.
pub fn init_metrics(addr: SocketAddr) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    info!("Metrics server listening on http://{}/metrics", addr);
    Ok(())
}

/// Record one CSI RPC's outcome.
pub fn record_csi_operation(method: &str, code: &str, duration_secs: f64) {
    counter!(names::CSI_OPERATIONS_TOTAL, "method" => method.to_string(), "code" => code.to_string())
        .increment(1);
    histogram!(names::CSI_OPERATION_DURATION_SECONDS, "method" => method.to_string())
        .record(duration_secs);
}

pub fn set_backend_connected(connected: bool) {
    gauge!(names::BACKEND_CONNECTED).set(if connected { 1.0 } else { 0.0 });
}

pub fn record_backend_reconnect_attempt(success: bool) {
    counter!(names::BACKEND_RECONNECTS_TOTAL, "success" => success.to_string()).increment(1);
}

pub fn record_backend_message(method: &str, direction: &str) {
    counter!(names::BACKEND_MESSAGES_TOTAL, "method" => method.to_string(), "direction" => direction.to_string())
        .increment(1);
}

pub fn set_volume_capacity_bytes(volume_id: &str, bytes: u64) {
    gauge!(names::VOLUME_CAPACITY_BYTES, "volume_id" => volume_id.to_string()).set(bytes as f64);
}

/// Times a CSI RPC from entry to the eventual `tonic::Status` code.
pub struct OperationTimer {
    method: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(method: &str) -> Self {
        Self {
            method: method.to_string(),
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        record_csi_operation(&self.method, "ok", duration);
    }

    pub fn failure(self, code: &str) {
        let duration = self.start.elapsed().as_secs_f64();
        record_csi_operation(&self.method, code, duration);
    }
}

/// Times one backend JSON-RPC call, recording both the CSI-style counter
/// and the backend-specific duration histogram plus message counters.
pub struct BackendCallTimer {
    method: String,
    start: Instant,
}

impl BackendCallTimer {
    pub fn start(method: &str) -> Self {
        Self {
            method: method.to_string(),
            start: Instant::now(),
        }
    }

    pub fn success(self) {
        let duration = self.start.elapsed().as_secs_f64();
        histogram!(names::BACKEND_CALL_DURATION_SECONDS, "method" => self.method.clone())
            .record(duration);
        record_backend_message(&self.method, "received");
    }

    pub fn failure(self) {
        let duration = self.start.elapsed().as_secs_f64();
        histogram!(names::BACKEND_CALL_DURATION_SECONDS, "method" => self.method.clone())
            .record(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operation_timer_does_not_panic_without_exporter_installed() {
        let timer = OperationTimer::new("CreateVolume");
        std::thread::sleep(std::time::Duration::from_millis(1));
        timer.success();
    }

    #[test]
    fn backend_call_timer_records_failure_path() {
        let timer = BackendCallTimer::start("pool.dataset.create");
        timer.failure();
    }
}
