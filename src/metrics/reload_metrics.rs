//! Reload metrics tracking using OpenTelemetry.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter};
use std::sync::Arc;
use std::time::Instant;

/// Metrics collector for reload operations.
///
/// # Examples
///
/// ```rust,no_run
/// use hotswap_context::metrics::ReloadMetrics;
/// use opentelemetry::global;
///
/// let metrics = ReloadMetrics::new(global::meter("hotswap-context"));
///
/// let timer = metrics.start_reload();
/// // ... rebuild the container ...
/// metrics.record_reload_success(timer);
/// ```
#[derive(Clone)]
pub struct ReloadMetrics {
    reload_attempts: Counter<u64>,
    reload_success: Counter<u64>,
    reload_failures: Counter<u64>,
    reload_duration: Histogram<f64>,
    type_mismatches: Counter<u64>,
    validation_failures: Counter<u64>,
    component_age_seconds: Gauge<i64>,
    last_publication: Arc<parking_lot::Mutex<Instant>>,
}

impl ReloadMetrics {
    /// Create a new metrics collector with the provided meter.
    pub fn new(meter: Meter) -> Self {
        let reload_attempts = meter
            .u64_counter("hotswap_context.reload.attempts")
            .with_description("Total number of reload attempts")
            .build();

        let reload_success = meter
            .u64_counter("hotswap_context.reload.success")
            .with_description("Number of reloads that published a new component")
            .build();

        let reload_failures = meter
            .u64_counter("hotswap_context.reload.failures")
            .with_description("Number of failed reloads")
            .build();

        let reload_duration = meter
            .f64_histogram("hotswap_context.reload.duration")
            .with_description("Duration of container rebuilds in seconds")
            .with_unit("s")
            .build();

        let type_mismatches = meter
            .u64_counter("hotswap_context.reload.type_mismatches")
            .with_description("Number of rebuilt components rejected for their type")
            .build();

        let validation_failures = meter
            .u64_counter("hotswap_context.validation.failures")
            .with_description("Number of rebuilt components rejected by validation")
            .build();

        let component_age_seconds = meter
            .i64_gauge("hotswap_context.component.age")
            .with_description("Time since the published component was built in seconds")
            .with_unit("s")
            .build();

        Self {
            reload_attempts,
            reload_success,
            reload_failures,
            reload_duration,
            type_mismatches,
            validation_failures,
            component_age_seconds,
            last_publication: Arc::new(parking_lot::Mutex::new(Instant::now())),
        }
    }

    /// Start timing a reload; pass the result to one of the `record_reload_*` methods.
    pub fn start_reload(&self) -> Instant {
        self.reload_attempts.add(1, &[]);
        Instant::now()
    }

    /// Record a reload that published a new component.
    pub fn record_reload_success(&self, start: Instant) {
        self.reload_success.add(1, &[]);
        self.reload_duration.record(start.elapsed().as_secs_f64(), &[]);
        *self.last_publication.lock() = Instant::now();
    }

    /// Record a reload that left the previous component in place.
    pub fn record_reload_failure(&self, start: Instant) {
        self.reload_failures.add(1, &[]);
        self.reload_duration.record(start.elapsed().as_secs_f64(), &[]);
    }

    /// Record a component rejected because of its type.
    pub fn record_type_mismatch(&self) {
        self.type_mismatches.add(1, &[]);
    }

    /// Record a component rejected by validation.
    pub fn record_validation_failure(&self) {
        self.validation_failures.add(1, &[]);
    }

    /// Update the published component age gauge.
    pub fn update_component_age(&self) {
        let age_secs = self.last_publication.lock().elapsed().as_secs() as i64;
        self.component_age_seconds.record(age_secs, &[]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::global;

    #[test]
    fn test_metrics_creation() {
        let metrics = ReloadMetrics::new(global::meter("test"));

        let timer = metrics.start_reload();
        metrics.record_reload_success(timer);

        let timer = metrics.start_reload();
        metrics.record_type_mismatch();
        metrics.record_reload_failure(timer);

        metrics.record_validation_failure();
        metrics.update_component_age();
    }

    #[test]
    fn test_metrics_clone() {
        let metrics = ReloadMetrics::new(global::meter("test"));
        let metrics2 = metrics.clone();

        let timer1 = metrics.start_reload();
        let timer2 = metrics2.start_reload();

        metrics.record_reload_success(timer1);
        metrics2.record_reload_failure(timer2);
    }
}
