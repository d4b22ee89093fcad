use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::sync::OnceLock;
use std::time::Instant;

/// OpenTelemetry metrics for server observability.
///
/// Tracks connections, commands, pub/sub traffic, persistence and errors.
/// Singleton instance accessed via `Metrics::get()`.
pub struct Metrics {
    // Server-level metrics
    pub connections_total: Counter<u64>,
    pub errors_total: Counter<u64>,

    // Command-specific metrics
    pub commands_total: Counter<u64>,
    pub command_duration: Histogram<f64>,

    // Pub/sub metrics
    pub messages_published_total: Counter<u64>,
    pub messages_delivered_total: Counter<u64>,

    // Persistence metrics
    pub persistence_operations_total: Counter<u64>,
    pub persistence_operation_duration: Histogram<f64>,
    pub persistence_errors_total: Counter<u64>,

    // Keyspace metrics
    pub expired_keys_total: Counter<u64>,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

impl Metrics {
    pub fn init() -> &'static Self {
        METRICS.get_or_init(|| {
            let meter = global::meter("coral-db");

            Metrics {
                connections_total: meter
                    .u64_counter("coral_connections_total")
                    .with_description("Total number of client connections")
                    .init(),

                errors_total: meter
                    .u64_counter("coral_errors_total")
                    .with_description("Total number of errors returned to clients")
                    .init(),

                commands_total: meter
                    .u64_counter("coral_commands_total")
                    .with_description("Total number of commands executed")
                    .init(),

                command_duration: meter
                    .f64_histogram("coral_command_duration_seconds")
                    .with_description("Command execution duration in seconds")
                    .init(),

                messages_published_total: meter
                    .u64_counter("coral_messages_published_total")
                    .with_description("Total number of PUBLISH calls")
                    .init(),

                messages_delivered_total: meter
                    .u64_counter("coral_messages_delivered_total")
                    .with_description("Total number of messages pushed to subscribers")
                    .init(),

                persistence_operations_total: meter
                    .u64_counter("coral_persistence_operations_total")
                    .with_description("Total number of snapshot and append-log operations")
                    .init(),

                persistence_operation_duration: meter
                    .f64_histogram("coral_persistence_operation_duration_seconds")
                    .with_description("Snapshot and append-log operation duration in seconds")
                    .init(),

                persistence_errors_total: meter
                    .u64_counter("coral_persistence_errors_total")
                    .with_description("Total number of failed persistence operations")
                    .init(),

                expired_keys_total: meter
                    .u64_counter("coral_expired_keys_total")
                    .with_description("Total number of expired keys removed by housekeeping")
                    .init(),
            }
        })
    }

    pub fn get() -> &'static Self {
        Self::init()
    }

    pub fn record_command(&self, command: &'static str, duration: f64) {
        let labels = &[KeyValue::new("command", command)];
        self.commands_total.add(1, labels);
        self.command_duration.record(duration, labels);
    }

    pub fn record_error(&self, error_type: &'static str, command: Option<&'static str>) {
        let mut labels = vec![KeyValue::new("error_type", error_type)];
        if let Some(cmd) = command {
            labels.push(KeyValue::new("command", cmd));
        }
        self.errors_total.add(1, &labels);
    }

    pub fn increment_connections(&self) {
        self.connections_total.add(1, &[]);
    }

    pub fn record_publish(&self) {
        self.messages_published_total.add(1, &[]);
    }

    pub fn record_delivered(&self, count: u64) {
        self.messages_delivered_total.add(count, &[]);
    }

    pub fn record_persistence(&self, operation: &'static str, duration: f64) {
        let labels = &[KeyValue::new("operation", operation)];
        self.persistence_operations_total.add(1, labels);
        self.persistence_operation_duration.record(duration, labels);
    }

    pub fn record_persistence_error(&self, operation: &'static str) {
        self.persistence_errors_total
            .add(1, &[KeyValue::new("operation", operation)]);
    }

    pub fn record_expired(&self, count: u64) {
        if count > 0 {
            self.expired_keys_total.add(count, &[]);
        }
    }
}

/// Timer utility for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}
