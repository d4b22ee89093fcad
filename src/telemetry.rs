use crate::error::TelemetryError;
use opentelemetry::global;
use opentelemetry_sdk::metrics::MeterProvider;
use prometheus::{Encoder, Registry, TextEncoder};
use tracing::info;

pub struct TelemetryConfig {
    pub enable_metrics: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
        }
    }
}

/// Owns the meter provider and the Prometheus registry it exports into.
pub struct TelemetryService {
    registry: Registry,
    provider: Option<MeterProvider>,
}

impl TelemetryService {
    pub fn new(config: TelemetryConfig) -> Result<Self, TelemetryError> {
        let registry = Registry::new();
        let provider = if config.enable_metrics {
            let exporter = opentelemetry_prometheus::exporter()
                .with_registry(registry.clone())
                .build()
                .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
            let provider = MeterProvider::builder().with_reader(exporter).build();
            global::set_meter_provider(provider.clone());
            Some(provider)
        } else {
            info!("Metrics collection disabled");
            None
        };

        Ok(Self { registry, provider })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current metrics in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| TelemetryError::Export(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Export(e.to_string()))
    }

    pub fn shutdown(&self) {
        if let Some(provider) = &self.provider {
            if let Err(e) = provider.shutdown() {
                tracing::warn!(error = %e, "meter provider shutdown failed");
            }
        }
    }
}

/// Installs the global meter provider, then the [`Metrics`] instruments on
/// top of it.
///
/// [`Metrics`]: crate::metrics::Metrics
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryService, TelemetryError> {
    let service = TelemetryService::new(config)?;
    crate::metrics::Metrics::init();
    info!("OpenTelemetry telemetry initialized");
    Ok(service)
}
