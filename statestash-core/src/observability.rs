/*!
Observability for the persistence pipeline.

This module provides:
- Structured logging setup on top of `tracing-subscriber`
- Prometheus counters for restores, saves and evictions (feature `metrics`)
*/

#[cfg(feature = "metrics")]
use prometheus::{Encoder, Histogram, IntCounter, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{PersistError, Result};

/// Default log directive when `RUST_LOG` is unset
pub const DEFAULT_LOG_DIRECTIVE: &str = "statestash_core=info";

/// Outcome of one persistence step, fed to the metrics registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistEvent {
    Restored,
    RestoreFailed,
    Saved { bytes: usize },
    SaveFailed,
    BackendUnavailable,
    Evicted { count: usize },
}

/// Record a pipeline event in the global metrics registry
#[cfg(feature = "metrics")]
pub(crate) fn record(event: PersistEvent) {
    if let Some(metrics) = PersistMetrics::global() {
        metrics.record(event);
    }
}

#[cfg(not(feature = "metrics"))]
pub(crate) fn record(_event: PersistEvent) {}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<PersistMetrics>> = OnceLock::new();

/// Metrics collection for persistence operations
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct PersistMetrics {
    pub restores_total: IntCounter,
    pub restore_errors_total: IntCounter,
    pub saves_total: IntCounter,
    pub save_errors_total: IntCounter,
    pub backend_unavailable_total: IntCounter,
    pub evictions_total: IntCounter,
    pub persisted_bytes: Histogram,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl PersistMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let counter = |name: &str, help: &str| -> Result<IntCounter> {
            let counter = IntCounter::new(name, help).map_err(|e| {
                PersistError::storage(format!("Failed to create {name} metric: {e}"))
            })?;
            registry.register(Box::new(counter.clone())).map_err(|e| {
                PersistError::storage(format!("Failed to register {name}: {e}"))
            })?;
            Ok(counter)
        };

        let restores_total = counter(
            "statestash_restores_total",
            "Stores restored from a storage backend",
        )?;
        let restore_errors_total = counter(
            "statestash_restore_errors_total",
            "Restores that failed and kept in-memory state",
        )?;
        let saves_total = counter("statestash_saves_total", "Store snapshots written")?;
        let save_errors_total = counter(
            "statestash_save_errors_total",
            "Saves that failed during serialize, compress or write",
        )?;
        let backend_unavailable_total = counter(
            "statestash_backend_unavailable_total",
            "Operations skipped because the backend failed its probe",
        )?;
        let evictions_total = counter(
            "statestash_evictions_total",
            "Persisted stores removed by max_stores eviction",
        )?;

        let persisted_bytes = Histogram::with_opts(
            prometheus::HistogramOpts::new(
                "statestash_persisted_bytes",
                "Size of each written value in bytes",
            )
            .buckets(prometheus::exponential_buckets(64.0, 4.0, 8).map_err(|e| {
                PersistError::storage(format!("Failed to build histogram buckets: {e}"))
            })?),
        )
        .map_err(|e| {
            PersistError::storage(format!("Failed to create persisted_bytes metric: {e}"))
        })?;
        registry
            .register(Box::new(persisted_bytes.clone()))
            .map_err(|e| {
                PersistError::storage(format!("Failed to register persisted_bytes: {e}"))
            })?;

        Ok(Self {
            restores_total,
            restore_errors_total,
            saves_total,
            save_errors_total,
            backend_unavailable_total,
            evictions_total,
            persisted_bytes,
            registry,
        })
    }

    /// Get or initialize the global metrics instance
    ///
    /// Returns `None` if the registry could not be built; the failure is logged once.
    pub fn global() -> Option<&'static PersistMetrics> {
        METRICS
            .get_or_init(|| match Self::new() {
                Ok(metrics) => Some(metrics),
                Err(e) => {
                    tracing::warn!(error = %e, "Metrics disabled");
                    None
                }
            })
            .as_ref()
    }

    pub fn record(&self, event: PersistEvent) {
        match event {
            PersistEvent::Restored => self.restores_total.inc(),
            PersistEvent::RestoreFailed => self.restore_errors_total.inc(),
            PersistEvent::Saved { bytes } => {
                self.saves_total.inc();
                self.persisted_bytes.observe(bytes as f64);
            }
            PersistEvent::SaveFailed => self.save_errors_total.inc(),
            PersistEvent::BackendUnavailable => self.backend_unavailable_total.inc(),
            PersistEvent::Evicted { count } => self.evictions_total.inc_by(count as u64),
        }
    }

    /// Gather metrics in Prometheus text format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|e| PersistError::storage(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer)
            .map_err(|e| PersistError::storage(format!("Failed to convert metrics to string: {e}")))
    }
}

/// Initialize the global tracing subscriber
///
/// `RUST_LOG` takes precedence; otherwise [`DEFAULT_LOG_DIRECTIVE`] applies.
///
/// # Arguments
/// * `json` - Emit JSON lines instead of human-readable output
///
/// # Errors
/// * `PersistError::Validation` - If a global subscriber is already installed
pub fn init_observability(json: bool) -> Result<()> {
    #[cfg(feature = "metrics")]
    PersistMetrics::global();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

    let result = if json {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .with_current_span(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer().compact().with_target(false);
        set_global_default(TracingRegistry::default().with(filter).with(fmt_layer))
    };

    result.map_err(|e| {
        PersistError::validation(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    tracing::debug!("statestash observability initialized");
    Ok(())
}

/// Initialize observability with human-readable output
pub fn init_default_observability() -> Result<()> {
    init_observability(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_without_panicking() {
        record(PersistEvent::Restored);
        record(PersistEvent::Saved { bytes: 512 });
        record(PersistEvent::Evicted { count: 2 });
    }

    #[test]
    fn test_second_initialization_fails() {
        // Only one global subscriber may exist per process
        let first = init_observability(true);
        let second = init_observability(false);
        assert!(first.is_err() || second.is_err());
    }

    #[cfg(feature = "metrics")]
    #[test]
    fn test_metrics_gathering() {
        let metrics = PersistMetrics::global().unwrap();
        metrics.record(PersistEvent::SaveFailed);
        metrics.record(PersistEvent::Saved { bytes: 100 });

        let text = metrics.gather_metrics().unwrap();
        assert!(text.contains("statestash_save_errors_total"));
        assert!(text.contains("statestash_persisted_bytes"));
    }
}
