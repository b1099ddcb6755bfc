/*!
Observability infrastructure for pipecache.

- Structured logging through `tracing`, as text or JSON
- Prometheus metrics for object transfers and volume copies (feature `metrics`)
*/

use std::fmt;
use std::str::FromStr;

#[cfg(feature = "metrics")]
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Registry, TextEncoder};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;
#[cfg(feature = "metrics")]
use std::time::Instant;
use tracing::subscriber::set_global_default;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry as TracingRegistry};

use crate::{CacheError, Result};

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(CacheError::configuration(format!(
                "unknown log format '{other}', expected 'text' or 'json'"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Text => f.write_str("text"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default level, which is `info`, or `debug` when
/// `verbose` is set. Logs go to stderr so command output on stdout stays clean.
pub fn init_logging(format: LogFormat, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| CacheError::configuration(format!("Invalid log filter: {e}")))?;

    let registry = TracingRegistry::default().with(filter);
    let installed = match format {
        LogFormat::Json => set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(false)
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            ),
        ),
        LogFormat::Text => set_global_default(
            registry.with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_writer(std::io::stderr),
            ),
        ),
    };

    installed.map_err(|e| {
        CacheError::configuration(format!("Failed to set global tracing subscriber: {e}"))
    })?;

    #[cfg(feature = "metrics")]
    CacheMetrics::global();

    tracing::debug!(format = %format, "Logging initialized");
    Ok(())
}

#[cfg(feature = "metrics")]
static METRICS: OnceLock<Option<CacheMetrics>> = OnceLock::new();

/// Process-wide counters and histograms for cache runs
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct CacheMetrics {
    pub object_uploads_total: Counter,
    pub object_downloads_total: Counter,
    pub object_errors_total: Counter,
    pub transfer_latency_seconds: Histogram,
    pub archive_size_bytes: Histogram,
    pub volume_entries_copied_total: Counter,

    registry: Registry,
}

#[cfg(feature = "metrics")]
impl CacheMetrics {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let object_uploads_total = counter(
            &registry,
            "pipecache_object_uploads_total",
            "Archives uploaded to object storage",
        )?;
        let object_downloads_total = counter(
            &registry,
            "pipecache_object_downloads_total",
            "Archives downloaded from object storage",
        )?;
        let object_errors_total = counter(
            &registry,
            "pipecache_object_errors_total",
            "Failed object-storage transfers",
        )?;
        let volume_entries_copied_total = counter(
            &registry,
            "pipecache_volume_entries_copied_total",
            "Cache entries copied to or from a shared volume",
        )?;
        let transfer_latency_seconds = histogram(
            &registry,
            HistogramOpts::new(
                "pipecache_transfer_latency_seconds",
                "Duration of object-storage transfers in seconds",
            ),
        )?;
        let archive_size_bytes = histogram(
            &registry,
            HistogramOpts::new("pipecache_archive_size_bytes", "Size of packed archives")
                .buckets(prometheus::exponential_buckets(1024.0, 4.0, 12).map_err(|e| {
                    CacheError::configuration(format!("Invalid archive size buckets: {e}"))
                })?),
        )?;

        Ok(Self {
            object_uploads_total,
            object_downloads_total,
            object_errors_total,
            transfer_latency_seconds,
            archive_size_bytes,
            volume_entries_copied_total,
            registry,
        })
    }

    /// Global metrics instance, `None` if registration failed
    pub fn global() -> Option<&'static CacheMetrics> {
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

    pub fn record_upload(&self) {
        self.object_uploads_total.inc();
    }

    pub fn record_download(&self) {
        self.object_downloads_total.inc();
    }

    pub fn record_object_error(&self) {
        self.object_errors_total.inc();
    }

    pub fn record_transfer_latency(&self, duration: std::time::Duration) {
        self.transfer_latency_seconds.observe(duration.as_secs_f64());
    }

    pub fn record_archive_size(&self, size_bytes: u64) {
        self.archive_size_bytes.observe(size_bytes as f64);
    }

    pub fn record_volume_entry_copied(&self) {
        self.volume_entries_copied_total.inc();
    }

    /// Render all metrics in the Prometheus text exposition format
    pub fn gather_metrics(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| CacheError::configuration(format!("Failed to encode metrics: {e}")))?;

        String::from_utf8(buffer).map_err(|e| {
            CacheError::configuration(format!("Failed to convert metrics to string: {e}"))
        })
    }
}

#[cfg(feature = "metrics")]
fn counter(registry: &Registry, name: &str, help: &str) -> Result<Counter> {
    let counter = Counter::new(name, help)
        .map_err(|e| CacheError::configuration(format!("Failed to create {name}: {e}")))?;
    registry
        .register(Box::new(counter.clone()))
        .map_err(|e| CacheError::configuration(format!("Failed to register {name}: {e}")))?;
    Ok(counter)
}

#[cfg(feature = "metrics")]
fn histogram(registry: &Registry, opts: HistogramOpts) -> Result<Histogram> {
    let name = opts.common_opts.name.clone();
    let histogram = Histogram::with_opts(opts)
        .map_err(|e| CacheError::configuration(format!("Failed to create {name}: {e}")))?;
    registry
        .register(Box::new(histogram.clone()))
        .map_err(|e| CacheError::configuration(format!("Failed to register {name}: {e}")))?;
    Ok(histogram)
}

/// Render the global metrics, or an empty string when metrics are disabled
#[cfg(feature = "metrics")]
pub fn gather_metrics() -> Result<String> {
    match CacheMetrics::global() {
        Some(metrics) => metrics.gather_metrics(),
        None => Ok(String::new()),
    }
}

#[cfg(feature = "metrics")]
#[derive(Debug, Clone, Copy)]
enum Transfer {
    Upload,
    Download,
}

/// Measures one object transfer and records its outcome
#[cfg(feature = "metrics")]
#[derive(Debug)]
pub struct MetricsTimer {
    start: Instant,
    transfer: Transfer,
}

#[cfg(feature = "metrics")]
impl MetricsTimer {
    pub fn start_upload() -> Self {
        Self::start(Transfer::Upload)
    }

    pub fn start_download() -> Self {
        Self::start(Transfer::Download)
    }

    fn start(transfer: Transfer) -> Self {
        Self {
            start: Instant::now(),
            transfer,
        }
    }

    /// Record a successful transfer
    pub fn finish(self) {
        if let Some(metrics) = CacheMetrics::global() {
            metrics.record_transfer_latency(self.start.elapsed());
            match self.transfer {
                Transfer::Upload => metrics.record_upload(),
                Transfer::Download => metrics.record_download(),
            }
        }
    }

    /// Record a failed transfer
    pub fn finish_with_error(self) {
        if let Some(metrics) = CacheMetrics::global() {
            metrics.record_transfer_latency(self.start.elapsed());
            metrics.record_object_error();
        }
    }
}
