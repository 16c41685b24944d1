//! Prometheus metrics for the prediction service.

use lazy_static::lazy_static;
use once_cell::sync::OnceCell;
use prometheus::{
    CounterVec, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};

const NAMESPACE: &str = "comment_sentiment";

/// Container for all prediction metrics
pub struct PredictionMetrics {
    /// Predicted labels
    pub predictions_total: CounterVec,

    /// Prediction calls by kind (single, batch)
    pub requests_total: CounterVec,

    /// Rejected or failed prediction calls by error code
    pub errors_total: CounterVec,

    /// Number of texts per batch call
    pub batch_size: Histogram,

    /// Vectorize + predict latency
    pub inference_duration: HistogramVec,

    /// 1 while a model is loaded and serving
    pub model_loaded: Gauge,
}

impl PredictionMetrics {
    fn new() -> Self {
        Self {
            predictions_total: CounterVec::new(
                Opts::new("predictions_total", "Total number of predicted labels")
                    .namespace(NAMESPACE),
                &["label"],
            )
            .expect("Failed to create predictions_total metric"),

            requests_total: CounterVec::new(
                Opts::new("prediction_requests_total", "Total number of prediction calls")
                    .namespace(NAMESPACE),
                &["kind"],
            )
            .expect("Failed to create prediction_requests_total metric"),

            errors_total: CounterVec::new(
                Opts::new(
                    "prediction_errors_total",
                    "Total number of rejected or failed prediction calls",
                )
                .namespace(NAMESPACE),
                &["code"],
            )
            .expect("Failed to create prediction_errors_total metric"),

            batch_size: Histogram::with_opts(
                HistogramOpts::new("prediction_batch_size", "Number of texts per batch call")
                    .namespace(NAMESPACE)
                    .buckets(vec![1.0, 5.0, 10.0, 25.0, 50.0, 75.0, 100.0]),
            )
            .expect("Failed to create prediction_batch_size metric"),

            inference_duration: HistogramVec::new(
                HistogramOpts::new(
                    "inference_duration_seconds",
                    "Duration of vectorize + predict per call",
                )
                .namespace(NAMESPACE)
                .buckets(vec![
                    0.0001, 0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0,
                ]),
                &["kind"],
            )
            .expect("Failed to create inference_duration_seconds metric"),

            model_loaded: Gauge::with_opts(
                Opts::new("model_loaded", "Whether a model is loaded and serving")
                    .namespace(NAMESPACE),
            )
            .expect("Failed to create model_loaded metric"),
        }
    }
}

lazy_static! {
    /// Registry holding the prediction metrics
    pub static ref PROMETHEUS_REGISTRY: Registry = Registry::new();

    /// Global prediction metrics instance
    pub static ref PREDICTION_METRICS: PredictionMetrics = PredictionMetrics::new();
}

static METRICS_INIT: OnceCell<()> = OnceCell::new();

/// Register the prediction metrics; later calls are no-ops
pub fn init_metrics() -> Result<(), prometheus::Error> {
    METRICS_INIT
        .get_or_try_init(|| {
            let m = &*PREDICTION_METRICS;
            PROMETHEUS_REGISTRY.register(Box::new(m.predictions_total.clone()))?;
            PROMETHEUS_REGISTRY.register(Box::new(m.requests_total.clone()))?;
            PROMETHEUS_REGISTRY.register(Box::new(m.errors_total.clone()))?;
            PROMETHEUS_REGISTRY.register(Box::new(m.batch_size.clone()))?;
            PROMETHEUS_REGISTRY.register(Box::new(m.inference_duration.clone()))?;
            PROMETHEUS_REGISTRY.register(Box::new(m.model_loaded.clone()))?;

            tracing::info!("Prediction metrics initialized");
            Ok(())
        })
        .map(|_| ())
}

/// Render all registered metrics in the Prometheus text format
pub fn gather_metrics() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();
    let metric_families = PROMETHEUS_REGISTRY.gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
        return String::from("# Error encoding metrics\n");
    }

    String::from_utf8(buffer).unwrap_or_else(|e| {
        tracing::error!("Failed to convert metrics to string: {}", e);
        String::from("# Error converting metrics\n")
    })
}
