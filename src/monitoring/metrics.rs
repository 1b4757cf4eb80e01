//! Pipeline metrics
//!
//! OpenTelemetry counters, histograms, and gauges for stage outcomes,
//! durations, confidence scores, and queue depths. Metrics export via
//! OTLP when OTEL_EXPORTER_OTLP_ENDPOINT is set; otherwise they are
//! collected locally only.

use opentelemetry::metrics::{Counter, Gauge, Histogram, Meter, MeterProvider};
use opentelemetry::KeyValue;
use opentelemetry_sdk::metrics::SdkMeterProvider;

/// Pipeline metrics for stage execution and queue visibility
pub struct Metrics {
    /// Recordings that entered the per-recording pipeline
    pub recordings_processed: Counter<u64>,
    /// Stage completions by stage label
    pub stage_succeeded: Counter<u64>,
    /// Stage failures by stage label
    pub stage_failed: Counter<u64>,
    /// Per-stage duration in seconds
    pub stage_duration_seconds: Histogram<f64>,
    /// End-to-end per-recording duration in seconds
    pub processing_duration_seconds: Histogram<f64>,
    /// Transcript confidence scores
    pub transcript_confidence: Histogram<f64>,
    /// Pending-queue depths by stage label
    pub queue_depth: Gauge<u64>,
    /// Scheduler daily runs completed
    pub daily_runs_completed: Counter<u64>,
}

impl Metrics {
    /// Create metrics from a meter
    pub fn new(meter: &Meter) -> Self {
        Self {
            recordings_processed: meter
                .u64_counter("parley_recordings_processed_total")
                .with_description("Recordings that entered the pipeline")
                .with_unit("recordings")
                .build(),
            stage_succeeded: meter
                .u64_counter("parley_stage_succeeded_total")
                .with_description("Stage completions")
                .with_unit("stages")
                .build(),
            stage_failed: meter
                .u64_counter("parley_stage_failed_total")
                .with_description("Stage failures")
                .with_unit("stages")
                .build(),
            stage_duration_seconds: meter
                .f64_histogram("parley_stage_duration_seconds")
                .with_description("Duration of one stage for one recording")
                .with_unit("s")
                .build(),
            processing_duration_seconds: meter
                .f64_histogram("parley_processing_duration_seconds")
                .with_description("End-to-end duration for one recording")
                .with_unit("s")
                .build(),
            transcript_confidence: meter
                .f64_histogram("parley_transcript_confidence")
                .with_description("Transcript confidence scores")
                .build(),
            queue_depth: meter
                .u64_gauge("parley_queue_depth")
                .with_description("Pending recordings per stage")
                .with_unit("recordings")
                .build(),
            daily_runs_completed: meter
                .u64_counter("parley_daily_runs_completed_total")
                .with_description("Completed scheduler daily runs")
                .with_unit("runs")
                .build(),
        }
    }

    pub fn record_stage_success(&self, stage: &str, duration_secs: f64) {
        let attrs = &[KeyValue::new("stage", stage.to_string())];
        self.stage_succeeded.add(1, attrs);
        self.stage_duration_seconds.record(duration_secs, attrs);
    }

    pub fn record_stage_failure(&self, stage: &str, duration_secs: f64) {
        let attrs = &[KeyValue::new("stage", stage.to_string())];
        self.stage_failed.add(1, attrs);
        self.stage_duration_seconds.record(duration_secs, attrs);
    }

    pub fn record_recording_processed(&self, duration_secs: f64) {
        self.recordings_processed.add(1, &[]);
        self.processing_duration_seconds.record(duration_secs, &[]);
    }

    pub fn record_confidence(&self, confidence: f64) {
        self.transcript_confidence.record(confidence, &[]);
    }

    pub fn set_queue_depth(&self, stage: &str, depth: u64) {
        self.queue_depth
            .record(depth, &[KeyValue::new("stage", stage.to_string())]);
    }
}

/// Initialize the meter provider, with optional OTLP export
pub fn init() -> Result<Metrics, Box<dyn std::error::Error + Send + Sync>> {
    let meter_provider = if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::metrics::PeriodicReader;
        use opentelemetry_sdk::runtime;

        let exporter = opentelemetry_otlp::MetricExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()?;

        let reader = PeriodicReader::builder(exporter, runtime::Tokio)
            .with_interval(std::time::Duration::from_secs(30))
            .build();

        SdkMeterProvider::builder().with_reader(reader).build()
    } else {
        tracing::info!("OTEL_EXPORTER_OTLP_ENDPOINT not set, metrics collected locally only");
        SdkMeterProvider::builder().build()
    };

    let meter = meter_provider.meter("parley");
    let metrics = Metrics::new(&meter);

    opentelemetry::global::set_meter_provider(meter_provider);

    Ok(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_record_without_exporter() {
        let provider = SdkMeterProvider::builder().build();
        let metrics = Metrics::new(&provider.meter("test"));

        metrics.record_stage_success("download", 1.2);
        metrics.record_stage_failure("transcription", 3.4);
        metrics.record_recording_processed(10.0);
        metrics.record_confidence(0.92);
        metrics.set_queue_depth("upload", 5);
        metrics.daily_runs_completed.add(1, &[]);
    }
}
