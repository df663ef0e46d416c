//! Stream demultiplexer for decoding-engine output.
//!
//! Each line is either telemetry (forwarded to the pipeline, never logged)
//! or a diagnostic (logged under the `engine` target). Diagnostics that
//! contain a quiet pattern are demoted to `debug`.

use tracing::{debug, info};

use etherspy_protocol::{classify_line, EngineLine};

use crate::pipeline::{IngestPipeline, Origin};

/// How a line was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Empty,
    Telemetry,
    Diagnostic,
    /// Diagnostic matching a quiet pattern.
    Suppressed,
}

/// Routes engine output lines.
#[derive(Clone)]
pub struct StreamDemultiplexer {
    pipeline: IngestPipeline,
    quiet_patterns: Vec<String>,
}

impl StreamDemultiplexer {
    pub fn new(pipeline: IngestPipeline, quiet_patterns: Vec<String>) -> Self {
        let quiet_patterns = quiet_patterns
            .into_iter()
            .filter(|p| !p.is_empty())
            .collect();
        Self {
            pipeline,
            quiet_patterns,
        }
    }

    /// Handle one line of output.
    pub async fn dispatch(&self, line: &str) -> LineKind {
        match classify_line(line) {
            EngineLine::Empty => LineKind::Empty,
            EngineLine::Telemetry(raw) => {
                self.pipeline.ingest_map(raw, Origin::Engine).await;
                LineKind::Telemetry
            }
            EngineLine::Diagnostic(text) => {
                self.pipeline.stats().record_diagnostic();
                if self.is_quiet(text) {
                    debug!(target: "engine", "{}", text);
                    LineKind::Suppressed
                } else {
                    info!(target: "engine", "{}", text);
                    LineKind::Diagnostic
                }
            }
        }
    }

    pub fn pipeline(&self) -> &IngestPipeline {
        &self.pipeline
    }

    fn is_quiet(&self, text: &str) -> bool {
        self.quiet_patterns.iter().any(|p| text.contains(p.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broadcast::Broadcaster;
    use crate::stats::StatisticsCollector;
    use crate::store::InMemoryStore;
    use std::sync::Arc;

    fn demux() -> (Arc<InMemoryStore>, StreamDemultiplexer) {
        let store = Arc::new(InMemoryStore::new());
        let pipeline = IngestPipeline::new(
            store.clone(),
            store.clone(),
            Broadcaster::new(),
            Arc::new(StatisticsCollector::new()),
        );
        let quiet = vec!["Tuned to".to_string(), String::new()];
        (store, StreamDemultiplexer::new(pipeline, quiet))
    }

    #[tokio::test]
    async fn test_telemetry_is_stored() {
        let (store, demux) = demux();
        let kind = demux
            .dispatch(r#"{"time":"2024-01-17 10:30:00","model":"LaCrosse-TX141THBv2","id":221}"#)
            .await;

        assert_eq!(kind, LineKind::Telemetry);
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].sensor_id, "221");
    }

    #[tokio::test]
    async fn test_diagnostics_are_not_stored() {
        let (store, demux) = demux();

        assert_eq!(demux.dispatch("Found Rafael Micro R820T tuner").await, LineKind::Diagnostic);
        assert_eq!(demux.dispatch("[SDR] Tuned to 433.920MHz.").await, LineKind::Suppressed);
        assert_eq!(demux.dispatch("{broken json}").await, LineKind::Diagnostic);
        assert_eq!(demux.dispatch("   ").await, LineKind::Empty);

        assert!(store.is_empty().await);
        assert_eq!(demux.pipeline.stats().snapshot().diagnostic_lines, 3);
    }

    #[tokio::test]
    async fn test_telemetry_without_id_is_dropped() {
        let (store, demux) = demux();
        assert_eq!(
            demux.dispatch(r#"{"model":"Noise","freq":433.9}"#).await,
            LineKind::Telemetry
        );
        assert!(store.is_empty().await);
    }
}
