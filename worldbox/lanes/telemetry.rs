use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{BusEvent, EventPublisher};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::runtime::Handle;

/// Builder for lane telemetry sinks.
pub struct LaneTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    sink: Option<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl LaneTelemetryBuilder {
    /// Creates the builder.
    #[must_use]
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            log_path: None,
            sink: None,
            event_publisher: None,
        }
    }

    /// Sets the JSONL log path.
    #[must_use]
    pub fn log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Sets an explicit log sink (takes precedence over `log_path`).
    #[must_use]
    pub fn sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Sets the event publisher.
    #[must_use]
    pub fn event_publisher(mut self, publisher: Arc<dyn EventPublisher>) -> Self {
        self.event_publisher = Some(publisher);
        self
    }

    /// Builds the telemetry handle.
    pub fn build(self) -> Result<LaneTelemetry> {
        let sink = if let Some(sink) = self.sink {
            Some(sink)
        } else if let Some(path) = self.log_path {
            Some(Arc::new(JsonLogger::new(path)?) as Arc<dyn LogSink>)
        } else {
            None
        };
        Ok(LaneTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared across lane components.
#[derive(Clone)]
pub struct LaneTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for LaneTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaneTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl LaneTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> LaneTelemetryBuilder {
        LaneTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(sink) = &self.inner.sink {
            let record =
                LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            if let Err(err) = sink.log(&record) {
                eprintln!("lane telemetry log failed: {err:?}");
            }
        }
    }

    /// Emits an event on the bus when a runtime is available.
    pub fn event(&self, event_type: &str, payload: Value) {
        if let Some(publisher) = &self.inner.publisher {
            let record = BusEvent::now(self.inner.module.clone(), event_type, payload);
            if let Ok(handle) = Handle::try_current() {
                let publisher = Arc::clone(publisher);
                handle.spawn(async move {
                    if let Err(err) = publisher.publish(record).await {
                        eprintln!("lane telemetry event publish failed: {err:?}");
                    }
                });
            }
        }
    }

    /// Records a failed external call; the lane itself stays usable.
    pub fn operation_failed(&self, lane: &str, err: &anyhow::Error) {
        self.log(
            LogLevel::Warn,
            "lane.operation.failed",
            serde_json::json!({ "lane": lane, "error": format!("{err:#}") }),
        );
        self.event(
            "lane.operation.failed",
            serde_json::json!({ "lane": lane }),
        );
    }

    /// Records a superseded (cancelled) operation.
    pub fn operation_superseded(&self, lane: &str) {
        self.log(
            LogLevel::Debug,
            "lane.operation.superseded",
            serde_json::json!({ "lane": lane }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_logging::MemoryLogger;

    #[tokio::test]
    async fn telemetry_writes_failure_records() {
        let memory = Arc::new(MemoryLogger::new(8));
        let telemetry = LaneTelemetry::builder("lanes")
            .sink(memory.clone())
            .build()
            .unwrap();
        telemetry.operation_failed("dictate", &anyhow::anyhow!("boom"));
        let tail = memory.tail(8);
        assert_eq!(tail.len(), 1);
        assert_eq!(tail[0].message, "lane.operation.failed");
        assert_eq!(tail[0].metadata.get("lane").unwrap(), "dictate");
    }

    #[test]
    fn builder_without_sinks_is_quiet() {
        let telemetry = LaneTelemetry::builder("lanes").build().unwrap();
        telemetry.log(LogLevel::Info, "noop", serde_json::json!({}));
    }
}
