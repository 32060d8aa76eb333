use std::{fmt, path::PathBuf, sync::Arc};

use anyhow::Result;
use serde_json::Value;
use shared_event_bus::{BusEvent, EventPublisher};
use shared_logging::{JsonLogger, LogLevel, LogRecord, LogSink};
use tokio::runtime::Handle;

/// Builder for subsystem telemetry sinks.
pub struct SubsystemTelemetryBuilder {
    module: String,
    log_path: Option<PathBuf>,
    sink: Option<Arc<dyn LogSink>>,
    event_publisher: Option<Arc<dyn EventPublisher>>,
}

impl SubsystemTelemetryBuilder {
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
    pub fn build(self) -> Result<SubsystemTelemetry> {
        let sink = if let Some(sink) = self.sink {
            Some(sink)
        } else if let Some(path) = self.log_path {
            Some(Arc::new(JsonLogger::new(path)?) as Arc<dyn LogSink>)
        } else {
            None
        };
        Ok(SubsystemTelemetry {
            inner: Arc::new(TelemetryInner {
                module: self.module,
                sink,
                publisher: self.event_publisher,
            }),
        })
    }
}

/// Telemetry handle shared across subsystem components.
#[derive(Clone)]
pub struct SubsystemTelemetry {
    inner: Arc<TelemetryInner>,
}

impl fmt::Debug for SubsystemTelemetry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubsystemTelemetry")
            .field("module", &self.inner.module)
            .finish()
    }
}

struct TelemetryInner {
    module: String,
    sink: Option<Arc<dyn LogSink>>,
    publisher: Option<Arc<dyn EventPublisher>>,
}

impl SubsystemTelemetry {
    /// Returns a builder.
    #[must_use]
    pub fn builder(module: impl Into<String>) -> SubsystemTelemetryBuilder {
        SubsystemTelemetryBuilder::new(module)
    }

    /// Logs structured metadata.
    pub fn log(&self, level: LogLevel, message: &str, metadata: Value) {
        if let Some(sink) = &self.inner.sink {
            let record =
                LogRecord::new(&self.inner.module, level, message).with_metadata(metadata);
            if let Err(err) = sink.log(&record) {
                eprintln!("subsystem telemetry log failed: {err:?}");
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
                        eprintln!("subsystem telemetry event publish failed: {err:?}");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared_logging::MemoryLogger;

    #[test]
    fn telemetry_routes_to_sink() {
        let memory = Arc::new(MemoryLogger::new(4));
        let telemetry = SubsystemTelemetry::builder("observe")
            .sink(memory.clone())
            .build()
            .unwrap();
        telemetry.log(
            LogLevel::Info,
            "observe.describe.completed",
            serde_json::json!({ "pending": 0 }),
        );
        assert_eq!(memory.tail(4)[0].module, "observe");
    }
}
