//! Builder log replay.
//!
//! Builders cannot reach the orchestrator's log sink, so their structured
//! stdout records are captured and re-emitted here once the build is over,
//! attributed to a synthetic `Builder-{DataStandard}-{JobId}` logger.

use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::Level;

use crate::domain::{DataStandard, JobId};

const LEVEL_KEYS: [&str; 3] = ["Level", "level", "@l"];
const TEMPLATE_KEYS: [&str; 2] = ["MessageTemplate", "@mt"];
const MESSAGE_KEYS: [&str; 3] = ["Message", "message", "@m"];

/// Message used when a record carries none
pub const NO_MESSAGE: &str = "<no message>";

/// One replayed builder record
#[derive(Debug, Clone, PartialEq)]
pub struct BuilderLogRecord {
    /// `Builder-{DataStandard}-{JobId}`
    pub logger_name: String,
    pub level: Level,
    pub message: String,

    /// Original record fields plus `server.name`
    pub fields: Map<String, Value>,
}

/// Destination for replayed records
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &BuilderLogRecord);
}

/// Emits replayed records as `tracing` events with target `builder`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, record: &BuilderLogRecord) {
        let name = record.logger_name.as_str();
        let fields = Value::Object(record.fields.clone()).to_string();
        let message = record.message.as_str();

        match record.level {
            Level::ERROR => {
                tracing::error!(target: "builder", { logger.name = name, server.name = name, builder.fields = %fields }, "{}", message)
            }
            Level::WARN => {
                tracing::warn!(target: "builder", { logger.name = name, server.name = name, builder.fields = %fields }, "{}", message)
            }
            Level::INFO => {
                tracing::info!(target: "builder", { logger.name = name, server.name = name, builder.fields = %fields }, "{}", message)
            }
            Level::DEBUG => {
                tracing::debug!(target: "builder", { logger.name = name, server.name = name, builder.fields = %fields }, "{}", message)
            }
            Level::TRACE => {
                tracing::trace!(target: "builder", { logger.name = name, server.name = name, builder.fields = %fields }, "{}", message)
            }
        }
    }
}

/// Synthetic logger name for a builder
pub fn logger_name(data_standard: DataStandard, job_id: &JobId) -> String {
    format!("Builder-{}-{}", data_standard, job_id)
}

/// Map a level spelling to a tracing level (case-insensitive).
///
/// `fatal`/`critical` map to ERROR and `verbose` to TRACE.
pub fn parse_level(value: &str) -> Option<Level> {
    match value.trim().to_ascii_lowercase().as_str() {
        "fatal" | "critical" | "error" | "err" => Some(Level::ERROR),
        "warn" | "warning" => Some(Level::WARN),
        "info" | "information" => Some(Level::INFO),
        "debug" => Some(Level::DEBUG),
        "trace" | "verbose" => Some(Level::TRACE),
        _ => None,
    }
}

fn first_string<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|k| fields.get(*k))
        .find_map(Value::as_str)
}

/// Parse one captured line. Lines that are not JSON objects yield `None`.
pub fn parse_line(line: &str, logger_name: &str, default_level: Level) -> Option<BuilderLogRecord> {
    let mut fields = match serde_json::from_str::<Value>(line.trim()) {
        Ok(Value::Object(map)) => map,
        _ => return None,
    };

    let level = first_string(&fields, &LEVEL_KEYS)
        .and_then(parse_level)
        .unwrap_or(default_level);

    let message = first_string(&fields, &TEMPLATE_KEYS)
        .or_else(|| first_string(&fields, &MESSAGE_KEYS))
        .unwrap_or(NO_MESSAGE)
        .to_string();

    fields.insert("server.name".to_string(), Value::String(logger_name.to_string()));

    Some(BuilderLogRecord {
        logger_name: logger_name.to_string(),
        level,
        message,
        fields,
    })
}

/// Replays captured builder logs through a [`LogSink`]
#[derive(Clone)]
pub struct LogForwarder {
    sink: Arc<dyn LogSink>,
    default_level: Level,
}

impl Default for LogForwarder {
    fn default() -> Self {
        Self::new(Arc::new(TracingLogSink), Level::INFO)
    }
}

impl LogForwarder {
    pub fn new(sink: Arc<dyn LogSink>, default_level: Level) -> Self {
        Self {
            sink,
            default_level,
        }
    }

    /// Re-emit every parseable line; returns how many were forwarded.
    /// Unparseable lines are dropped.
    pub fn forward_logs(&self, lines: &[String], data_standard: DataStandard, job_id: &JobId) -> usize {
        let name = logger_name(data_standard, job_id);
        let mut forwarded = 0;

        for line in lines {
            if line.trim().is_empty() {
                continue;
            }

            match parse_line(line, &name, self.default_level) {
                Some(record) => {
                    self.sink.emit(&record);
                    forwarded += 1;
                }
                None => tracing::trace!(logger = %name, "Dropping unparseable builder log line"),
            }
        }

        forwarded
    }
}
