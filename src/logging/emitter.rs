use std::{
    fmt,
    io::{self, Write},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, PoisonError,
    },
};

use serde_json::Value;
use tracing::Level;
use tracing_subscriber::fmt::{writer::BoxMakeWriter, MakeWriter};

use super::record::{Fields, LogRecord};
use crate::helper::render;

/// Logger name of the warnings written to the fallback writer.
pub const FALLBACK_LOGGER: &str = "tower_correlation::emitter";

/// Destination of finished [`LogRecord`]s.
pub trait Emit: Send + Sync + 'static {
    /// Write `record`. Failures are handled by the emitter, never returned.
    fn emit(&self, record: &LogRecord);
}

/// Writes one JSON object per line.
///
/// A record is serialized into a buffer then handed to the sink in a single
/// write, both under one lock, so concurrent records never interleave.
/// A failed write is reported on the fallback writer (stderr by default).
pub struct JsonEmitter {
    sink: BoxMakeWriter,
    fallback: BoxMakeWriter,
    write_lock: Mutex<()>,
    dropped: AtomicU64,
}

impl JsonEmitter {
    pub fn new<W>(sink: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        JsonEmitter {
            sink: BoxMakeWriter::new(sink),
            fallback: BoxMakeWriter::new(io::stderr),
            write_lock: Mutex::new(()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn stdout() -> Self {
        Self::new(io::stdout)
    }

    pub fn with_fallback<W>(self, fallback: W) -> Self
    where
        W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
    {
        JsonEmitter {
            fallback: BoxMakeWriter::new(fallback),
            ..self
        }
    }

    /// Number of records that could not be written to the sink.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    fn report(&self, record: &LogRecord, reason: &str, error: &dyn fmt::Display) {
        self.dropped.fetch_add(1, Ordering::Relaxed);

        let mut fields = Fields::new();
        fields.insert("error".into(), Value::String(render(error)));
        fields.insert("dropped_logger".into(), record.logger().into());
        fields.insert("dropped_level".into(), record.level().as_str().into());
        fields.insert("dropped_message".into(), record.message().into());
        let warning = LogRecord::new(Level::WARN, FALLBACK_LOGGER, reason).with_fields(fields);

        // Nowhere left to report a failing fallback.
        if let Ok(line) = warning.to_json_line() {
            let _ = write_line(&self.fallback, &line);
        }
    }
}

/// Must be called with the write lock held.
fn write_line(make_writer: &BoxMakeWriter, line: &[u8]) -> io::Result<()> {
    let mut writer = make_writer.make_writer();
    writer.write_all(line)?;
    writer.flush()
}

impl Emit for JsonEmitter {
    /// Records reach the sink in the order their `emit` calls take the lock,
    /// which covers serialization, the write and the fallback report.
    fn emit(&self, record: &LogRecord) {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let line = match record.to_json_line() {
            Ok(line) => line,
            Err(error) => return self.report(record, "log record serialization failed", &error),
        };
        if let Err(error) = write_line(&self.sink, &line) {
            self.report(record, "log sink write failed", &error);
        }
    }
}

impl fmt::Debug for JsonEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonEmitter")
            .field("sink", &self.sink)
            .field("fallback", &self.fallback)
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::testing::{CapturedLines, FailingWriter};
    use std::sync::Arc;

    #[test]
    fn test_emit_writes_one_line_per_record() {
        let sink = CapturedLines::default();
        let emitter = JsonEmitter::new(sink.clone());

        emitter.emit(&LogRecord::new(Level::INFO, "svc", "first"));
        emitter.emit(&LogRecord::new(Level::ERROR, "svc", "second"));

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["message"], "first");
        assert_eq!(lines[1]["level"], "ERROR");
        assert_eq!(emitter.dropped(), 0);
    }

    #[test]
    fn test_write_failure_goes_to_fallback() {
        let fallback = CapturedLines::default();
        let emitter = JsonEmitter::new(|| FailingWriter).with_fallback(fallback.clone());

        emitter.emit(&LogRecord::new(Level::INFO, "svc", "lost"));

        assert_eq!(emitter.dropped(), 1);
        let warnings = fallback.lines();
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0]["level"], "WARN");
        assert_eq!(warnings[0]["logger"], FALLBACK_LOGGER);
        assert_eq!(warnings[0]["message"], "log sink write failed");
        assert_eq!(warnings[0]["dropped_message"], "lost");
    }

    #[test]
    fn test_failing_fallback_is_ignored() {
        let emitter = JsonEmitter::new(|| FailingWriter).with_fallback(|| FailingWriter);

        emitter.emit(&LogRecord::new(Level::INFO, "svc", "lost"));

        assert_eq!(emitter.dropped(), 1);
    }

    #[test]
    fn test_concurrent_records_are_not_torn() {
        let sink = CapturedLines::default();
        let emitter = Arc::new(JsonEmitter::new(sink.clone()));

        let handles: Vec<_> = (0..8)
            .map(|thread| {
                let emitter = emitter.clone();
                std::thread::spawn(move || {
                    for n in 0..50 {
                        let message = format!("thread {thread} record {n} {}", "x".repeat(512));
                        emitter.emit(&LogRecord::new(Level::INFO, "svc", message));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 8 * 50);
        assert!(lines.iter().all(|line| line["logger"] == "svc"));
    }

    #[test]
    fn test_concurrent_records_keep_emit_order() {
        let sink = CapturedLines::default();
        let emitter = Arc::new(JsonEmitter::new(sink.clone()));

        let handles: Vec<_> = (0..4_u64)
            .map(|thread| {
                let emitter = emitter.clone();
                std::thread::spawn(move || {
                    for n in 0..100_u64 {
                        let mut fields = Fields::new();
                        fields.insert("thread".into(), thread.into());
                        fields.insert("n".into(), n.into());
                        let record = LogRecord::new(Level::INFO, "svc", "ordered").with_fields(fields);
                        emitter.emit(&record);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let lines = sink.lines();
        for thread in 0..4_u64 {
            let sequence: Vec<u64> = lines
                .iter()
                .filter(|line| line["thread"] == thread)
                .map(|line| line["n"].as_u64().unwrap())
                .collect();
            assert_eq!(sequence, (0..100).collect::<Vec<_>>());
        }
    }
}
