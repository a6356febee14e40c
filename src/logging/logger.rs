use std::{
    backtrace::{Backtrace, BacktraceStatus},
    error::Error,
    fmt,
    panic::Location,
    sync::Arc,
};

use serde_json::Value;
use tracing::Level;
use tracing_subscriber::filter::Targets;

use super::{
    emitter::{Emit, JsonEmitter},
    record::{Fields, LogRecord},
};
use crate::{
    config::{Config, InitError},
    context::{self, RequestIdentity},
    helper::{describe_error, render},
};

/// The application logging facade.
///
/// Every record is enriched with the fields of the [`RequestIdentity`]
/// current for the caller (see [`crate::context`]), fields passed by the
/// caller take precedence over them.
///
/// Cloning is cheap, clones share the filter and the emitter. Build one at
/// startup and hand it to the middleware and to the handlers.
///
/// ```
/// use tower_correlation::{fields, logging::{JsonEmitter, Logger}};
///
/// let logger = Logger::new("my-service", JsonEmitter::stdout());
/// logger.info("Handling root endpoint request.", fields! {});
/// logger.info("Received request for item", fields! { "item_id_param" => 101 });
/// ```
#[derive(Clone)]
pub struct Logger {
    name: Arc<str>,
    filter: Arc<Targets>,
    emitter: Arc<dyn Emit>,
}

impl Logger {
    /// A logger named `name` letting `INFO` and more severe records through.
    pub fn new(name: impl Into<Arc<str>>, emitter: impl Emit) -> Self {
        Logger {
            name: name.into(),
            filter: Arc::new(Targets::new().with_default(Level::INFO)),
            emitter: Arc::new(emitter),
        }
    }

    /// Build the logger described by `config`, opening its sink.
    pub fn from_config(config: &Config) -> Result<Self, InitError> {
        let emitter = JsonEmitter::new(config.sink.make_writer()?);
        Ok(Logger::new(config.service_name.as_str(), emitter).with_filter(config.log_level.clone()))
    }

    /// Minimum levels per logger name.
    ///
    /// Bridged `tracing` events are filtered against their target instead.
    pub fn with_filter(self, filter: Targets) -> Self {
        Logger {
            filter: Arc::new(filter),
            ..self
        }
    }

    /// A logger sharing the filter and the emitter of `self` under another name.
    pub fn named(&self, name: impl Into<Arc<str>>) -> Self {
        Logger {
            name: name.into(),
            ..self.clone()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn enabled(&self, level: Level) -> bool {
        self.would_enable(&self.name, level)
    }

    pub(crate) fn would_enable(&self, logger: &str, level: Level) -> bool {
        self.filter.would_enable(logger, &level)
    }

    /// Log `message` enriched with the current request identity.
    #[track_caller]
    pub fn log(&self, level: Level, message: impl Into<String>, fields: Fields) {
        if !self.enabled(level) {
            return;
        }
        let location = Location::caller();
        self.dispatch(
            &self.name,
            &context::current(),
            level,
            message.into(),
            Some((location.file(), location.line())),
            fields,
        );
    }

    /// Log `message` enriched with `identity` rather than the current one.
    #[track_caller]
    pub fn log_in(
        &self,
        identity: &RequestIdentity,
        level: Level,
        message: impl Into<String>,
        fields: Fields,
    ) {
        if !self.enabled(level) {
            return;
        }
        let location = Location::caller();
        self.dispatch(
            &self.name,
            identity,
            level,
            message.into(),
            Some((location.file(), location.line())),
            fields,
        );
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>, fields: Fields) {
        self.log(Level::DEBUG, message, fields);
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>, fields: Fields) {
        self.log(Level::INFO, message, fields);
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>, fields: Fields) {
        self.log(Level::WARN, message, fields);
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>, fields: Fields) {
        self.log(Level::ERROR, message, fields);
    }

    /// Log `message` at `ERROR` with `error` described under the `error` field.
    ///
    /// The description holds the error type, its message, its `source()` chain
    /// and the backtrace of the call under `trace`, captured whatever the value
    /// of `RUST_BACKTRACE`. A `Display`
    /// implementation failing is rendered as a placeholder.
    #[track_caller]
    pub fn error_with<E>(&self, error: &E, message: impl Into<String>, mut fields: Fields)
    where
        E: Error + ?Sized,
    {
        if !self.enabled(Level::ERROR) {
            return;
        }
        let mut description = describe_error(error);
        let backtrace = Backtrace::force_capture();
        if backtrace.status() == BacktraceStatus::Captured {
            description.insert("trace".into(), Value::String(render(&backtrace)));
        }
        fields.insert("error".into(), Value::Object(description));
        self.log(Level::ERROR, message, fields);
    }

    pub(crate) fn dispatch(
        &self,
        logger: &str,
        identity: &RequestIdentity,
        level: Level,
        message: String,
        location: Option<(&'static str, u32)>,
        fields: Fields,
    ) {
        let mut merged = identity.non_empty_fields();
        merged.extend(fields);

        let mut record = LogRecord::new(level, logger, message).with_fields(merged);
        if let Some((file, line)) = location {
            record = record.with_location(file, line);
        }
        self.emitter.emit(&record);
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("name", &self.name)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}
