use std::fmt;

use serde_json::Value;
use tracing::{
    field::{Field, Visit},
    Event, Subscriber,
};
use tracing_subscriber::{layer::Context, Layer};

use super::{logger::Logger, record::Fields};
use crate::{context, helper::describe_error};

/// Route `tracing` events through a [`Logger`].
///
/// Events are enriched with the current request identity and written by the
/// logger's emitter, so `tracing::info!` calls from any crate (and `log`
/// records bridged by `tracing-log`) end up in the same sink with the same
/// shape as facade calls. The event target is used as the logger name, both
/// in the record and for level filtering.
///
/// Spans are not filtered, so an OpenTelemetry layer next to this one keeps
/// seeing every request span.
#[derive(Debug, Clone)]
pub struct LoggerLayer {
    logger: Logger,
}

impl LoggerLayer {
    pub fn new(logger: Logger) -> Self {
        LoggerLayer { logger }
    }
}

impl<S> Layer<S> for LoggerLayer
where
    S: Subscriber,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if !self.logger.would_enable(metadata.target(), *metadata.level()) {
            return;
        }

        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        self.logger.dispatch(
            metadata.target(),
            &context::current(),
            *metadata.level(),
            visitor.message.unwrap_or_default(),
            metadata.file().zip(metadata.line()),
            visitor.fields,
        );
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: Option<String>,
    fields: Fields,
}

impl FieldVisitor {
    fn insert(&mut self, field: &Field, value: Value) {
        // Metadata of `log` records, already carried by the record itself.
        if field.name().starts_with("log.") {
            return;
        }
        self.fields.insert(field.name().to_owned(), value);
    }
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = Some(value.to_owned());
        } else {
            self.insert(field, Value::String(value.to_owned()));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = Some(rendered);
        } else {
            self.insert(field, Value::String(rendered));
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        self.insert(field, value.into());
    }

    fn record_u64(&mut self, field: &Field, value: u64) {
        self.insert(field, value.into());
    }

    fn record_f64(&mut self, field: &Field, value: f64) {
        self.insert(field, value.into());
    }

    fn record_bool(&mut self, field: &Field, value: bool) {
        self.insert(field, value.into());
    }

    fn record_error(&mut self, field: &Field, value: &(dyn std::error::Error + 'static)) {
        self.insert(field, Value::Object(describe_error(value)));
    }
}
