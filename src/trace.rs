use opentelemetry::trace::{SpanContext, TraceContextExt};
use thiserror::Error;
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Identifiers of the active trace, hex encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceIds {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagError {
    #[error("no active trace to tag")]
    NoActiveTrace,
}

/// The narrow view the correlation middleware needs of a tracing backend.
pub trait TraceContextProvider: Send + Sync {
    /// The trace and span active for the caller, if any.
    fn current_trace(&self) -> Option<TraceIds>;

    /// Attach `key = value` to the active trace.
    fn tag_current_trace(&self, key: &str, value: &str) -> Result<(), TagError>;
}

/// Reads the OpenTelemetry context of the current [`tracing::Span`].
///
/// Needs a [`tracing_opentelemetry`] layer in the installed subscriber,
/// without it no trace is ever reported as active.
#[derive(Debug, Clone, Copy, Default)]
pub struct OtelTraceProvider;

impl TraceContextProvider for OtelTraceProvider {
    fn current_trace(&self) -> Option<TraceIds> {
        current_span_context().map(|span_context| TraceIds {
            trace_id: span_context.trace_id().to_string(),
            span_id: span_context.span_id().to_string(),
        })
    }

    /// Uses [`OpenTelemetrySpanExt::set_attribute`], the tag is only visible
    /// to the OpenTelemetry layer and not to the other layers of the subscriber.
    fn tag_current_trace(&self, key: &str, value: &str) -> Result<(), TagError> {
        if current_span_context().is_none() {
            return Err(TagError::NoActiveTrace);
        }
        tracing::Span::current().set_attribute(key.to_owned(), value.to_owned());
        Ok(())
    }
}

/// Never reports an active trace.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTraceProvider;

impl TraceContextProvider for NoopTraceProvider {
    fn current_trace(&self) -> Option<TraceIds> {
        None
    }

    fn tag_current_trace(&self, _key: &str, _value: &str) -> Result<(), TagError> {
        Err(TagError::NoActiveTrace)
    }
}

/// Extract the current OTEL trace id
///
/// This can be used to report the trace id to clients
/// to better trace further problems for specifics requests encounterd by your API consumers
pub fn current_otel_trace_id() -> Option<String> {
    current_span_context().map(|span_context| span_context.trace_id().to_string())
}

fn current_span_context() -> Option<SpanContext> {
    let context = tracing::Span::current().context();
    let span = context.span();
    let span_context = span.span_context();
    span_context.is_valid().then(|| span_context.clone())
}
