//! Ambient request identity.
//!
//! The identity of the request being handled (trace id, span id and the
//! caller supplied correlation id) is stored in Tokio task-local storage.
//! The binding is attached to the future being polled, not to the worker
//! thread polling it, so it follows the request across every `.await` point
//! and two requests multiplexed on the same worker never observe each other.
//!
//! ```
//! use tower_correlation::context::{self, RequestIdentity};
//!
//! # tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(async {
//! let identity = RequestIdentity::new().with_correlation_id("req-42");
//!
//! context::establish(identity, async {
//!     assert_eq!(context::current().correlation_id(), Some("req-42"));
//! })
//! .await;
//!
//! assert!(context::current().is_empty());
//! # });
//! ```

use std::{
    borrow::Cow,
    future::Future,
    sync::{Arc, OnceLock},
};

use serde_json::{Map, Value};
use tokio::task::futures::TaskLocalFuture;

use crate::trace::TraceIds;

/// Field name under which the trace id is rendered in log records.
pub const TRACE_ID_FIELD: &str = "trace_id";
/// Field name under which the span id is rendered in log records.
pub const SPAN_ID_FIELD: &str = "span_id";
/// Default field name under which the correlation id is rendered in log records.
pub const CORRELATION_ID_FIELD: &str = "correlation_id";

tokio::task_local! {
    static CURRENT: Arc<RequestIdentity>;
}

/// A future running with a [`RequestIdentity`] bound as the current one.
///
/// Dropping it, whether it completed or not, releases the binding.
pub type Scoped<F> = TaskLocalFuture<Arc<RequestIdentity>, F>;

/// Identity of the request being handled.
///
/// Immutable once built: the `with_*` methods consume the value.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestIdentity {
    trace_id: Option<String>,
    span_id: Option<String>,
    correlation_id: Option<String>,
    correlation_field: Cow<'static, str>,
    extra: Map<String, Value>,
}

impl Default for RequestIdentity {
    fn default() -> Self {
        Self {
            trace_id: None,
            span_id: None,
            correlation_id: None,
            correlation_field: Cow::Borrowed(CORRELATION_ID_FIELD),
            extra: Map::new(),
        }
    }
}

impl RequestIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trace(self, trace: TraceIds) -> Self {
        RequestIdentity {
            trace_id: Some(trace.trace_id),
            span_id: Some(trace.span_id),
            ..self
        }
    }

    pub fn with_trace_id(self, trace_id: impl Into<String>) -> Self {
        RequestIdentity {
            trace_id: Some(trace_id.into()),
            ..self
        }
    }

    pub fn with_span_id(self, span_id: impl Into<String>) -> Self {
        RequestIdentity {
            span_id: Some(span_id.into()),
            ..self
        }
    }

    pub fn with_correlation_id(self, correlation_id: impl Into<String>) -> Self {
        RequestIdentity {
            correlation_id: Some(correlation_id.into()),
            ..self
        }
    }

    /// Render the correlation id under `field` instead of [`CORRELATION_ID_FIELD`].
    pub fn with_correlation_field(self, field: impl Into<Cow<'static, str>>) -> Self {
        RequestIdentity {
            correlation_field: field.into(),
            ..self
        }
    }

    /// Attach an additional field carried by every record of the request.
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    pub fn span_id(&self) -> Option<&str> {
        self.span_id.as_deref()
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn correlation_field(&self) -> &str {
        &self.correlation_field
    }

    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// `true` when no field would be added to a log record.
    pub fn is_empty(&self) -> bool {
        self.non_empty_fields().is_empty()
    }

    /// The fields merged into every log record emitted under this identity.
    ///
    /// Absent and empty identifiers are skipped.
    pub fn non_empty_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        let identifiers = [
            (TRACE_ID_FIELD, &self.trace_id),
            (SPAN_ID_FIELD, &self.span_id),
            (self.correlation_field.as_ref(), &self.correlation_id),
        ];
        for (key, value) in identifiers {
            if let Some(value) = value.as_deref().filter(|value| !value.is_empty()) {
                fields.insert(key.to_owned(), Value::String(value.to_owned()));
            }
        }
        for (key, value) in &self.extra {
            if !value.is_null() {
                fields.insert(key.clone(), value.clone());
            }
        }
        fields
    }
}

/// Run `future` with `identity` as the current identity.
///
/// Every poll of `future`, and of everything it awaits, observes `identity`.
/// The previously current identity is restored between polls and once the
/// returned future is dropped.
pub fn establish<F>(identity: impl Into<Arc<RequestIdentity>>, future: F) -> Scoped<F>
where
    F: Future,
{
    CURRENT.scope(identity.into(), future)
}

/// Run `f` with `identity` as the current identity.
pub fn establish_sync<R>(identity: impl Into<Arc<RequestIdentity>>, f: impl FnOnce() -> R) -> R {
    CURRENT.sync_scope(identity.into(), f)
}

/// The identity of the request being handled, or the empty identity outside of one.
pub fn current() -> Arc<RequestIdentity> {
    CURRENT.try_with(Arc::clone).unwrap_or_else(|_| empty())
}

/// Bind the identity current right now to `future`.
///
/// Use it for work handed to `tokio::spawn`, a spawned task does not inherit
/// the task-local storage of its parent.
pub fn in_current_context<F>(future: F) -> Scoped<F>
where
    F: Future,
{
    CURRENT.scope(current(), future)
}

fn empty() -> Arc<RequestIdentity> {
    static EMPTY: OnceLock<Arc<RequestIdentity>> = OnceLock::new();
    EMPTY.get_or_init(Default::default).clone()
}

/// Extension methods binding a [`RequestIdentity`] to a future.
pub trait FutureExt: Future + Sized {
    /// See [`establish`].
    fn with_identity(self, identity: impl Into<Arc<RequestIdentity>>) -> Scoped<Self> {
        establish(identity, self)
    }

    /// See [`in_current_context`].
    fn in_current_context(self) -> Scoped<Self> {
        in_current_context(self)
    }
}

impl<F: Future> FutureExt for F {}
