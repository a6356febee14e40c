//! Request correlation middleware for tower/axum HTTP services.

mod extractors;
mod service;

pub use service::{Correlation, CorrelationLayer, Filter, HandlerFailure, Outcome, ResponseFuture};

use http::HeaderName;

/// Header carrying the caller supplied correlation id.
pub const CORRELATION_ID_HEADER: HeaderName = HeaderName::from_static("x-correlation-id");

/// Key of the trace tag holding the correlation id.
pub const CORRELATION_ID_TAG: &str = "correlation_id";
