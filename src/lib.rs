//! # Request correlation for Rust web services
//!
//! This crate ties together, for every HTTP request served by a tower/axum app,
//! the distributed trace of the request, the caller supplied `X-Correlation-ID`
//! and the structured JSON logs written while the request is handled.
//!
//! ## Overview
//!
//! | Module      | Role                                                              |
//! |-------------|-------------------------------------------------------------------|
//! | [`context`] | identity of the request being served, scoped to its task           |
//! | [`http`]    | [`CorrelationLayer`](http::CorrelationLayer) tower middleware      |
//! | [`logging`] | [`Logger`] facade, JSON emitter and `tracing` bridge               |
//! | [`trace`]   | [`TraceContextProvider`] backed by OpenTelemetry                   |
//! | [`config`]  | environment sourced configuration                                  |
//!
//! ## Implementation Details
//! Traces are read through the `tracing` ecosystem: the middleware opens a
//! `tracing` span per request and `tracing-opentelemetry` maps it to an
//! OpenTelemetry span, so the trace and span ids found in the logs are the ones
//! exported by your OpenTelemetry pipeline.
//!
//! Every record is enriched from the current [`RequestIdentity`], which lives in
//! a tokio task-local. Concurrent requests never see each other's identifiers
//! and nothing leaks once a request completes, fails or is cancelled.
//!
//! ```no_run
//! use axum::{routing::get, Router};
//! use tower_correlation::{fields, http::CorrelationLayer, Config, Logger};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let logger = Logger::from_config(&Config::from_env()?)?;
//! let handler_logger = logger.clone();
//!
//! let app: Router = Router::new()
//!     .route(
//!         "/",
//!         get(move || async move {
//!             handler_logger.info("Handling root endpoint request.", fields! {});
//!             "hello"
//!         }),
//!     )
//!     .layer(CorrelationLayer::new(logger));
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod context;
mod helper;
pub mod http;
pub mod logging;
pub mod trace;

pub use config::{Config, ConfigError, InitError, SinkTarget};
pub use context::{current, FutureExt, RequestIdentity};
pub use logging::{JsonEmitter, Logger, LoggerLayer};
pub use trace::{current_otel_trace_id, TagError, TraceContextProvider, TraceIds};
