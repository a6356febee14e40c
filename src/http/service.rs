use core::fmt;
use std::{
    borrow::Cow,
    error::Error,
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{ready, Context, Poll},
    time::Instant,
};

use http::{request::Parts, HeaderName, HeaderValue, Method, Request, Response, StatusCode};
use pin_project_lite::pin_project;
use serde::Serialize;
use tower::{Layer, Service};
use tracing::{Level, Span};

use super::{
    extractors::{extract_correlation_id, extract_request_span},
    CORRELATION_ID_HEADER, CORRELATION_ID_TAG,
};
use crate::{
    context::{self, RequestIdentity, Scoped, CORRELATION_ID_FIELD},
    fields,
    helper::{render, short_type_name},
    logging::{Fields, Logger},
    trace::{OtelTraceProvider, TraceContextProvider},
};

pub type Filter = Arc<dyn Fn(&Parts) -> bool + Send + Sync>;

#[derive(Clone)]
struct Settings {
    logger: Logger,
    provider: Arc<dyn TraceContextProvider>,
    header: HeaderName,
    correlation_field: Cow<'static, str>,
    echo_header: bool,
    is_recorded: Filter,
}

/// Correlate every request of your axum app with its trace and its logs.
///
/// For each request the middleware:
///
/// - reads the `X-Correlation-ID` header
/// - opens the server span of the request and reads its trace and span ids
/// - tags the trace with `correlation_id` (a warning is logged when there is no active trace)
/// - makes these identifiers the current [`RequestIdentity`] while the inner service runs
/// - logs `Request started` and `Request finished`, the latter even when the
///   response future is dropped before completion
///
/// Errors of the inner service are logged and returned unchanged.
#[derive(Clone)]
pub struct CorrelationLayer {
    settings: Settings,
}

impl CorrelationLayer {
    /// Log through `logger`, read traces with [`OtelTraceProvider`].
    pub fn new(logger: Logger) -> Self {
        CorrelationLayer {
            settings: Settings {
                logger,
                provider: Arc::new(OtelTraceProvider),
                header: CORRELATION_ID_HEADER,
                correlation_field: Cow::Borrowed(CORRELATION_ID_FIELD),
                echo_header: false,
                is_recorded: Arc::new(|_parts: &Parts| true),
            },
        }
    }

    /// Read and tag traces through `provider`.
    pub fn with_provider<P>(self, provider: Arc<P>) -> Self
    where
        P: TraceContextProvider + 'static,
    {
        CorrelationLayer {
            settings: Settings {
                provider,
                ..self.settings
            },
        }
    }

    /// Read the correlation id from `header` instead of `X-Correlation-ID`.
    pub fn with_header(self, header: HeaderName) -> Self {
        CorrelationLayer {
            settings: Settings {
                header,
                ..self.settings
            },
        }
    }

    /// Log the correlation id under `field` instead of `correlation_id`.
    ///
    /// The trace tag keeps the `correlation_id` key.
    pub fn with_correlation_field(self, field: impl Into<Cow<'static, str>>) -> Self {
        CorrelationLayer {
            settings: Settings {
                correlation_field: field.into(),
                ..self.settings
            },
        }
    }

    /// Copy the correlation id on the response headers.
    pub fn with_response_header(self, echo_header: bool) -> Self {
        CorrelationLayer {
            settings: Settings {
                echo_header,
                ..self.settings
            },
        }
    }

    /// Choose to correlate or not the incoming HTTP request based on his [`http::request::Parts`].
    ///
    /// Skipped requests get neither a span nor the start and finish records.
    pub fn with_filter(self, is_recorded: Filter) -> Self {
        CorrelationLayer {
            settings: Settings {
                is_recorded,
                ..self.settings
            },
        }
    }
}

impl fmt::Debug for CorrelationLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CorrelationLayer")
            .field("logger", &self.settings.logger)
            .field("header", &self.settings.header)
            .field("correlation_field", &self.settings.correlation_field)
            .field("echo_header", &self.settings.echo_header)
            .field("is_recorded", &"<closure>")
            .finish()
    }
}

impl<S> Layer<S> for CorrelationLayer {
    type Service = Correlation<S>;

    fn layer(&self, inner: S) -> Self::Service {
        Correlation {
            inner,
            settings: Arc::new(self.settings.clone()),
        }
    }
}

/// Service built by [`CorrelationLayer`].
#[derive(Clone)]
pub struct Correlation<S> {
    inner: S,
    settings: Arc<Settings>,
}

impl<S> fmt::Debug for Correlation<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Correlation")
            .field("logger", &self.settings.logger)
            .field("header", &self.settings.header)
            .finish_non_exhaustive()
    }
}

impl<S, B, B2> Service<Request<B>> for Correlation<S>
where
    S: Service<Request<B>, Response = Response<B2>>,
    S::Error: fmt::Display,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, request: Request<B>) -> Self::Future {
        let (parts, body) = request.into_parts();

        if !(self.settings.is_recorded)(&parts) {
            let inner = self.inner.call(Request::from_parts(parts, body));
            return ResponseFuture {
                inner: context::in_current_context(inner),
                exchange: None,
                span: Span::none(),
            };
        }

        let span = extract_request_span(&parts);
        let correlation_id = extract_correlation_id(&parts.headers, &self.settings.header);

        // The span is entered here for the trace lookup and the synchronous part
        // of the inner service, then again on every poll of ResponseFuture.
        let entered = span.enter();
        let exchange = Exchange::start(&self.settings, &parts, correlation_id);
        let identity = exchange.identity.clone();
        let request = Request::from_parts(parts, body);
        let inner = context::establish_sync(identity.clone(), || self.inner.call(request));
        drop(entered);

        ResponseFuture {
            inner: context::establish(identity, inner),
            exchange: Some(exchange),
            span,
        }
    }
}

pin_project! {
    /// [`Correlation`] response future
    ///
    /// Dropping it before completion logs the request as cancelled.
    pub struct ResponseFuture<F> {
        #[pin]
        inner: Scoped<F>,
        exchange: Option<Exchange>,
        span: Span,
    }

    impl<F> PinnedDrop for ResponseFuture<F> {
        fn drop(this: Pin<&mut Self>) {
            let this = this.project();
            if let Some(exchange) = this.exchange.take() {
                let _guard = this.span.enter();
                exchange.finish_cancelled();
            }
        }
    }
}

impl<F, B, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<Response<B>, E>>,
    E: fmt::Display,
{
    type Output = Result<Response<B>, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let _guard = this.span.enter();

        let result = ready!(this.inner.poll(cx));

        let Some(exchange) = this.exchange.take() else {
            return Poll::Ready(result);
        };

        match result {
            Ok(mut response) => {
                let status = response.status();
                this.span.record("http.response.status_code", status.as_u16());
                if status.is_server_error() {
                    this.span.record("otel.status_code", "ERROR");
                }
                exchange.finish_response(&mut response);
                Poll::Ready(Ok(response))
            }
            Err(error) => {
                this.span.record("otel.status_code", "ERROR");
                exchange.finish_error(&error);
                Poll::Ready(Err(error))
            }
        }
    }
}

/// Classification of a finished request in the `outcome` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    ClientError,
    ServerError,
    /// The inner service returned an error instead of a response.
    Error,
    /// The response future was dropped before completion.
    Cancelled,
}

impl Outcome {
    pub fn from_status(status: StatusCode) -> Self {
        if status.is_server_error() {
            Outcome::ServerError
        } else if status.is_client_error() {
            Outcome::ClientError
        } else {
            Outcome::Success
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Success => "success",
            Outcome::ClientError => "client_error",
            Outcome::ServerError => "server_error",
            Outcome::Error => "error",
            Outcome::Cancelled => "cancelled",
        }
    }
}

/// Failure description a handler attaches to the response extensions.
///
/// Axum handlers turn their errors into responses, insert this into the
/// extensions of the response so that the `Request finished` record can
/// carry the error type and message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HandlerFailure {
    pub kind: String,
    pub message: String,
}

impl HandlerFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerFailure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    pub fn from_error<E>(error: &E) -> Self
    where
        E: Error + ?Sized,
    {
        HandlerFailure {
            kind: short_type_name::<E>(),
            message: render(&error),
        }
    }
}

/// What the middleware remembers of a request between its start and its end.
struct Exchange {
    logger: Logger,
    identity: Arc<RequestIdentity>,
    method: Method,
    path: String,
    started_at: Instant,
    echo: Option<(HeaderName, HeaderValue)>,
}

impl Exchange {
    fn start(settings: &Settings, parts: &Parts, correlation_id: Option<String>) -> Self {
        let mut identity =
            RequestIdentity::new().with_correlation_field(settings.correlation_field.clone());
        if let Some(trace) = settings.provider.current_trace() {
            identity = identity.with_trace(trace);
        }
        if let Some(correlation_id) = &correlation_id {
            identity = identity.with_correlation_id(correlation_id.as_str());
        }
        let identity = Arc::new(identity);

        if let Some(correlation_id) = &correlation_id {
            match settings
                .provider
                .tag_current_trace(CORRELATION_ID_TAG, correlation_id)
            {
                Ok(()) => settings.logger.log_in(
                    &identity,
                    Level::DEBUG,
                    format!("Attached {} '{correlation_id}' to the current trace.", settings.header),
                    fields! {},
                ),
                Err(error) => settings.logger.log_in(
                    &identity,
                    Level::WARN,
                    format!(
                        "Received {} '{correlation_id}' but no active trace to attach it to.",
                        settings.header
                    ),
                    fields! { "reason" => render(&error) },
                ),
            }
        }

        let method = parts.method.clone();
        let path = parts.uri.path().to_owned();
        settings.logger.log_in(
            &identity,
            Level::INFO,
            "Request started",
            fields! { "method" => method.as_str(), "path" => path },
        );

        // The received bytes are echoed, not their decoded form.
        let echo = correlation_id
            .filter(|_| settings.echo_header)
            .and_then(|_| parts.headers.get(&settings.header).cloned())
            .map(|value| (settings.header.clone(), value));

        Exchange {
            logger: settings.logger.clone(),
            identity,
            method,
            path,
            started_at: Instant::now(),
            echo,
        }
    }

    fn finish_response<B>(self, response: &mut Response<B>) {
        let status = response.status();
        let mut fields = self.fields(Outcome::from_status(status));
        fields.insert("status_code".into(), status.as_u16().into());
        if let Some(failure) = response.extensions().get::<HandlerFailure>() {
            fields.insert("error".into(), crate::logging::to_field_value(failure));
        }
        if let Some((header, value)) = &self.echo {
            response.headers_mut().insert(header.clone(), value.clone());
        }

        let level = if status.is_server_error() {
            Level::ERROR
        } else {
            Level::INFO
        };
        self.logger
            .log_in(&self.identity, level, "Request finished", fields);
    }

    fn finish_error<E: fmt::Display>(self, error: &E) {
        let mut fields = self.fields(Outcome::Error);
        fields.insert(
            "error".into(),
            crate::logging::to_field_value(&HandlerFailure::new(
                short_type_name::<E>(),
                render(error),
            )),
        );
        self.logger
            .log_in(&self.identity, Level::ERROR, "Request finished", fields);
    }

    fn finish_cancelled(self) {
        let fields = self.fields(Outcome::Cancelled);
        self.logger
            .log_in(&self.identity, Level::WARN, "Request finished", fields);
    }

    fn fields(&self, outcome: Outcome) -> Fields {
        fields! {
            "method" => self.method.as_str(),
            "path" => self.path,
            "outcome" => outcome.as_str(),
            "duration_ms" => self.started_at.elapsed().as_secs_f64() * 1000.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        logging::testing::{capturing_logger, CapturedLines},
        trace::tests::{init_test_tracer, FakeTraceProvider},
    };
    use serde_json::Value;
    use std::{convert::Infallible, io, time::Duration};
    use tower::{service_fn, util::BoxCloneService, ServiceExt};

    const TRACE_ID: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const SPAN_ID: &str = "00f067aa0ba902b7";

    #[derive(Debug)]
    struct IntentionalError;

    impl fmt::Display for IntentionalError {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "An intentional server error occurred.")
        }
    }

    impl Error for IntentionalError {}

    fn request(path: &str, correlation_id: Option<&str>) -> Request<String> {
        let mut builder = Request::get(path);
        if let Some(correlation_id) = correlation_id {
            builder = builder.header("X-Correlation-ID", correlation_id);
        }
        builder.body(String::new()).unwrap()
    }

    async fn handle(logger: Logger, request: Request<String>) -> Result<Response<String>, Infallible> {
        let path = request.uri().path().to_owned();
        logger.info("Handling request", fields! { "handled_path" => path });
        tokio::task::yield_now().await;

        if path == "/error" {
            logger.error_with(
                &IntentionalError,
                "Simulating an intentional error in the /error endpoint.",
                fields! {},
            );
            let mut response = Response::new("boom".to_owned());
            *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            response
                .extensions_mut()
                .insert(HandlerFailure::from_error(&IntentionalError));
            return Ok(response);
        }

        logger.info("Request handled", fields! { "handled_path" => path });
        Ok(Response::new("ok".to_owned()))
    }

    type App = BoxCloneService<Request<String>, Response<String>, Infallible>;

    fn app(layer: CorrelationLayer, logger: Logger) -> App {
        let handler = service_fn(move |request| handle(logger.clone(), request));
        BoxCloneService::new(layer.layer(handler))
    }

    fn with_message<'a>(lines: &'a [Value], message: &str) -> Vec<&'a Value> {
        lines
            .iter()
            .filter(|line| line["message"] == message)
            .collect()
    }

    fn setup(
        provider: FakeTraceProvider,
    ) -> (Logger, CapturedLines, Arc<FakeTraceProvider>, CorrelationLayer) {
        let (logger, sink) = capturing_logger();
        let provider = Arc::new(provider);
        let layer = CorrelationLayer::new(logger.clone()).with_provider(provider.clone());
        (logger, sink, provider, layer)
    }

    #[tokio::test]
    async fn test_request_without_correlation_header() {
        let (logger, sink, provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));

        let response = app(layer, logger).oneshot(request("/", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let lines = sink.lines();
        assert_eq!(with_message(&lines, "Request started").len(), 1);
        assert_eq!(with_message(&lines, "Request finished").len(), 1);
        assert_eq!(lines.len(), 4);
        for line in &lines {
            assert!(line.get("correlation_id").is_none());
            assert_eq!(line["trace_id"], TRACE_ID);
            assert_eq!(line["span_id"], SPAN_ID);
        }
        let finished = with_message(&lines, "Request finished")[0];
        assert_eq!(finished["status_code"], 200);
        assert_eq!(finished["outcome"], "success");
        assert_eq!(finished["method"], "GET");
        assert_eq!(finished["path"], "/");
        assert!(finished["duration_ms"].is_number());
        assert!(provider.tags().is_empty());
        assert!(context::current().is_empty());
    }

    #[tokio::test]
    async fn test_correlation_id_reaches_logs_and_trace() {
        let (logger, sink, provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));

        let response = app(layer, logger)
            .oneshot(request("/items/101", Some("my-custom-req-12345")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let lines = sink.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines
            .iter()
            .all(|line| line["correlation_id"] == "my-custom-req-12345"));
        assert_eq!(
            provider.tags(),
            [("correlation_id".to_owned(), "my-custom-req-12345".to_owned())]
        );
        assert_eq!(lines[0]["message"], "Request started");
        assert_eq!(lines[3]["message"], "Request finished");
    }

    #[tokio::test]
    async fn test_failing_route_is_reported() {
        let (logger, sink, _provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));

        let response = app(layer, logger).oneshot(request("/error", None)).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let lines = sink.lines();
        let handler_error = with_message(&lines, "Simulating an intentional error in the /error endpoint.")[0];
        assert_eq!(handler_error["level"], "ERROR");
        assert_eq!(handler_error["error"]["kind"], "IntentionalError");
        assert_eq!(handler_error["trace_id"], TRACE_ID);

        let finished = with_message(&lines, "Request finished")[0];
        assert_eq!(finished["level"], "ERROR");
        assert_eq!(finished["status_code"], 500);
        assert_eq!(finished["outcome"], "server_error");
        assert_eq!(finished["error"]["kind"], "IntentionalError");
        assert_eq!(finished["error"]["message"], "An intentional server error occurred.");
    }

    #[tokio::test]
    async fn test_missing_trace_degrades_to_warning() {
        let (logger, sink, provider, layer) = setup(FakeTraceProvider::default());

        let response = app(layer, logger)
            .oneshot(request("/items/7", Some("req-7")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let lines = sink.lines();
        let warning = &lines[0];
        assert_eq!(warning["level"], "WARN");
        assert!(warning["message"].as_str().unwrap().contains("req-7"));
        assert_eq!(warning["reason"], "no active trace to tag");
        assert!(provider.tags().is_empty());
        for line in &lines {
            assert_eq!(line["correlation_id"], "req-7");
            assert!(line.get("trace_id").is_none());
        }
    }

    #[tokio::test]
    async fn test_non_ascii_correlation_id_is_carried_verbatim() {
        let (logger, sink, provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));
        let layer = layer.with_response_header(true);
        let request = Request::get("/items/3")
            .header(
                "X-Correlation-ID",
                HeaderValue::from_bytes("req-café-1".as_bytes()).unwrap(),
            )
            .body(String::new())
            .unwrap();

        let response = app(layer, logger).oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[CORRELATION_ID_HEADER].as_bytes(),
            "req-café-1".as_bytes()
        );
        let lines = sink.lines();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|line| line["correlation_id"] == "req-café-1"));
        assert_eq!(
            provider.tags(),
            [("correlation_id".to_owned(), "req-café-1".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_inner_error_is_logged_and_returned_unchanged() {
        let (logger, sink, _provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));
        let failing = layer.layer(service_fn(|_request: Request<String>| async {
            Err::<Response<String>, _>(io::Error::new(io::ErrorKind::ConnectionReset, "upstream reset"))
        }));

        let error = failing
            .oneshot(request("/items/1", Some("req-err")))
            .await
            .unwrap_err();

        assert_eq!(error.kind(), io::ErrorKind::ConnectionReset);
        let lines = sink.lines();
        let finished = with_message(&lines, "Request finished")[0];
        assert_eq!(finished["level"], "ERROR");
        assert_eq!(finished["outcome"], "error");
        assert_eq!(finished["error"]["message"], "upstream reset");
        assert_eq!(finished["correlation_id"], "req-err");
        assert!(finished.get("status_code").is_none());
        assert!(context::current().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_request_is_finished_and_released() {
        let (_logger, sink, _provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));
        let stuck = layer.layer(service_fn(|_request: Request<String>| async {
            std::future::pending::<Result<Response<String>, Infallible>>().await
        }));

        let timed_out = tokio::time::timeout(
            Duration::from_millis(10),
            stuck.oneshot(request("/slow", Some("req-slow"))),
        )
        .await;

        assert!(timed_out.is_err());
        assert!(context::current().is_empty());
        let lines = sink.lines();
        let finished = with_message(&lines, "Request finished");
        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0]["outcome"], "cancelled");
        assert_eq!(finished[0]["correlation_id"], "req-slow");
        assert!(finished[0].get("status_code").is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_requests_never_share_identity() {
        let (logger, sink, provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));
        let service = app(layer, logger);

        let handles: Vec<_> = (0..32)
            .map(|n| {
                let service = service.clone();
                tokio::spawn(async move {
                    service
                        .oneshot(request(&format!("/items/{n}"), Some(&format!("req-{n}"))))
                        .await
                })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().status(), StatusCode::OK);
        }

        let lines = sink.lines();
        assert_eq!(lines.len(), 32 * 4);
        for line in &lines {
            let path = line
                .get("path")
                .or_else(|| line.get("handled_path"))
                .and_then(Value::as_str)
                .unwrap();
            let n = path.trim_start_matches("/items/");
            assert_eq!(line["correlation_id"], format!("req-{n}"));
        }
        assert_eq!(provider.tags().len(), 32);
    }

    #[tokio::test]
    async fn test_filtered_requests_are_not_correlated() {
        let (logger, sink, _provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));
        let layer = layer.with_filter(Arc::new(|parts: &Parts| parts.uri.path() != "/health"));

        app(layer, logger)
            .oneshot(request("/health", Some("req-health")))
            .await
            .unwrap();

        let lines = sink.lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.get("correlation_id").is_none()));
    }

    #[tokio::test]
    async fn test_custom_field_and_response_header() {
        let (logger, sink, provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));
        let layer = layer
            .with_correlation_field("request_correlation_id")
            .with_response_header(true);

        let response = app(layer, logger)
            .oneshot(request("/items/101", Some("my-custom-req-12345")))
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(CORRELATION_ID_HEADER).unwrap(),
            "my-custom-req-12345"
        );
        let lines = sink.lines();
        assert!(lines
            .iter()
            .all(|line| line["request_correlation_id"] == "my-custom-req-12345"
                && line.get("correlation_id").is_none()));
        assert_eq!(provider.tags()[0].0, "correlation_id");
    }

    #[tokio::test]
    async fn test_otel_trace_tag_agrees_with_logs() {
        let (exporter, _guard) = init_test_tracer();
        let (logger, sink) = capturing_logger();
        let layer = CorrelationLayer::new(logger.clone());

        let response = app(layer, logger)
            .oneshot(request("/items/101", Some("my-custom-req-12345")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let spans = exporter.get_finished_spans().unwrap();
        assert_eq!(spans.len(), 1);
        let span = &spans[0];
        assert_eq!(span.name, "GET /items/101");
        let tag = span
            .attributes
            .iter()
            .find(|kv| kv.key.as_str() == "correlation_id")
            .expect("correlation_id tag");
        assert_eq!(tag.value.as_str(), "my-custom-req-12345");

        let trace_id = span.span_context.trace_id().to_string();
        let span_id = span.span_context.span_id().to_string();
        let lines = sink.lines();
        assert_eq!(lines.len(), 4);
        for line in &lines {
            assert_eq!(line["trace_id"], trace_id.as_str());
            assert_eq!(line["span_id"], span_id.as_str());
            assert_eq!(line["correlation_id"], "my-custom-req-12345");
        }
    }

    #[tokio::test]
    async fn test_with_axum_server() {
        use axum::{extract::Path, routing::get, Json, Router};
        use serde_json::json;
        use std::net::SocketAddr;
        use tokio::net::TcpListener;

        let (logger, sink, _provider, layer) = setup(FakeTraceProvider::active(TRACE_ID, SPAN_ID));
        let item_logger = logger.clone();
        let routes = Router::new()
            .route(
                "/items/{item_id}",
                get(move |Path(item_id): Path<u64>| async move {
                    item_logger.info("Received request for item", fields! { "item_id_param" => item_id });
                    Json(json!({ "id": item_id, "status": "processed" }))
                }),
            )
            .layer(layer.with_response_header(true));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let _server_handle = tokio::spawn(async move { axum::serve(listener, routes).await.unwrap() });

        let response = reqwest::Client::new()
            .get(format!("http://{addr}/items/101"))
            .header("X-Correlation-ID", "my-custom-req-12345")
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("x-correlation-id").unwrap(),
            "my-custom-req-12345"
        );

        let lines = sink.lines();
        let received = with_message(&lines, "Received request for item")[0];
        assert_eq!(received["item_id_param"], 101);
        assert_eq!(received["correlation_id"], "my-custom-req-12345");
        assert_eq!(received["trace_id"], TRACE_ID);
        let finished = with_message(&lines, "Request finished")[0];
        assert_eq!(finished["path"], "/items/101");
        assert_eq!(finished["status_code"], 200);
    }
}
