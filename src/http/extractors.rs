use axum::extract::MatchedPath;
use http::{header::USER_AGENT, request::Parts, HeaderMap, HeaderName};
use opentelemetry_http::HeaderExtractor;
use tracing::{field::Empty, Span};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// Create the server span of the request following the
/// [OTEL specification](https://opentelemetry.io/docs/specs/semconv/http/http-spans/#http-server)
///
/// The span is parented on the W3C trace context of the request headers when
/// there is one, otherwise it starts a new trace.
pub(crate) fn extract_request_span(parts: &Parts) -> Span {
    let method = parts.method.as_str();
    let path = parts.uri.path();

    // Routing happens after the middleware when it is applied with `Router::layer`
    let route = parts
        .extensions
        .get::<MatchedPath>()
        .map_or(path, MatchedPath::as_str);

    let user_agent = parts
        .headers
        .get(USER_AGENT)
        .and_then(|value| value.to_str().ok());

    let span = tracing::info_span!("HTTP request",
        http.request.method = method,
        http.route = route,
        url.path = path,
        url.scheme = parts.uri.scheme_str().unwrap_or("http"),
        url.query = parts.uri.query(),
        user_agent.original = user_agent,
        http.response.status_code = Empty,
        otel.name = format!("{method} {route}"),
        otel.kind = ?opentelemetry::trace::SpanKind::Server,
        otel.status_code = Empty,
    );

    let parent = opentelemetry::global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(&parts.headers))
    });
    span.set_parent(parent);

    span
}

/// The correlation id carried verbatim by `header`, if present and non empty.
///
/// Values are decoded as UTF-8, invalid sequences are replaced rather than
/// dropping the whole id.
pub(crate) fn extract_correlation_id(headers: &HeaderMap, header: &HeaderName) -> Option<String> {
    headers
        .get(header)
        .filter(|value| !value.is_empty())
        .map(|value| String::from_utf8_lossy(value.as_bytes()).into_owned())
}
