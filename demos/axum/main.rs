use std::{error::Error, net::SocketAddr};

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use core::fmt;
use item_service::{item_data, ItemError, ItemService};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry_sdk::{propagation::TraceContextPropagator, trace::SdkTracerProvider};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tower_correlation::{
    fields,
    http::{CorrelationLayer, HandlerFailure, CORRELATION_ID_HEADER},
    Config, Logger, LoggerLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod item_service;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::from_env()?;
    let logger = Logger::from_config(&config)?;

    opentelemetry::global::set_text_map_propagator(TraceContextPropagator::new());
    let tracer_provider = SdkTracerProvider::builder().build();
    let tracer = tracer_provider.tracer(config.service_name.clone());

    tracing_subscriber::registry()
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(LoggerLayer::new(logger.clone()))
        .try_init()?;

    let state = AppState {
        logger: logger.clone(),
        items: ItemService::new(logger.clone()),
    };

    let app = Router::new()
        .route("/", get(read_root))
        .route("/items/{item_id}", get(read_item))
        .route("/error", get(simulate_error))
        .layer(CorrelationLayer::new(logger.clone()).with_response_header(true))
        .with_state(state);

    let addr: SocketAddr = ([127, 0, 0, 1], 3000).into();
    let listener = TcpListener::bind(addr).await?;
    logger.info(
        "Axum listening",
        fields! { "address" => listener.local_addr()?.to_string() },
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    tracer_provider.shutdown()?;
    Ok(())
}

#[derive(Clone)]
struct AppState {
    logger: Logger,
    items: ItemService,
}

async fn read_root(State(state): State<AppState>) -> Json<Value> {
    state.logger.info("Handling root endpoint request.", fields! {});
    Json(json!({ "message": "Hello from axum, correlated with its trace!" }))
}

async fn read_item(
    Path(item_id): Path<u64>,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Value>, ApiError> {
    let mut log_fields = fields! { "item_id_param" => item_id };
    if let Some(correlation_id) = headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|value| value.to_str().ok())
    {
        log_fields.insert("request_correlation_id".into(), correlation_id.into());
    }
    state
        .logger
        .info(format!("Received request for item ID: {item_id}"), log_fields);

    let processed = state
        .items
        .process_item_data(item_id, item_data(item_id))
        .map_err(|error| {
            state.logger.error_with(
                &error,
                format!("Failed to process item {item_id} in API route: {error}"),
                fields! { "item_id_param" => item_id },
            );
            ApiError::Item(error)
        })?;

    state.logger.info(
        format!("Successfully processed item {item_id}"),
        fields! { "processed_result" => processed },
    );
    Ok(Json(json!(processed)))
}

async fn simulate_error(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.logger.error(
        "Simulating an intentional error in the /error endpoint.",
        fields! {},
    );
    Err(ApiError::Intentional)
}

#[derive(Debug)]
enum ApiError {
    Intentional,
    Item(ItemError),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Intentional => write!(f, "An intentional server error occurred."),
            ApiError::Item(error) => write!(f, "{error}"),
        }
    }
}

impl Error for ApiError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            ApiError::Intentional => None,
            ApiError::Item(error) => Some(error),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let failure = HandlerFailure::from_error(&self);
        let mut response = (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "detail": self.to_string() })),
        )
            .into_response();
        response.extensions_mut().insert(failure);
        response
    }
}
