//! The HTTP surface: four fixed paths over the arrival engine, plus an
//! optional Prometheus listener on a second port.

use std::sync::{Arc, LazyLock};
use std::time::Duration;

use axum::extract::{OriginalUri, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use axum_extra::extract::Query;
use chrono::Utc;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec,
    TextEncoder};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use transit::engine::{Transit, TransitError};

pub mod config;

static REQUESTS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "gtfs_http_requests_total",
        "Requests to the internal webserver",
        &["path"]
    )
    .expect("metric registration")
});

static UNKNOWN_PATHS: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!(
        "gtfs_http_unknown_paths_total",
        "Requests to unknown paths in the internal webserver"
    )
    .expect("metric registration")
});

#[derive(Clone)]
pub struct WebState {
    pub transit: Arc<Transit>,
    pub interesting_stops: Arc<Vec<String>>,
}

pub async fn start_web_server(port: u16, state: WebState) -> std::io::Result<()> {
    let routes = Router::new()
        .route("/upcoming.json", get(upcoming))
        .route("/scheduled.json", get(scheduled))
        .route("/live.json", get(live))
        .route("/debugz", get(debugz))
        .fallback(not_found)
        .layer(TimeoutLayer::new(Duration::from_secs(5)))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, routes.into_make_service()).await
}

/// Serves the Prometheus registry on its own listener, so metrics stay
/// reachable while the main server is stalled.
pub async fn start_metrics_server(port: u16) -> std::io::Result<()> {
    let routes = Router::new().route("/metrics", get(metrics));
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, routes.into_make_service()).await
}

/// A handler failure, rendered as the HTML 500 page.
pub struct RouteError(String);

impl From<TransitError> for RouteError {
    fn from(error: TransitError) -> Self {
        Self(error.to_string())
    }
}

impl IntoResponse for RouteError {
    fn into_response(self) -> Response {
        log::error!("error processing request: {}", self.0);
        let body = format!("<h1>500 Internal Server Error</h1><p>Exception: {}", self.0);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Html(html_page("500 Internal Server Error", &body)),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct StopsQuery {
    /// Repeatable; overrides the configured stops for a single request.
    #[serde(default)]
    stop: Vec<String>,
}

fn stops_for(query: StopsQuery, state: &WebState) -> Vec<String> {
    if query.stop.is_empty() {
        state.interesting_stops.as_ref().clone()
    } else {
        query.stop
    }
}

async fn upcoming(
    State(state): State<WebState>,
    Query(query): Query<StopsQuery>,
) -> Result<Json<serde_json::Value>, RouteError> {
    REQUESTS.with_label_values(&["/upcoming.json"]).inc();
    let stops = stops_for(query, &state);
    let data = state.transit.upcoming(&stops).await?;
    Ok(Json(json!({
        "current_timestamp": Utc::now().timestamp(),
        "upcoming": data,
    })))
}

async fn scheduled(
    State(state): State<WebState>,
    Query(query): Query<StopsQuery>,
) -> Result<Json<serde_json::Value>, RouteError> {
    REQUESTS.with_label_values(&["/scheduled.json"]).inc();
    let stops = stops_for(query, &state);
    let data = state.transit.scheduled(&stops)?;
    Ok(Json(json!({
        "current_timestamp": Utc::now().timestamp(),
        "scheduled": data,
    })))
}

async fn live(
    State(state): State<WebState>,
    Query(query): Query<StopsQuery>,
) -> Result<Json<serde_json::Value>, RouteError> {
    REQUESTS.with_label_values(&["/live.json"]).inc();
    let stops = stops_for(query, &state);
    let data = state.transit.live(&stops).await?;
    Ok(Json(json!({
        "current_timestamp": Utc::now().timestamp(),
        "live": data,
    })))
}

/// Dumps the raw realtime feed for eyeballing.
async fn debugz(State(state): State<WebState>) -> Result<Html<String>, RouteError> {
    use prost::Message;

    REQUESTS.with_label_values(&["/debugz"]).inc();

    let started = std::time::Instant::now();
    let message = state.transit.load_from_api().await?;
    let elapsed = started.elapsed();

    let mut body = format!(
        "<h1>Debug</h1><p>Interesting stops: {:?}</p>",
        state.interesting_stops
    );
    body.push_str(&format!(
        "<pre>Received {:.6} kB in {:.6} seconds</pre>",
        message.encoded_len() as f64 / 1024.0,
        elapsed.as_secs_f64()
    ));
    body.push_str(&format!("<pre>{:#?}</pre>", message));

    Ok(Html(html_page("Debug", &body)))
}

async fn metrics() -> Result<String, RouteError> {
    TextEncoder::new()
        .encode_to_string(&prometheus::gather())
        .map_err(|why| RouteError(why.to_string()))
}

async fn not_found(OriginalUri(uri): OriginalUri) -> impl IntoResponse {
    UNKNOWN_PATHS.inc();
    let body = format!("<h1>404 Not Found</h1><p>Unknown path: {}", uri.path());
    (
        StatusCode::NOT_FOUND,
        Html(html_page("404 Not Found", &body)),
    )
}

fn html_page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n\
         <html itemscope=\"\" itemtype=\"http://schema.org/WebPage\" lang=\"en\">\n\
         <head>\n  <meta charset=\"UTF-8\">\n  <title>{title}</title>\n</head>\n\
         <body>\n{body}\n</body></html>"
    )
}
