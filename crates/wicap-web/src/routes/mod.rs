//! HTTP route handlers for the instrument.
//!
//! Every request first has its query string applied to the parameter table,
//! so `GET /status.txt?cmd=1` both starts a capture and reports it.

pub mod data;

use axum::{
    extract::{Query, Request, State},
    http::{header, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

use wicap_protocol::{
    encode_status, parse_query, version_banner, StatusReport, DATA_BIN_PATH, DATA_TXT_PATH,
    ROOT_PATH, STATUS_PATH,
};

use crate::AppState;

/// Headers that keep clients and proxies from caching live data.
pub(crate) const NO_CACHE: [(header::HeaderName, &str); 3] = [
    (header::CACHE_CONTROL, "no-cache, no-store, must-revalidate"),
    (header::PRAGMA, "no-cache"),
    (header::EXPIRES, "0"),
];

/// Create the main Axum router with all routes.
///
/// Routes:
/// - `/` - version banner
/// - `/status.txt` - capture status as JSON
/// - `/data.bin` - raw sample words
/// - `/data.txt` - base64 sample words
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route(ROOT_PATH, get(root_handler))
        .route(STATUS_PATH, get(status_handler))
        .route(DATA_BIN_PATH, get(data::data_bin_handler))
        .route(DATA_TXT_PATH, get(data::data_txt_handler))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), apply_query))
        .layer(SetResponseHeaderLayer::overriding(
            header::ACCESS_CONTROL_ALLOW_ORIGIN,
            HeaderValue::from_static("*"),
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Apply `name=value` query pairs and run any command they carry. A query
/// that does not decode is ignored.
async fn apply_query(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if request.uri().query().is_some() {
        match Query::<Vec<(String, String)>>::try_from_uri(request.uri()) {
            Ok(Query(pairs)) => {
                let mut instrument = state.lock().await;
                if let Some(cmd) = parse_query(&pairs, instrument.params_mut()) {
                    let outcome = instrument.apply_command(cmd);
                    tracing::debug!("{} -> {:?}", request.uri(), outcome);
                }
            }
            Err(e) => tracing::debug!("Ignoring query of {}: {}", request.uri(), e),
        }
    }
    next.run(request).await
}

async fn root_handler() -> String {
    version_banner()
}

async fn status_handler(State(state): State<AppState>) -> Response {
    let report = StatusReport::from_params(state.lock().await.params());
    match encode_status(&report) {
        Ok(body) => (NO_CACHE, body).into_response(),
        Err(e) => {
            tracing::warn!("{}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

pub(crate) async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found\n")
}
