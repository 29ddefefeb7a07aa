//! HTTP API: JSON prediction, SSE streaming, health and metrics.

use std::convert::Infallible;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{rejection::{JsonRejection, QueryRejection}, Query, State},
    http::StatusCode,
    response::{sse::{Event, Sse}, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use timeline_backend::{mock::MockBackend, InferenceBackend, Vocabulary};
use timeline_backend_lstm::LstmBackend;
use timeline_common::config::TimelineConfig;
use timeline_common::{Result, TimelineError};
use timeline_core::{DecodeParams, Decoder, DecoderOptions, Prediction, StopReason};
use tokio_stream::{wrappers::ReceiverStream, Stream, StreamExt as _};

/// Upper bound on `num_events` a single request may ask for.
pub const MAX_EVENTS_LIMIT: usize = 512;

#[derive(Clone)]
pub struct AppState {
    decoder: Decoder,
    defaults: DecodeParams,
}

pub fn app(decoder: Decoder, defaults: DecodeParams) -> Router {
    timeline_obs::init();
    let state = AppState { decoder, defaults };

    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/predict", post(predict))
        .route("/sse/predict", get(predict_sse))
        .route("/openapi.json", get(openapi))
        .with_state(state)
}

/// Loads vocabulary and model once; the result is shared by every request.
pub fn build_decoder(cfg: &TimelineConfig) -> Result<Decoder> {
    let vocab = Arc::new(Vocabulary::load(&cfg.vocab_path)?);
    let backend = select_backend(cfg, &vocab)?;
    Decoder::new(backend, vocab, DecoderOptions::from(cfg))
}

pub fn app_from_config(cfg: &TimelineConfig) -> Result<Router> {
    let decoder = build_decoder(cfg)?;
    let defaults = DecodeParams { temperature: cfg.default_temperature, max_events: cfg.default_max_events };
    Ok(app(decoder, defaults))
}

fn select_backend(cfg: &TimelineConfig, vocab: &Vocabulary) -> Result<Arc<dyn InferenceBackend>> {
    if let Some(path) = &cfg.model_path {
        let lstm = LstmBackend::load(path)?;
        tracing::info!(target: "api", "using lstm backend with model {}", path.display());
        return Ok(Arc::new(lstm));
    }
    tracing::warn!(target: "api", "no model configured, falling back to the frequency-prior mock");
    Ok(Arc::new(MockBackend::frequency_prior(vocab.max_id() as usize + 1)))
}

/// JSON error body with a status chosen by who is at fault.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, message: message.into() }
    }
}

impl From<TimelineError> for ApiError {
    fn from(err: TimelineError) -> Self {
        if err.is_client_error() {
            Self::bad_request(err.to_string())
        } else {
            Self::internal(err.to_string())
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let client = self.status.is_client_error();
        timeline_obs::record_error(client);
        if client {
            tracing::info!(target: "api", status = %self.status, "rejected request: {}", self.message);
        } else {
            tracing::error!(target: "api", status = %self.status, "request failed: {}", self.message);
        }
        (self.status, Json(serde_json::json!({ "error": self.message }))).into_response()
    }
}

#[derive(Debug, serde::Deserialize)]
struct PredictRequest {
    seed_text: Option<String>,
    temperature: Option<f64>,
    num_events: Option<usize>,
}

#[derive(Debug, serde::Serialize)]
struct PredictResponse {
    predicted_timeline: String,
    events: Vec<String>,
    stop_reason: StopReason,
}

impl From<Prediction> for PredictResponse {
    fn from(p: Prediction) -> Self {
        Self { predicted_timeline: p.timeline, events: p.events, stop_reason: p.stop_reason }
    }
}

impl AppState {
    /// Applies defaults and rejects bad parameters before any inference runs.
    fn resolve(&self, req: PredictRequest) -> std::result::Result<(String, DecodeParams), ApiError> {
        let Some(seed) = req.seed_text else {
            return Err(ApiError::bad_request("Missing \"seed_text\""));
        };
        if seed.trim().is_empty() {
            return Err(ApiError::bad_request("\"seed_text\" must not be empty"));
        }
        let params = DecodeParams {
            temperature: req.temperature.unwrap_or(self.defaults.temperature),
            max_events: req.num_events.unwrap_or(self.defaults.max_events),
        };
        params.validate()?;
        if params.max_events > MAX_EVENTS_LIMIT {
            return Err(ApiError::bad_request(format!(
                "\"num_events\" must be at most {MAX_EVENTS_LIMIT}, got {}",
                params.max_events
            )));
        }
        Ok((seed, params))
    }
}

fn record(prediction: &Prediction, start: Instant) {
    timeline_obs::record_decode(prediction.events.len(), prediction.stop_reason.as_str(), start.elapsed().as_secs_f64());
}

async fn predict(
    State(state): State<AppState>,
    payload: std::result::Result<Json<PredictRequest>, JsonRejection>,
) -> std::result::Result<Json<PredictResponse>, ApiError> {
    timeline_obs::REQUESTS_TOTAL.inc();
    let Json(req) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let (seed, params) = state.resolve(req)?;
    tracing::info!(target: "api", temperature = params.temperature, max_events = params.max_events, "predict request");

    let start = Instant::now();
    let decoder = state.decoder.clone();
    let prediction = tokio::task::spawn_blocking(move || decoder.decode(&seed, params))
        .await
        .map_err(|e| ApiError::internal(format!("decode task failed: {e}")))??;
    record(&prediction, start);
    Ok(Json(prediction.into()))
}

async fn predict_sse(
    State(state): State<AppState>,
    query: std::result::Result<Query<PredictRequest>, QueryRejection>,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError> {
    timeline_obs::REQUESTS_TOTAL.inc();
    let Query(req) = query.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let (seed, params) = state.resolve(req)?;
    tracing::info!(target: "api", temperature = params.temperature, max_events = params.max_events, "streaming predict request");

    let (tx, rx) = tokio::sync::mpsc::channel(16);
    let decoder = state.decoder.clone();
    tokio::task::spawn_blocking(move || {
        let _ = stream_decode(&decoder, &seed, params, &tx);
    });
    let stream = ReceiverStream::new(rx).map(Ok::<_, Infallible>);
    Ok(Sse::new(stream))
}

/// Blocking half of the SSE endpoint. Decoding stops as soon as the
/// receiving side is dropped.
fn stream_decode(
    decoder: &Decoder,
    seed: &str,
    params: DecodeParams,
    tx: &tokio::sync::mpsc::Sender<Event>,
) -> Result<Prediction> {
    let start = Instant::now();
    let result = decoder.decode_with_callback(seed, params, |event| {
        match tx.blocking_send(Event::default().event("event").data(event)) {
            Ok(()) => ControlFlow::Continue(()),
            Err(_) => ControlFlow::Break(()),
        }
    });
    let last = match &result {
        Ok(prediction) if prediction.stop_reason == StopReason::Cancelled => {
            tracing::info!(target: "api", generated = prediction.events.len(), "stream client disconnected");
            record(prediction, start);
            return result;
        }
        Ok(prediction) => {
            record(prediction, start);
            Event::default().event("done").data(prediction.stop_reason.as_str())
        }
        Err(err) => {
            timeline_obs::record_error(err.is_client_error());
            tracing::error!(target: "api", "streaming decode failed: {err}");
            Event::default().event("error").data(err.to_string())
        }
    };
    let _ = tx.blocking_send(last);
    result
}

async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    ([("content-type", "text/plain")], format!("ready ({})", state.decoder.backend_name()))
}

async fn metrics() -> impl IntoResponse {
    let (content_type, body) = timeline_obs::gather_text();
    ([("content-type", content_type)], body)
}

async fn openapi() -> impl IntoResponse {
    let doc = serde_json::json!({
        "openapi": "3.0.0",
        "info": {"title": "Timeline Prediction API", "version": env!("CARGO_PKG_VERSION")},
        "paths": {
            "/predict": {"post": {"summary": "Predict the continuation of an event timeline"}},
            "/sse/predict": {"get": {"summary": "Stream predicted events as they are decoded"}},
            "/metrics": {"get": {"summary": "Prometheus metrics"}},
            "/healthz": {"get": {"summary": "health"}},
            "/readyz": {"get": {"summary": "readiness"}}
        }
    });
    Json(doc)
}
