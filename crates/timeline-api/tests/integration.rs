use std::sync::Arc;

use axum::Router;
use timeline_api::app;
use timeline_backend::mock::MockBackend;
use timeline_backend::{InferenceBackend, Vocabulary};
use timeline_common::{Result, TimelineError};
use timeline_core::{DecodeParams, Decoder, DecoderOptions};

struct Broken;

impl InferenceBackend for Broken {
    fn name(&self) -> &str { "broken" }
    fn vocab_size(&self) -> usize { 4 }
    fn predict(&self, _sequence: &[u32]) -> Result<Vec<f32>> {
        Err(TimelineError::inference("device lost"))
    }
}

fn clinical_decoder() -> Decoder {
    let vocab = Vocabulary::from_words(Some("<oov>"), &["admission", "triage", "labwork", "imaging", "discharge"]);
    let ranking = ["labwork", "imaging", "discharge"].iter().map(|w| vocab.id(w).unwrap()).collect();
    let backend = MockBackend::ranked(vocab.max_id() as usize + 1, ranking);
    Decoder::new(Arc::new(backend), Arc::new(vocab), DecoderOptions::default()).unwrap()
}

async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let srv = tokio::spawn(async move { axum::serve(listener, app).await.unwrap(); });
    (format!("http://{}:{}", addr.ip(), addr.port()), srv)
}

#[tokio::test]
async fn predict_health_metrics_and_sse() {
    let (base, srv) = serve(app(clinical_decoder(), DecodeParams::default())).await;
    let client = reqwest::Client::new();

    let r = client.get(format!("{}/healthz", base)).send().await.unwrap();
    assert!(r.status().is_success());
    let r = client.get(format!("{}/readyz", base)).send().await.unwrap();
    assert_eq!(r.text().await.unwrap(), "ready (mock)");

    // labwork, imaging, then the terminal event ends the timeline
    let body = serde_json::json!({"seed_text": "admission triage", "temperature": 0.5});
    let r = client.post(format!("{}/predict", base)).json(&body).send().await.unwrap();
    assert!(r.status().is_success());
    let v: serde_json::Value = r.json().await.unwrap();
    assert_eq!(v["predicted_timeline"], "admission triage labwork imaging");
    assert_eq!(v["events"], serde_json::json!(["labwork", "imaging"]));
    assert_eq!(v["stop_reason"], "terminal_marker");

    let body = serde_json::json!({"seed_text": "admission", "num_events": 1});
    let v: serde_json::Value = client.post(format!("{}/predict", base)).json(&body).send().await.unwrap().json().await.unwrap();
    assert_eq!(v["predicted_timeline"], "admission labwork");
    assert_eq!(v["stop_reason"], "budget");

    let r = client.get(format!("{}/sse/predict?seed_text=admission%20triage", base)).send().await.unwrap();
    assert!(r.status().is_success());
    let text = r.text().await.unwrap();
    assert!(text.contains("event: event\ndata: labwork"));
    assert!(text.contains("event: event\ndata: imaging"));
    assert!(text.contains("event: done\ndata: terminal_marker"));

    let r = client.get(format!("{}/metrics", base)).send().await.unwrap();
    assert!(r.status().is_success());
    assert!(r.text().await.unwrap().contains("timeline_requests_total"));

    srv.abort();
}

#[tokio::test]
async fn bad_requests_get_400_with_json_error() {
    let (base, srv) = serve(app(clinical_decoder(), DecodeParams::default())).await;
    let client = reqwest::Client::new();

    let r = client.post(format!("{}/predict", base)).json(&serde_json::json!({"temperature": 1.0})).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::BAD_REQUEST);
    let v: serde_json::Value = r.json().await.unwrap();
    assert_eq!(v["error"], "Missing \"seed_text\"");

    let body = serde_json::json!({"seed_text": "admission", "temperature": 0.0});
    let r = client.post(format!("{}/predict", base)).json(&body).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::BAD_REQUEST);
    let v: serde_json::Value = r.json().await.unwrap();
    assert!(v["error"].as_str().unwrap().contains("temperature"));

    let r = client
        .post(format!("{}/predict", base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::BAD_REQUEST);

    let r = client.get(format!("{}/sse/predict?temperature=1.0", base)).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::BAD_REQUEST);
    let v: serde_json::Value = r.json().await.unwrap();
    assert_eq!(v["error"], "Missing \"seed_text\"");

    let r = client.get(format!("{}/sse/predict?seed_text=a&temperature=abc", base)).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::BAD_REQUEST);
    assert!(r.headers()["content-type"].to_str().unwrap().starts_with("application/json"));
    let v: serde_json::Value = r.json().await.unwrap();
    assert!(v["error"].as_str().unwrap().contains("query string"));

    srv.abort();
}

#[tokio::test]
async fn inference_failures_are_server_errors() {
    let vocab = Arc::new(Vocabulary::from_words(None, &["a", "b", "c"]));
    let decoder = Decoder::new(Arc::new(Broken), vocab, DecoderOptions::default()).unwrap();
    let (base, srv) = serve(app(decoder, DecodeParams::default())).await;
    let client = reqwest::Client::new();

    let body = serde_json::json!({"seed_text": "a b"});
    let r = client.post(format!("{}/predict", base)).json(&body).send().await.unwrap();
    assert_eq!(r.status(), reqwest::StatusCode::INTERNAL_SERVER_ERROR);
    let v: serde_json::Value = r.json().await.unwrap();
    assert!(v["error"].as_str().unwrap().contains("device lost"));

    let text = client.get(format!("{}/sse/predict?seed_text=a", base)).send().await.unwrap().text().await.unwrap();
    assert!(text.contains("event: error"));

    srv.abort();
}
