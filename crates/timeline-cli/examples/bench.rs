//! Load generator for a running server.
//!
//! `N` concurrent requests against `BASE` (default `http://127.0.0.1:5001`).
//! `MODE=sse` drives `/sse/predict` and reads each stream to its `done`
//! event; the default posts to `/predict`.

use std::time::{Duration, Instant};

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    Json,
    Sse,
}

async fn one(client: &reqwest::Client, base: &str, seed: &str, mode: Mode) -> Option<(Duration, usize)> {
    let start = Instant::now();
    let events = match mode {
        Mode::Json => {
            let body = serde_json::json!({"seed_text": seed});
            let resp = client.post(format!("{base}/predict")).json(&body).send().await.ok()?;
            if !resp.status().is_success() { return None; }
            let v: serde_json::Value = resp.json().await.ok()?;
            v["events"].as_array().map_or(0, Vec::len)
        }
        Mode::Sse => {
            let resp = client
                .get(format!("{base}/sse/predict"))
                .query(&[("seed_text", seed)])
                .send()
                .await
                .ok()?;
            if !resp.status().is_success() { return None; }
            let text = resp.text().await.ok()?;
            if !text.contains("event: done") { return None; }
            text.matches("event: event").count()
        }
    };
    Some((start.elapsed(), events))
}

fn percentile(sorted: &[Duration], q: f64) -> Duration {
    if sorted.is_empty() { return Duration::ZERO; }
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx]
}

#[tokio::main]
async fn main() {
    let n: usize = std::env::var("N").ok().and_then(|v| v.parse().ok()).unwrap_or(16);
    let seed = std::env::var("SEED_TEXT").unwrap_or_else(|_| "admission triage".into());
    let base = std::env::var("BASE").unwrap_or_else(|_| "http://127.0.0.1:5001".into());
    let mode = match std::env::var("MODE").as_deref() {
        Ok("sse") => Mode::Sse,
        _ => Mode::Json,
    };

    let client = reqwest::Client::new();
    let start = Instant::now();
    let tasks: Vec<_> = (0..n)
        .map(|_| {
            let (client, base, seed) = (client.clone(), base.clone(), seed.clone());
            tokio::spawn(async move { one(&client, &base, &seed, mode).await })
        })
        .collect();

    let mut latencies = Vec::with_capacity(n);
    let mut events = 0;
    for t in tasks {
        if let Ok(Some((latency, generated))) = t.await {
            latencies.push(latency);
            events += generated;
        }
    }
    let wall = start.elapsed();
    latencies.sort();

    println!("{}/{} requests succeeded in {:.2}s", latencies.len(), n, wall.as_secs_f32());
    println!(
        "latency p50 {:?}  p95 {:?}  max {:?}",
        percentile(&latencies, 0.5),
        percentile(&latencies, 0.95),
        latencies.last().copied().unwrap_or_default()
    );
    println!("{} events generated, {:.1} events/s", events, events as f64 / wall.as_secs_f64());
}
