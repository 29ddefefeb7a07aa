use std::path::PathBuf;

use anyhow::Context;
use axum::Router;
use clap::{Args, Parser, Subcommand};
use opentelemetry_otlp::WithExportConfig;
use timeline_api::{app_from_config, build_decoder};
use timeline_backend::Vocabulary;
use timeline_common::config::TimelineConfig;
use timeline_core::DecodeParams;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "timeline", version, about = "Next-event timeline prediction service")]
struct Cli {
    /// YAML config file (takes precedence over TIMELINE_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Tokenizer JSON exported from the training pipeline
    #[arg(long, global = true)]
    vocab: Option<PathBuf>,
    /// LSTM weight export; without one the frequency-prior mock is used
    #[arg(long, global = true)]
    model: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Serve(ServeArgs),
    Predict(PredictArgs),
    Vocab(VocabArgs),
    Version,
}

#[derive(Args, Debug)]
struct ServeArgs {
    #[arg(short, long)]
    bind: Option<String>,
}

#[derive(Args, Debug)]
struct PredictArgs {
    #[arg(short, long)]
    seed: String,
    #[arg(short, long)]
    temperature: Option<f64>,
    #[arg(short = 'n', long)]
    num_events: Option<usize>,
}

#[derive(Args, Debug)]
struct VocabArgs {
    /// Words or numeric ids to look up
    lookup: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if let Commands::Version = cli.command {
        println!("{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }
    let cfg = load_config(&cli)?;
    match cli.command {
        Commands::Serve(args) => serve(cfg, args).await,
        Commands::Predict(args) => predict(&cfg, args),
        Commands::Vocab(args) => vocab(&cfg, args),
        Commands::Version => Ok(()),
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<TimelineConfig> {
    let mut cfg = match &cli.config {
        Some(path) => TimelineConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => TimelineConfig::load()?,
    };
    if let Some(path) = &cli.vocab { cfg.vocab_path = path.clone(); }
    if let Some(path) = &cli.model { cfg.model_path = Some(path.clone()); }
    Ok(cfg)
}

async fn serve(mut cfg: TimelineConfig, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(bind) = args.bind { cfg.bind = bind; }
    let app: Router = app_from_config(&cfg).context("loading model")?;
    let listener = tokio::net::TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("binding {}", cfg.bind))?;
    tracing::info!("listening on http://{}", cfg.bind);
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

fn predict(cfg: &TimelineConfig, args: PredictArgs) -> anyhow::Result<()> {
    let decoder = build_decoder(cfg).context("loading model")?;
    let params = DecodeParams {
        temperature: args.temperature.unwrap_or(cfg.default_temperature),
        max_events: args.num_events.unwrap_or(cfg.default_max_events),
    };
    let prediction = decoder.decode(&args.seed, params)?;
    tracing::info!(stop_reason = %prediction.stop_reason, "generated {} events", prediction.events.len());
    println!("{}", prediction.timeline);
    Ok(())
}

fn vocab(cfg: &TimelineConfig, args: VocabArgs) -> anyhow::Result<()> {
    let vocab = Vocabulary::load(&cfg.vocab_path)
        .with_context(|| format!("loading vocabulary {}", cfg.vocab_path.display()))?;
    println!("vocabulary: {}", cfg.vocab_path.display());
    println!("words: {}", vocab.len());
    println!("max id: {}", vocab.max_id());
    println!("oov token: {}", vocab.oov_token().unwrap_or("-"));
    for item in args.lookup {
        match item.parse::<u32>() {
            Ok(id) => println!("{id} -> {}", vocab.word(id).unwrap_or("<unmapped>")),
            Err(_) => println!("{item} -> {:?}", vocab.texts_to_ids(&item)),
        }
    }
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer())
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_predict_with_global_paths() {
        let cli = Cli::try_parse_from([
            "timeline", "predict", "--seed", "admission triage", "-n", "3", "--vocab", "tok.json",
        ])
        .unwrap();
        assert_eq!(cli.vocab, Some(PathBuf::from("tok.json")));
        match cli.command {
            Commands::Predict(args) => {
                assert_eq!(args.seed, "admission triage");
                assert_eq!(args.num_events, Some(3));
                assert_eq!(args.temperature, None);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn flags_override_config_paths() {
        let cli = Cli::try_parse_from(["timeline", "--model", "m.json", "--vocab", "v.json", "serve"]).unwrap();
        let cfg = load_config(&cli).unwrap();
        assert_eq!(cfg.vocab_path, PathBuf::from("v.json"));
        assert_eq!(cfg.model_path, Some(PathBuf::from("m.json")));
    }
}
