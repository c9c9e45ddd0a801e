use anyhow::{Context, Result};
use clap::Parser;
use speech_relay::engine::nats::NatsClient;
use speech_relay::engine::{
    Engines, GeminiTextModel, NatsRecognizerFactory, PromptTranslator, RestSynthesizer,
};
use speech_relay::{create_router, AppState, Config, Relay, RelayOptions};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "speech-relay", about = "Real-time speech translation relay")]
struct Args {
    /// Config file path (extension optional)
    #[arg(long, default_value = "config/speech-relay")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();
    let cfg = Config::load(&args.config)?;

    info!("Speech Relay v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    let nats = NatsClient::connect(&cfg.recognition.nats_url).await?;
    let text_model = Arc::new(GeminiTextModel::new(&cfg.translation));

    let engines = Engines {
        recognizers: Arc::new(NatsRecognizerFactory::new(nats, &cfg.recognition)),
        translator: Arc::new(PromptTranslator::new(
            text_model.clone(),
            cfg.languages.names.clone(),
        )),
        synthesizer: Arc::new(RestSynthesizer::new(
            &cfg.synthesis,
            cfg.languages.voices.clone(),
        )),
        text_model,
    };

    let relay = Relay::new(engines, RelayOptions::from_config(&cfg));
    let app = create_router(AppState::new(relay));

    let addr = cfg.http_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("HTTP server listening on {}", addr);
    axum::serve(listener, app).await.context("HTTP server failed")?;

    Ok(())
}
