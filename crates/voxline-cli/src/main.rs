use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};

use voxline_convo::{SileroDetector, SpeechDetector};
use voxline_core::Config;
use voxline_gateway::{start_gateway, DetectorFactory, GatewayState};
use voxline_voice::{ElevenLabsTts, GroqStt, OpenAiChat, VoicePipeline};

#[derive(Parser)]
#[command(
    name = "voxline",
    about = "Real-time full-duplex voice conversations with an AI agent over a media stream",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (default: voxline.json)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the conversation gateway
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("voxline.json"));
    let config = Config::load(&config_path)?;

    match cli.command {
        Commands::Serve { port } => {
            let port = port.unwrap_or_else(|| config.gateway_port());
            let audio = config.audio.clone();

            let voice_agent = Arc::new(VoicePipeline::new(
                Arc::new(GroqStt::new(
                    config.stt.clone().unwrap_or_default(),
                    audio.clone(),
                )),
                Arc::new(OpenAiChat::new(config.llm.clone().unwrap_or_default())),
                Arc::new(ElevenLabsTts::new(config.tts.clone().unwrap_or_default())),
            ));

            let sample_rate = audio.sample_rate;
            let window = audio.vad_window_samples as usize;
            let detector_factory: Box<DetectorFactory> = Box::new(move || {
                let detector = SileroDetector::new(sample_rate, window)?;
                Ok(Box::new(detector) as Box<dyn SpeechDetector>)
            });

            let state = Arc::new(GatewayState::new(config, voice_agent, detector_factory));
            tracing::info!("Starting voxline gateway on port {port}");
            start_gateway(state, port).await?;
        }

        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}
