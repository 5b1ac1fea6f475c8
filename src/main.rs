use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use interview_voice::{
    AudioBackendFactory, AudioSource, Config, EngineEvent, HeadlessSink, NatsTransport,
    ProviderCatalog, ProviderSelection, ProvidersClient, SessionConfig, Speaker, Transport,
    TransportKind, TurnController, WebSocketTransport,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "interview-voice")]
#[command(author, version, about = "Voice engine for AI-led interviews", long_about = None)]
struct Cli {
    /// Configuration file (defaults to config/interview-voice.toml if present)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Conduct one interview, speaking from a WAV file
    Run(RunArgs),
    /// Print the providers the server offers
    Providers,
}

#[derive(Args)]
struct RunArgs {
    /// Interview to join
    #[arg(long)]
    interview_id: Option<String>,

    /// Application the interview belongs to
    #[arg(long)]
    application_id: Option<String>,

    /// WAV file replayed as the candidate's microphone
    #[arg(short, long)]
    input: String,

    /// End the interview after this many seconds
    #[arg(short, long)]
    duration: Option<u64>,

    #[arg(long)]
    tts_provider: Option<String>,
    #[arg(long)]
    tts_model: Option<String>,
    #[arg(long)]
    stt_provider: Option<String>,
    #[arg(long)]
    stt_model: Option<String>,
    #[arg(long)]
    llm_provider: Option<String>,
    #[arg(long)]
    llm_model: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config_path = cli
        .config
        .as_deref()
        .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()));
    let config = Config::load(config_path.as_deref())?;

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::Providers => providers(config).await,
    }
}

async fn providers(config: Config) -> Result<()> {
    let client = ProvidersClient::new(&config.server.api_url)?;
    let catalog = client.fetch().await?;

    for (kind, entries, default) in [
        ("tts", &catalog.tts, &catalog.defaults.tts_provider),
        ("stt", &catalog.stt, &catalog.defaults.stt_provider),
        ("llm", &catalog.llm, &catalog.defaults.llm_provider),
    ] {
        println!("{}:", kind);
        for (id, info) in entries {
            let marker = if default.as_deref() == Some(id.as_str()) { "*" } else { " " };
            let mode = if kind == "stt" {
                format!(" [{}]", catalog.mode_for_stt(Some(id)))
            } else {
                String::new()
            };
            println!("  {} {} ({}){}", marker, id, info.name, mode);
            for model in &info.models {
                let default_model = info.default_model.as_deref() == Some(model.id.as_str());
                println!(
                    "      {} {}{}",
                    model.id,
                    model.name,
                    if default_model { " (default)" } else { "" }
                );
            }
        }
    }

    Ok(())
}

async fn run(config: Config, args: RunArgs) -> Result<()> {
    let requested = ProviderSelection {
        tts_provider: args.tts_provider,
        tts_model: args.tts_model,
        stt_provider: args.stt_provider,
        stt_model: args.stt_model,
        llm_provider: args.llm_provider,
        llm_model: args.llm_model,
    };

    let catalog = match ProvidersClient::new(&config.server.api_url)?.fetch().await {
        Ok(catalog) => catalog,
        Err(e) => {
            warn!("Provider catalog unavailable, using explicit selections only: {:#}", e);
            ProviderCatalog::default()
        }
    };
    let providers = catalog.resolve(&requested);
    let mode = catalog.mode_for_stt(providers.stt_provider.as_deref());
    info!("Transcription mode: {}", mode);

    let session = SessionConfig {
        interview_id: args.interview_id.clone(),
        application_id: args.application_id,
        providers,
        mode,
    };

    let transport: Box<dyn Transport> = match config.server.transport {
        TransportKind::WebSocket => Box::new(WebSocketTransport::new(&config.server.url)),
        TransportKind::Nats => {
            let channel = args
                .interview_id
                .context("--interview-id is required with the NATS transport")?;
            Box::new(NatsTransport::new(&config.server.nats_url, channel))
        }
    };

    let input = PathBuf::from(shellexpand::tilde(&args.input).as_ref());
    let backend =
        AudioBackendFactory::create(AudioSource::File(input), config.audio.backend_config())?;

    let (controller, handle, mut events) = TurnController::new(
        &config,
        session,
        transport,
        backend,
        Box::new(HeadlessSink::new()),
    );

    let printer = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Transcript { speaker, text } => {
                    let who = match speaker {
                        Speaker::Interviewer => "Interviewer",
                        Speaker::Candidate => "Candidate",
                    };
                    println!("{}: {}", who, text);
                }
                EngineEvent::Status(status) => println!("[{}]", status),
                EngineEvent::Error(message) => eprintln!("[error] {}", message),
                _ => {}
            }
        }
    });

    if let Some(seconds) = args.duration {
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
            info!("Duration elapsed, ending interview");
            handle.end_interview();
        });
    }

    {
        let handle = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Interrupted, ending interview");
                handle.end_interview();
            }
        });
    }

    let result = controller.run().await;
    let _ = printer.await;

    let report = result?;
    println!();
    println!(
        "Interview {}: {} turns, {} utterances sent, {} discarded, {:.0}s",
        report.session.label(),
        report.stats.turns,
        report.stats.utterances_sent,
        report.stats.utterances_discarded,
        report.stats.duration_secs
    );

    match &report.assessment {
        Some(assessment) => println!("\nAssessment:\n{}", assessment),
        None => println!("\nNo assessment received"),
    }

    Ok(())
}
