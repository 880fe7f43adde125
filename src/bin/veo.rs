use std::{io::Write, path::PathBuf, sync::Arc};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use veo_studio::{
    chat::ChatSession,
    client::HttpBackend,
    credentials::{is_plausible_key, CredentialStore, MemoryCredentialStore},
    media::load_image,
    models::{AspectRatio, GenerationRequest, Resolution, Role, VeoModel},
    orchestrator::{GenerationOrchestrator, GenerationStatus},
};

#[derive(Parser, Debug)]
#[command(name = "veo", version, about = "Generate Veo 3 videos and chat with the assistant from the terminal")]
struct Cli {
    /// Base URL of a running veo-server.
    #[arg(long, env = "VEO_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a generation and wait for the video.
    Generate {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        negative_prompt: Option<String>,
        #[arg(long, default_value = "16:9", value_parser = ["16:9", "9:16"])]
        aspect_ratio: String,
        #[arg(long, default_value = "720p", value_parser = ["720p", "1080p"])]
        resolution: String,
        /// Use the faster, cheaper model.
        #[arg(long)]
        fast: bool,
        /// First frame (JPEG, PNG or WebP, at most 10 MB).
        #[arg(long)]
        image: Option<PathBuf>,
        /// Where to save the finished video.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
    /// Ask the assistant a question and stream the answer.
    Chat {
        message: Vec<String>,
        /// Locally held key that unlocks the assistant. Required; never sent anywhere.
        #[arg(long, env = "VEO_ASSISTANT_KEY")]
        assistant_key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

    let cli = Cli::parse();
    let backend = Arc::new(HttpBackend::new(&cli.server));

    match cli.command {
        Command::Generate { prompt, negative_prompt, aspect_ratio, resolution, fast, image, output } => {
            let mut request = GenerationRequest::new(prompt);
            request.negative_prompt = negative_prompt;
            request.aspect_ratio = if aspect_ratio == "9:16" { AspectRatio::Portrait } else { AspectRatio::Landscape };
            request.resolution = if resolution == "1080p" { Resolution::FullHd } else { Resolution::Hd };
            request.model = if fast { VeoModel::Veo3Fast } else { VeoModel::Veo3 };
            if let Some(path) = image {
                request.image = Some(load_image(&path).await?);
            }
            generate(backend, request, output).await
        }
        Command::Chat { message, assistant_key } => chat(backend, message.join(" "), assistant_key).await,
    }
}

async fn generate(backend: Arc<HttpBackend>, request: GenerationRequest, output: Option<PathBuf>) -> anyhow::Result<()> {
    let orchestrator = GenerationOrchestrator::new(backend);
    let mut updates = orchestrator.subscribe();
    orchestrator.submit(request).await;

    loop {
        let state = updates.borrow_and_update().clone();
        match state.status {
            GenerationStatus::Completed => {
                eprintln!();
                let uri = state.video_uri.unwrap_or_default();
                println!("{}", uri);
                if let Some(path) = output {
                    let size = orchestrator.download_video(&path).await?;
                    eprintln!("Saved {} ({} bytes)", path.display(), size);
                }
                return Ok(());
            }
            GenerationStatus::Error => {
                eprintln!();
                bail!(state.error.unwrap_or_else(|| "Video generation failed".into()));
            }
            GenerationStatus::Polling => {
                let remaining = state
                    .estimated_time_remaining_ms
                    .map(|ms| format!("~{}s left", ms / 1000))
                    .unwrap_or_else(|| "finishing up".into());
                eprint!("\rGenerating... {:>3}% ({})   ", state.progress, remaining);
            }
            GenerationStatus::Idle | GenerationStatus::Generating => {}
        }
        tokio::select! {
            changed = updates.changed() => changed.context("orchestrator stopped")?,
            _ = tokio::signal::ctrl_c() => {
                orchestrator.reset();
                eprintln!("\nCancelled");
                return Ok(());
            }
        }
    }
}

/// The assistant stays locked until a plausible key is supplied.
fn assistant_store(assistant_key: Option<String>) -> anyhow::Result<Arc<MemoryCredentialStore>> {
    let store = Arc::new(MemoryCredentialStore::default());
    if let Some(key) = assistant_key {
        if !is_plausible_key(&key) {
            bail!("That assistant key looks too short");
        }
        store.set_credential(&key);
    }
    Ok(store)
}

async fn chat(backend: Arc<HttpBackend>, message: String, assistant_key: Option<String>) -> anyhow::Result<()> {
    let session = ChatSession::new(backend).gated_by(assistant_store(assistant_key)?);

    let mut updates = session.subscribe();
    let printer = tokio::spawn(async move {
        let mut printed = 0;
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            if let Some(reply) = state.messages.iter().rev().find(|m| m.role == Role::Assistant) {
                if reply.content.len() > printed {
                    print!("{}", &reply.content[printed..]);
                    std::io::stdout().flush().ok();
                    printed = reply.content.len();
                }
            }
        }
    });

    let result = session.send(&message).await;
    drop(session);
    printer.await.ok();
    println!();
    result.map_err(Into::into)
}
