//! voice-inbox-rs: notification-driven text-to-speech service.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use voice_inbox_rs::backends::cloud::HttpCloudSynthesizer;
use voice_inbox_rs::backends::local::EspeakSynthesizer;
use voice_inbox_rs::backends::{CloudSynthesizer, EngineDispatcher, LocalSynthesizer};
use voice_inbox_rs::catalog::{RetryPolicy, VoiceBackend, VoiceCatalog};
use voice_inbox_rs::config::Config;
use voice_inbox_rs::playback::{PlaybackController, RodioDevice};
use voice_inbox_rs::scheduler::{spoken_prefix, AutoReadScheduler};
use voice_inbox_rs::session::{SpeakOutcome, SpeechSession};
use voice_inbox_rs::store::{NotificationRecord, NotificationStore};

#[derive(Parser, Debug)]
#[command(
    name = "voice-inbox-rs",
    about = "Turn text and pending notifications into spoken audio"
)]
struct Args {
    /// Path to voice-inbox.yaml
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,

    /// Speaking rate override, words per minute (100-250)
    #[arg(long)]
    rate: Option<i64>,

    /// Volume override (0.0-1.0)
    #[arg(long)]
    volume: Option<f32>,

    /// Voice id override
    #[arg(long)]
    voice: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Speak text (or a text file) immediately
    Speak {
        text: Option<String>,
        /// Read the text to speak from this file
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Render text to an audio artifact instead of speaking it
    Generate {
        text: Option<String>,
        #[arg(short, long)]
        file: Option<PathBuf>,
        /// Artifact path (defaults to tts_output.<ext> in the temp dir)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Load an artifact and drive it with transport commands on stdin
    Play { artifact: PathBuf },
    /// Watch the notification backlog and read new records aloud
    Watch {
        /// Poll interval in seconds (5-300)
        #[arg(long)]
        interval: Option<u64>,
    },
    /// Speak the most recent notification in the backlog
    PlayLast,
    /// Append a notification record to the backlog
    Push {
        message: String,
        #[arg(short, long)]
        source: Option<String>,
        #[arg(short, long)]
        priority: Option<String>,
    },
    /// Back up and empty the backlog
    Clear,
    /// List discovered voices
    Voices,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = Config::load(args.config.as_deref());
    if let Some(rate) = args.rate {
        config.speech.rate = rate;
    }
    if let Some(volume) = args.volume {
        config.speech.volume = volume;
    }
    if let Some(voice) = &args.voice {
        config.speech.voice = Some(voice.clone());
    }
    let config = config.clamped();

    let store = Arc::new(NotificationStore::new(config.store.path.clone()));

    let local: Arc<dyn LocalSynthesizer> = Arc::new(EspeakSynthesizer::new(&config.local));
    let cloud: Option<Arc<dyn CloudSynthesizer>> = if config.cloud.endpoint.is_empty() {
        None
    } else {
        Some(Arc::new(HttpCloudSynthesizer::new(&config.cloud)))
    };

    let dispatcher = Arc::new(EngineDispatcher::new(cloud.clone(), Some(local.clone())));
    let catalog = Arc::new(VoiceCatalog::new(cloud, Some(local)));

    match args.command {
        Command::Push {
            message,
            source,
            priority,
        } => {
            let mut record = NotificationRecord::new(
                serde_json::Value::from(chrono::Utc::now().timestamp_millis()),
                message,
            );
            record.source = source;
            record.priority = priority;
            store.append(&record)?;
            info!("Notification appended to {}", store.path().display());
        }

        Command::Clear => {
            store.clear()?;
            info!("Backlog cleared (backup created)");
        }

        Command::Voices => {
            let report = catalog.load(&RetryPolicy::default()).await;
            if report.fallback_used {
                warn!("No backend voices found, listing the fallback voice");
            }
            select_voice(&catalog, &config);
            let selected = catalog.selected();
            for (i, voice) in catalog.voices().iter().enumerate() {
                let marker = if Some(voice) == selected.as_ref() {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {i:3}  {:<8} {:<12} {}", voice.backend.to_string(), voice.id, voice.name);
            }
        }

        Command::Generate { text, file, output } => {
            let text = resolve_text(text, file)?;
            catalog.load(&RetryPolicy::default()).await;
            select_voice(&catalog, &config);
            let voice = catalog
                .selected()
                .ok_or("no voice available for synthesis")?;

            let ext = match voice.backend {
                VoiceBackend::Cloud => "mp3",
                VoiceBackend::Local => "wav",
            };
            let out = output
                .unwrap_or_else(|| std::env::temp_dir().join(format!("tts_output.{ext}")));

            dispatcher
                .synthesize_to_file(&text, &voice, &config.speech, &out)
                .await?;
            info!("Audio generated: {}", out.display());
            println!("{}", out.display());
        }

        Command::Speak { text, file } => {
            let text = resolve_text(text, file)?;
            let session = build_session(&dispatcher)?;
            catalog.load(&RetryPolicy::default()).await;
            select_voice(&catalog, &config);
            let voice = catalog.selected().ok_or("no voice available")?;

            match session.speak(&text, &voice, &config.speech).await? {
                SpeakOutcome::Completed => info!("Done speaking"),
                SpeakOutcome::Cancelled => info!("Speech interrupted"),
                SpeakOutcome::Rejected => warn!("Another session is already speaking"),
            }
        }

        Command::PlayLast => {
            let Some(record) = store.last()? else {
                info!("No notifications in the backlog");
                return Ok(());
            };

            let session = build_session(&dispatcher)?;
            catalog.load(&RetryPolicy::default()).await;
            select_voice(&catalog, &config);
            let voice = catalog.selected().ok_or("no voice available")?;

            let text = format!(
                "{}{}",
                spoken_prefix(record.source.as_deref()),
                record.message
            );
            session.speak(&text, &voice, &config.speech).await?;
        }

        Command::Play { artifact } => {
            let device = Arc::new(RodioDevice::new()?);
            let playback = PlaybackController::new(device);
            playback.load(&artifact)?;
            playback.play();
            info!("Playing {} (commands: play, pause, unpause, stop, rewind, quit)", artifact.display());
            run_transport(&playback);
        }

        Command::Watch { interval } => {
            let session = Arc::new(build_session(&dispatcher)?);
            let report = catalog.load(&RetryPolicy::default()).await;
            info!(
                "Voice catalog: {} cloud, {} local{}",
                report.cloud_count,
                report.local_count,
                if report.fallback_used {
                    " (fallback voice)"
                } else {
                    ""
                }
            );
            select_voice(&catalog, &config);

            let interval_secs = interval
                .unwrap_or(config.auto_read.interval_secs)
                .clamp(5, 300);
            let scheduler = AutoReadScheduler::new(
                store,
                session,
                catalog,
                config.speech.clone(),
                config.auto_read.pause_secs,
            );
            scheduler.start(Duration::from_secs(interval_secs));

            tokio::signal::ctrl_c().await?;
            info!("Shutting down");
            scheduler.stop().await;
        }
    }

    Ok(())
}

/// Text argument wins; otherwise the file is read. One of the two is
/// required.
fn resolve_text(
    text: Option<String>,
    file: Option<PathBuf>,
) -> Result<String, Box<dyn std::error::Error>> {
    if let Some(text) = text {
        if !text.trim().is_empty() {
            return Ok(text);
        }
    }
    let Some(path) = file else {
        return Err("enter text or choose a text file first".into());
    };
    Ok(std::fs::read_to_string(path)?)
}

fn build_session(
    dispatcher: &Arc<EngineDispatcher>,
) -> Result<SpeechSession, Box<dyn std::error::Error>> {
    let device = Arc::new(RodioDevice::new()?);
    let playback = Arc::new(PlaybackController::new(device));
    Ok(SpeechSession::new(dispatcher.clone(), playback))
}

fn select_voice(catalog: &VoiceCatalog, config: &Config) {
    if let Some(id) = &config.speech.voice {
        catalog.select_id(id);
    }
}

/// Minimal transport prompt over stdin.
fn run_transport(playback: &PlaybackController) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let state = match line.trim() {
            "play" => playback.play(),
            "pause" => playback.pause(),
            "unpause" => playback.unpause(),
            "stop" => playback.stop(),
            "rewind" => playback.rewind(),
            "status" => playback.state(),
            "quit" | "q" | "exit" => break,
            "" => continue,
            other => {
                println!("unknown command: {other}");
                continue;
            }
        };
        println!("[{state}] busy={}", playback.is_busy());
    }
}
