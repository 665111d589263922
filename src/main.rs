use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use skyris_voice::backend::BackendClient;
use skyris_voice::voice::{
    AudioInput, MicrophoneInput, RecognitionSession, SessionEvent, SessionHandle, SessionRuntime,
    SpeechSession, Utterance, VolumeAnalyzer,
};
use skyris_voice::Config;

/// Skyris - talk to your pet owl
#[derive(Parser)]
#[command(name = "skyris", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start a voice conversation (default)
    Listen {
        /// Keep a WAV copy of every utterance in this directory
        #[arg(long, env = "SKYRIS_RECORDINGS_DIR")]
        save_dir: Option<PathBuf>,
    },
    /// Show live microphone levels
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Check that the AI backend is reachable
    Health,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info,skyris_voice=info",
        1 => "info,skyris_voice=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load()?;

    match cli.command.unwrap_or(Command::Listen { save_dir: None }) {
        Command::Listen { save_dir } => {
            if save_dir.is_some() {
                config.recordings_dir = save_dir;
            }
            listen(config).await
        }
        Command::TestMic { duration } => test_mic(&config, duration).await,
        Command::Health => health(&config).await,
    }
}

#[allow(clippy::future_not_send)]
async fn listen(config: Config) -> anyhow::Result<()> {
    let backend = BackendClient::new(&config.backend)?;

    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    // No live transcription engine on the desktop; the backend transcribes the audio
    let (_recognition_tx, recognition_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let session = SpeechSession::new(
        config.speech.clone(),
        Box::new(MicrophoneInput::new(frames_tx)),
        RecognitionSession::local_only(config.speech.session_options()),
        move |event| {
            let _ = events_tx.send(event);
        },
    );
    let (runtime, handle) = SessionRuntime::new(session, frames_rx, recognition_rx);

    tracing::info!(
        backend = %backend.base_url(),
        language = %config.speech.language,
        "starting skyris"
    );

    let control = async {
        let result = converse(&handle, events_rx, backend, config.recordings_dir).await;
        let _ = handle.shutdown();
        result
    };

    let ((), result) = tokio::join!(runtime.run(), control);
    result
}

async fn converse(
    handle: &SessionHandle,
    events: mpsc::UnboundedReceiver<SessionEvent>,
    backend: BackendClient,
    recordings_dir: Option<PathBuf>,
) -> anyhow::Result<()> {
    if let Some(dir) = &recordings_dir {
        tokio::fs::create_dir_all(dir).await?;
    }

    let events_task = tokio::spawn(handle_events(events, handle.clone(), backend, recordings_dir));

    handle.start().await?;
    println!("Skyris is listening. Press Ctrl+C to quit.");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result?;
            tracing::info!("shutdown requested");
        }
        _ = events_task => {}
    }
    Ok(())
}

async fn handle_events(
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
    handle: SessionHandle,
    backend: BackendClient,
    recordings_dir: Option<PathBuf>,
) {
    while let Some(event) = events.recv().await {
        match event {
            SessionEvent::StatusChange(state) => tracing::debug!(%state, "status"),
            SessionEvent::Result(result) => {
                tracing::debug!(transcript = %result.transcript, is_final = result.is_final, "transcript");
            }
            SessionEvent::SpeechStart => tracing::debug!("speech started"),
            SessionEvent::SpeechEnd | SessionEvent::Silence => {}
            SessionEvent::Sleep => println!("Skyris dozed off. Make a sound to wake it up."),
            SessionEvent::WakeUp => println!("Skyris is awake!"),
            SessionEvent::Error(e) => tracing::error!(error = %e, "session error"),
            SessionEvent::SendToAi(utterance) => {
                if let Some(dir) = &recordings_dir {
                    save_recording(dir, &utterance).await;
                }
                if handle_utterance(&handle, &backend, &utterance).await.is_err() {
                    break;
                }
            }
        }
    }
}

async fn handle_utterance(
    handle: &SessionHandle,
    backend: &BackendClient,
    utterance: &Utterance,
) -> skyris_voice::Result<()> {
    match backend.generate(utterance).await {
        Ok(reply) => {
            println!("🦉 [{}] {}", reply.emotion, reply.text);
            handle.set_ai_speaking(true, Some(reply.text))?;
            handle.set_ai_speaking(false, None)
        }
        Err(e) => {
            tracing::warn!(error = %e, "backend request failed");
            handle.interrupt_ai_response()
        }
    }
}

async fn save_recording(dir: &Path, utterance: &Utterance) {
    let path = dir.join(format!("{}.wav", utterance.id));
    match tokio::fs::write(&path, &utterance.audio_wav).await {
        Ok(()) => tracing::debug!(path = %path.display(), "utterance saved"),
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to save utterance"),
    }
}

/// Print analyser levels for a few seconds
#[allow(clippy::future_not_send)]
async fn test_mic(config: &Config, duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let mut input = MicrophoneInput::new(frames_tx);
    input.open(&config.speech.capture_constraints())?;

    let threshold = config.speech.silence_threshold_db;
    let mut analyzer = VolumeAnalyzer::new();
    println!("Sample rate: {} Hz, threshold: {threshold} dB", config.speech.sample_rate);
    println!("---");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(duration);
    while let Ok(Some(frame)) = tokio::time::timeout_at(deadline, frames_rx.recv()).await {
        let db = analyzer.analyze(&frame);

        // Visual meter over the -100..0 dB range
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = ((db + 100.0) / 2.0).clamp(0.0, 50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);
        let marker = if db > threshold { "speech" } else { "" };

        println!("{db:7.1} dB | [{meter}] {marker}");
    }

    input.close();

    println!("\n---");
    println!("If the meter moved when you spoke, your mic is working!");
    println!("If it stayed near -100 dB, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");

    Ok(())
}

async fn health(config: &Config) -> anyhow::Result<()> {
    let backend = BackendClient::new(&config.backend)?;
    backend.healthcheck().await?;
    println!("Backend at {} is healthy", backend.base_url());
    Ok(())
}
