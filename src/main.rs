use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use vocab_live::db::{self, SettingsRepo, mask_key};
use vocab_live::live::WsConnector;
use vocab_live::voice::{
    AudioBackend, CpalBackend, PlaybackPipeline, calculate_rms, codec, samples_to_wav,
};
use vocab_live::{Config, SessionController, SettingsCredentialResolver, wait_closed};

/// Tutor - Real-time voice tutor for vocabulary practice
#[derive(Parser)]
#[command(name = "tutor", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
        /// Save the captured audio as a WAV file
        #[arg(long)]
        save: Option<std::path::PathBuf>,
    },
    /// Test speaker output through the playback scheduler
    TestSpeaker,
    /// Save the API key used for live sessions
    SetKey {
        /// Gemini API key
        key: String,
        /// Custom endpoint or proxy URL
        #[arg(long)]
        endpoint: Option<String>,
    },
    /// Remove the saved API key
    ClearKey,
    /// Show the saved settings
    ShowSettings,
    /// Interactive first-run setup
    Setup,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "info,vocab_live=info",
        1 => "info,vocab_live=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    // TLS for the live stream; errs only if a provider is already installed
    let _ = rustls::crypto::ring::default_provider().install_default();

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
    // Handle subcommands
    if let Some(cmd) = cli.command {
        return match cmd {
            Command::TestMic { duration, save } => test_mic(duration, save.as_deref()).await,
            Command::TestSpeaker => test_speaker().await,
            Command::SetKey { key, endpoint } => set_key(&key, endpoint.as_deref()),
            Command::ClearKey => clear_key(),
            Command::ShowSettings => show_settings(),
            Command::Setup => vocab_live::setup::run_setup(&settings_repo()?),
        };
    }

    let config = Config::load()?;
    tracing::debug!(?config, "loaded configuration");

    let settings = SettingsRepo::new(db::init(config.db_path())?);
    let mut controller = SessionController::new(
        config.live.clone(),
        config.audio.clone(),
        Arc::new(SettingsCredentialResolver::new(settings)),
        Arc::new(WsConnector),
        Arc::new(CpalBackend),
    );

    let session_status = controller.subscribe();
    controller.set_visualizer(move |tap| {
        let closed = wait_closed(session_status.clone());
        tokio::spawn(async move {
            tokio::pin!(closed);
            let mut tick = tokio::time::interval(Duration::from_millis(250));
            loop {
                tokio::select! {
                    () = &mut closed => break,
                    _ = tick.tick() => tracing::trace!(rms = tap.rms(), "output level"),
                }
            }
        });
    });

    let mut status = controller.subscribe();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let s = status.borrow_and_update().clone();
            tracing::debug!(
                state = ?s.state,
                connected = s.is_connected,
                talking = s.is_talking,
                "session status"
            );
        }
    });

    println!("Connecting to the tutor...");
    let connected = tokio::select! {
        result = controller.connect() => Some(result),
        _ = tokio::signal::ctrl_c() => None,
    };

    match connected {
        None => {
            controller.disconnect();
            return Ok(());
        }
        Some(Err(e)) => {
            eprintln!("{}", e.user_message());
            return Err(e.into());
        }
        Some(Ok(())) => {}
    }

    println!("Connected! Start speaking. Press Ctrl-C to stop.");

    tokio::select! {
        () = controller.run_until_closed() => {}
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown requested");
        }
    }

    controller.disconnect();

    if let Some(message) = controller.status().last_error {
        eprintln!("{message}");
        anyhow::bail!(message);
    }

    println!("Session ended.");
    Ok(())
}

fn settings_repo() -> anyhow::Result<SettingsRepo> {
    let config = Config::load()?;
    Ok(SettingsRepo::new(db::init(config.db_path())?))
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64, save: Option<&std::path::Path>) -> anyhow::Result<()> {
    let config = Config::load()?;
    let sample_rate = config.audio.capture_sample_rate;

    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let (frames_tx, mut frames) = mpsc::unbounded_channel();
    let mut capture =
        CpalBackend.open_input(sample_rate, config.audio.capture_frame_size, frames_tx)?;

    println!("Sample rate: {sample_rate} Hz");
    println!("---");

    let mut recorded = Vec::new();
    for i in 0..duration {
        let mut second = Vec::new();
        let deadline = tokio::time::sleep(Duration::from_secs(1));
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                () = &mut deadline => break,
                frame = frames.recv() => match frame {
                    Some(frame) => second.extend_from_slice(&frame.samples),
                    None => break,
                },
            }
        }

        let energy = calculate_rms(&second);
        let peak = second.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        if save.is_some() {
            recorded.extend(second);
        }
    }

    capture.close();

    if let Some(path) = save {
        std::fs::write(path, samples_to_wav(&recorded, sample_rate)?)?;
        println!("\nSaved {} samples to {}", recorded.len(), path.display());
    }

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check:");
    println!("  1. Is your mic plugged in?");
    println!("  2. Run: pactl info | grep 'Default Source'");
    println!("  3. Run: arecord -l (to list devices)");
    println!("  4. Try: pavucontrol (to check levels)");

    Ok(())
}

/// Test speaker output with a sine wave split into back-to-back segments
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    let config = Config::load()?;
    let sample_rate = config.audio.playback_sample_rate;

    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let (ended_tx, mut ended) = mpsc::unbounded_channel();
    let sink = CpalBackend.open_output(sample_rate, config.audio.fft_size, ended_tx)?;
    let mut playback = PlaybackPipeline::new(sink, sample_rate, 1);

    // 2 seconds of 440Hz sine as four half-second deltas
    let frequency = 440.0_f32;
    let segment_len = usize::try_from(sample_rate / 2)?;
    #[allow(clippy::cast_precision_loss)]
    let tone: Vec<f32> = (0..segment_len * 4)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3 // 30% volume
        })
        .collect();

    for chunk in tone.chunks(segment_len) {
        let encoded = codec::encode(chunk);
        if let Some(entry) = playback.push_delta(&encoded.data)? {
            println!(
                "Segment {} at {:.3}s for {:.3}s",
                entry.id, entry.start_time, entry.duration
            );
        }
    }

    while playback.is_talking() {
        match tokio::time::timeout(Duration::from_secs(5), ended.recv()).await {
            Ok(Some(id)) => {
                playback.segment_ended(id);
            }
            Ok(None) | Err(_) => break,
        }
    }
    playback.close();

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");
    println!("If you didn't hear anything, check:");
    println!("  1. Run: pactl info | grep 'Default Sink'");
    println!("  2. Run: pactl list sinks short");
    println!("  3. Try: pavucontrol (to check output levels)");

    Ok(())
}

/// Save the API key
fn set_key(key: &str, endpoint: Option<&str>) -> anyhow::Result<()> {
    let stored = settings_repo()?.save(key, endpoint)?;
    match stored.api_key {
        Some(ref k) => println!("Saved API key {}", mask_key(k)),
        None => println!("Empty key; nothing saved"),
    }
    if let Some(endpoint) = stored.api_endpoint {
        println!("Endpoint: {endpoint}");
    }
    Ok(())
}

/// Remove the saved API key
fn clear_key() -> anyhow::Result<()> {
    if settings_repo()?.clear()? {
        println!("Saved API key removed");
    } else {
        println!("No saved API key");
    }
    Ok(())
}

/// Show the saved settings
fn show_settings() -> anyhow::Result<()> {
    let config = Config::load()?;
    let settings = SettingsRepo::new(db::init(config.db_path())?);

    println!("Model:    {}", config.live.model);
    println!("Voice:    {}", config.live.voice);
    println!("Database: {}", config.db_path().display());

    match settings.get()? {
        Some(stored) => {
            println!(
                "API key:  {}",
                stored.api_key.as_deref().map_or_else(|| "(none)".to_string(), mask_key)
            );
            println!(
                "Endpoint: {}",
                stored.api_endpoint.as_deref().unwrap_or(&config.live.endpoint)
            );
            println!("Updated:  {}", stored.updated_at.to_rfc3339());
        }
        None => {
            println!("API key:  (none saved; GEMINI_API_KEY or API_KEY is used)");
            println!("Endpoint: {}", config.live.endpoint);
        }
    }

    Ok(())
}
