//! Deposit - check capture CLI
//!
//! Runs the capture pipeline against a directory of still images standing in
//! for the camera, and parses MICR lines.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Read;
use std::path::PathBuf;
use std::rc::Rc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

use deposit_capture::{NullPreview, ReplayCamera};
use deposit_core::colored_logger::{init_component_logger, Component};
use deposit_core::{
    CaptureConfig, CaptureHandoff, CaptureOrchestrator, NextScreen, Readiness, SessionEvent,
    SessionOutcome,
};
use deposit_ocr::{parse_micr, TranscriptOcr};
use deposit_vision::LuminanceDetector;

#[derive(Parser)]
#[command(name = "deposit")]
#[command(about = "Check capture with document detection and MICR extraction")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Configuration profile to apply
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a capture session with replayed frames as the camera
    Run {
        /// Directory of still images, replayed in file name order
        #[arg(short, long)]
        frames: PathBuf,

        /// Text file holding what OCR should read off the check
        #[arg(short, long)]
        transcript: PathBuf,

        /// Give up if capture has not completed after this many seconds
        #[arg(long, default_value = "60")]
        timeout: u64,

        /// Print only the extracted fields, not the image
        #[arg(long)]
        fields_only: bool,
    },

    /// Parse MICR text from a file, or stdin
    Parse {
        /// File to read (stdin when omitted)
        file: Option<PathBuf>,
    },

    /// Show the resolved configuration
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let component = match cli.command {
        Commands::Run { .. } => Component::Capture,
        Commands::Parse { .. } => Component::Parse,
        Commands::Config => Component::Config,
    };
    init_component_logger(component, cli.verbose)?;

    let config = load_config(cli.config, cli.profile.as_deref())?;

    match cli.command {
        Commands::Run {
            frames,
            transcript,
            timeout,
            fields_only,
        } => {
            cmd_run(config, frames, transcript, timeout, fields_only)?;
        }
        Commands::Parse { file } => {
            cmd_parse(file)?;
        }
        Commands::Config => {
            cmd_config(&config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>, profile: Option<&str>) -> Result<CaptureConfig> {
    let config = CaptureConfig::load(path.as_deref())?;
    match profile {
        Some(name) => config.apply_profile(name),
        None => Ok(config),
    }
}

/// Prints the hand-off to stdout
struct JsonScreen {
    fields_only: bool,
}

impl NextScreen for JsonScreen {
    fn present(&self, handoff: CaptureHandoff) {
        let json = if self.fields_only {
            serde_json::to_string_pretty(&handoff.front_fields)
        } else {
            serde_json::to_string_pretty(&handoff)
        };

        match json {
            Ok(json) => println!("{}", json),
            Err(e) => error!("failed to serialize capture: {}", e),
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn cmd_run(
    config: CaptureConfig,
    frames: PathBuf,
    transcript: PathBuf,
    timeout: u64,
    fields_only: bool,
) -> Result<()> {
    let camera = ReplayCamera::from_dir(&frames)
        .with_context(|| format!("failed to load frames from {:?}", frames))?;
    info!("replaying {} frame(s) as the camera", camera.frame_count());

    let ocr = TranscriptOcr::from_file(transcript);
    let detector = LuminanceDetector::default();

    // Ctrl+C forces the camera closed like a page unload
    let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        let _ = signal_tx.send(());
    })?;

    let local = LocalSet::new();
    let outcome = local
        .run_until(async move {
            let orchestrator = CaptureOrchestrator::new(
                config,
                camera,
                Rc::new(NullPreview),
                Readiness::ready(detector),
                Readiness::ready(ocr),
                JsonScreen { fields_only },
            );
            let (controller, handle) = orchestrator.spawn();
            let mut events = controller.subscribe();
            let deadline = tokio::time::sleep(Duration::from_secs(timeout));
            tokio::pin!(deadline);
            let mut timed_out = false;

            controller.start();

            loop {
                tokio::select! {
                    _ = signal_rx.recv() => {
                        info!("received shutdown signal");
                        controller.unload();
                    }
                    _ = &mut deadline, if !timed_out => {
                        timed_out = true;
                        warn!("no capture after {}s, cancelling", timeout);
                        controller.cancel();
                    }
                    event = events.recv() => match event {
                        Ok(SessionEvent::Status(status)) => info!("{}", status),
                        Ok(SessionEvent::CountdownTick(value)) if value > 0 => info!("{}...", value),
                        Ok(SessionEvent::CameraDenied(reason)) => {
                            error!("camera unavailable: {}", reason);
                            controller.cancel();
                        }
                        Ok(SessionEvent::Completed) => controller.continue_to_next(),
                        Ok(SessionEvent::Ended(_)) => break,
                        Ok(event) => debug!("{:?}", event),
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("missed {} session events", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }

            handle.await.context("capture session task failed")
        })
        .await?;

    info!("session ended: {:?}", outcome);
    match outcome {
        SessionOutcome::HandedOff => Ok(()),
        other => Err(anyhow::anyhow!("capture did not complete ({:?})", other)),
    }
}

fn cmd_parse(file: Option<PathBuf>) -> Result<()> {
    let text = match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {:?}", path))?,
        None => {
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text)?;
            text
        }
    };

    let fields = parse_micr(&text);
    info!("parsed {} field(s) from {:?}", fields.populated(), fields.raw_line);
    println!("{}", serde_json::to_string_pretty(&fields)?);

    Ok(())
}

fn cmd_config(config: &CaptureConfig) -> Result<()> {
    info!("default config path: {:?}", CaptureConfig::default_path());
    print!("{}", config.to_toml()?);
    Ok(())
}
