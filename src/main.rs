//! Speaker Verify CLI
//!
//! Command-line interface for the speaker verification pipeline.

use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use env_logger::Env;
use log::debug;

use speaker_verify::cli::{commands, Cli, Commands, TrainOverrides};
use speaker_verify::SpeakerError;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(default_filter)).init();

    debug!("Speaker Verify v{}", env!("CARGO_PKG_VERSION"));

    match handle_command(cli.command) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            if let Some(speaker_err) = err.downcast_ref::<SpeakerError>() {
                for suggestion in speaker_err.recovery_suggestions() {
                    eprintln!("  hint: {}", suggestion);
                }
            }
            ExitCode::FAILURE
        }
    }
}

fn handle_command(cmd: Commands) -> anyhow::Result<()> {
    match cmd {
        Commands::Train {
            config,
            target_dir,
            others_dir,
            model,
            epochs,
            batch_size,
            seed,
            example,
        } => {
            let overrides = TrainOverrides {
                target_dir,
                others_dir,
                model,
                epochs,
                batch_size,
                seed,
                example,
            };
            commands::train(config.as_deref(), overrides).context("training failed")
        }
        Commands::Verify {
            file,
            model,
            threshold,
        } => commands::verify(&file, &model, threshold)
            .with_context(|| format!("could not verify {}", file.display())),
        Commands::CircomInput { file, degree, x, out } => {
            commands::circom_input(&file, degree, x, &out)
                .with_context(|| format!("could not fit {}", file.display()))
        }
        Commands::Features { file, json } => commands::features(&file, json)
            .with_context(|| format!("could not extract features from {}", file.display())),
    }
}
