//! specrange CLI.
//!
//! Generates synthetic spectrum images, inspects cube files, and replays
//! scripted range selection sessions against them.
#![allow(
    clippy::uninlined_format_args,
    clippy::cast_precision_loss,
    clippy::too_many_lines
)]

mod report;
mod script;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::info;
use serde::Serialize;
use specrange_core::{CalibrationParameters, DataService};
use specrange_fetch::{DeriverConfig, FetchConfig, RayonSpawner, SelectionEngine};
use specrange_io::{synthetic_service, CubeDataService, SynthConfig};
use thiserror::Error;

use crate::report::SessionReport;
use crate::script::Script;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    SpecrangeIo(#[from] specrange_io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Energy range selection over spectrum images.
#[derive(Parser)]
#[command(name = "specrange")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a synthetic spectrum image to a cube file
    Synth {
        /// Output cube file
        #[arg(short, long)]
        output: PathBuf,

        /// Image rows
        #[arg(long, default_value = "32")]
        rows: usize,

        /// Image columns
        #[arg(long, default_value = "32")]
        cols: usize,

        /// Channels per spectrum
        #[arg(long, default_value = "1024")]
        channels: usize,

        /// Standard deviation of additive noise
        #[arg(long, default_value = "0.2")]
        noise: f64,

        /// Noise seed
        #[arg(long, default_value = "42")]
        seed: u64,
    },

    /// Show datasets, calibration and zero-peak width of a cube file
    Info {
        /// Cube file
        #[arg(short, long)]
        data: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Replay a session script and print the resulting ranges
    Run {
        /// Cube file; a synthetic dataset is used when omitted
        #[arg(short, long)]
        data: Option<PathBuf>,

        /// Session script (JSON)
        #[arg(short, long)]
        script: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Artificial latency per query (milliseconds)
        #[arg(long)]
        latency_ms: Option<u64>,

        /// Seconds to wait for pending queries
        #[arg(long, default_value = "30")]
        timeout_secs: u64,

        /// Line half-width when no zero-peak estimate is available
        #[arg(long, default_value = "0.1")]
        fallback_width: f64,

        /// Skip image queries for the displayed range
        #[arg(long)]
        no_images: bool,
    },
}

#[derive(Serialize)]
struct SignalInfo {
    index: usize,
    title: String,
    shape: [usize; 3],
    calibration: CalibrationParameters,
    zero_peak_width: Option<f64>,
}

#[derive(Serialize)]
struct DatasetInfo {
    name: String,
    signals: Vec<SignalInfo>,
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Synth {
            output,
            rows,
            cols,
            channels,
            noise,
            seed,
        } => {
            let config = SynthConfig::new()
                .with_size(rows, cols)
                .with_channels(channels)
                .with_noise(noise)
                .with_seed(seed);
            let service = synthetic_service(&config)?;
            service.save(&output)?;
            println!(
                "Wrote {}x{}x{} synthetic cube to {}",
                rows,
                cols,
                channels,
                output.display()
            );
        }

        Commands::Info { data, json } => {
            let service = CubeDataService::open(&data)?;
            let datasets = describe(&service);
            if json {
                println!("{}", serde_json::to_string_pretty(&datasets)?);
            } else {
                print_info(&data, &datasets);
            }
        }

        Commands::Run {
            data,
            script,
            json,
            latency_ms,
            timeout_secs,
            fallback_width,
            no_images,
        } => {
            let mut service = match &data {
                Some(path) => CubeDataService::open(path)?,
                None => {
                    info!("no cube file given, using a synthetic dataset");
                    synthetic_service(&SynthConfig::default())?
                }
            };
            if let Some(ms) = latency_ms {
                service = service.with_latency(Duration::from_millis(ms));
            }

            let script: Script = serde_json::from_reader(BufReader::new(File::open(&script)?))?;
            let mut engine = SelectionEngine::with_spawner(
                Arc::new(service),
                Arc::new(RayonSpawner),
                FetchConfig::new().with_images(!no_images),
                DeriverConfig::new().with_fallback_half_width(fallback_width),
            );

            let failures =
                script::execute(&mut engine, &script, Duration::from_secs(timeout_secs));
            let report = SessionReport::collect(&engine, failures);
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_table();
            }
        }
    }

    Ok(())
}

fn describe(service: &CubeDataService) -> Vec<DatasetInfo> {
    service
        .datasets()
        .map(|(name, signals)| DatasetInfo {
            name: name.to_string(),
            signals: signals
                .iter()
                .enumerate()
                .map(|(index, cube)| {
                    let (rows, cols, channels) = cube.shape();
                    SignalInfo {
                        index,
                        title: cube.title().to_string(),
                        shape: [rows, cols, channels],
                        calibration: cube.calibration().clone(),
                        zero_peak_width: service.zero_peak_width(name, index),
                    }
                })
                .collect(),
        })
        .collect()
}

fn print_info(path: &Path, datasets: &[DatasetInfo]) {
    println!("File: {}", path.display());
    for dataset in datasets {
        println!("\nDataset '{}':", dataset.name);
        for signal in &dataset.signals {
            let [rows, cols, channels] = signal.shape;
            let calibration = &signal.calibration;
            println!("  [{}] {}", signal.index, signal.title);
            println!("      shape:       {} x {} x {} channels", rows, cols, channels);
            println!(
                "      calibration: offset {} {}, scale {} {}/channel",
                calibration.offset, calibration.units, calibration.scale, calibration.units
            );
            match signal.zero_peak_width {
                Some(width) => println!("      zero peak:   half-width {:.4} {}", width, calibration.units),
                None => println!("      zero peak:   not found"),
            }
        }
    }
}
