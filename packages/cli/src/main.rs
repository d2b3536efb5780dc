#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for urban sprawl analysis.
//!
//! Runs the analysis pipeline against Google Earth Engine (or an offline
//! scene file), re-renders stored runs, checks per-year imagery
//! availability, and prints the legend and effective configuration.
//!
//! Uses `indicatif-log-bridge` (via [`sprawl_cli_utils::init_logger`]) to
//! route `log` output through `indicatif::MultiProgress` so that log lines
//! and progress bars never fight for the terminal.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

/// Monitor urban sprawl from satellite imagery.
#[derive(Parser)]
#[command(name = "sprawl")]
#[command(about = "Monitor urban sprawl from satellite imagery")]
struct Cli {
    /// TOML configuration file (defaults are used for anything missing).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Top-level subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Compare two dates over a region and print the summary report.
    Analyze {
        /// `GeoJSON` file with a Polygon or Rectangle geometry.
        #[arg(long)]
        geometry: PathBuf,

        /// Start date (YYYY-MM-DD).
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD).
        #[arg(long)]
        end: String,

        /// Imagery source override (`sentinel2`/`s2` or `landsat8`/`l8`).
        #[arg(long)]
        sensor: Option<String>,

        /// Classify both composites into land-cover classes.
        #[arg(long)]
        classify: bool,

        /// Compute the class transition matrix (16 extra reductions).
        #[arg(long)]
        change_matrix: bool,

        /// Break vegetation change down by elevation.
        #[arg(long)]
        elevation: bool,

        /// Name of the area used in detailed reports.
        #[arg(long, default_value = "Selected area")]
        area_name: String,

        /// Write the Markdown report here.
        #[arg(long)]
        report: Option<PathBuf>,

        /// Write the flattened metrics as CSV here.
        #[arg(long)]
        csv: Option<PathBuf>,

        /// Write the full run as JSON here.
        #[arg(long)]
        json: Option<PathBuf>,

        /// Write the region and headline metrics as a `GeoJSON` feature here.
        #[arg(long)]
        geojson: Option<PathBuf>,

        /// Evaluate against an in-memory scene file instead of Earth Engine.
        #[arg(long)]
        offline: Option<PathBuf>,
    },

    /// Re-render the reports of a stored run.
    Report {
        /// JSON file written by `analyze --json`.
        #[arg(long)]
        input: PathBuf,

        /// Name of the area used in detailed reports.
        #[arg(long, default_value = "Selected area")]
        area_name: String,

        /// Also print the detailed change and classification reports.
        #[arg(long)]
        details: bool,
    },

    /// Count usable scenes per calendar year.
    Availability {
        /// `GeoJSON` file with a Polygon or Rectangle geometry.
        #[arg(long)]
        geometry: PathBuf,

        /// First year.
        #[arg(long)]
        start_year: i32,

        /// Last year (inclusive).
        #[arg(long)]
        end_year: i32,

        /// Evaluate against an in-memory scene file instead of Earth Engine.
        #[arg(long)]
        offline: Option<PathBuf>,
    },

    /// Print the land-cover legend.
    Legend,

    /// Print the effective configuration as TOML.
    Config,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = sprawl_cli_utils::init_logger();
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Analyze {
            geometry,
            start,
            end,
            sensor,
            classify,
            change_matrix,
            elevation,
            area_name,
            report,
            csv,
            json,
            geojson,
            offline,
        } => {
            commands::analyze(
                &multi,
                config,
                &commands::AnalyzeArgs {
                    geometry,
                    start,
                    end,
                    sensor,
                    options: sprawl_analysis::pipeline::AnalysisOptions {
                        classify,
                        change_matrix,
                        elevation,
                    },
                    area_name,
                    outputs: sprawl_analysis::export::OutputPaths {
                        report,
                        csv,
                        json,
                        geojson,
                    },
                    offline,
                },
            )
            .await?;
        }
        Commands::Report {
            input,
            area_name,
            details,
        } => commands::report(&input, &area_name, details)?,
        Commands::Availability {
            geometry,
            start_year,
            end_year,
            offline,
        } => {
            commands::availability(
                &multi,
                &config,
                &geometry,
                start_year,
                end_year,
                offline.as_deref(),
            )
            .await?;
        }
        Commands::Legend => commands::legend(),
        Commands::Config => println!("{}", config.to_toml_string()?),
    }

    Ok(())
}
