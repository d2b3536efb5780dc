//! Subcommand implementations.

use std::path::{Path, PathBuf};

use sprawl_analysis::{
    AnalysisError,
    export::{OutputPaths, render_outputs},
    pipeline::{AnalysisOptions, Analyzer},
    report::{legend_markdown, render_report, summary_report},
};
use sprawl_analysis_models::{AnalysisConfig, AnalysisRun};
use sprawl_cli_utils::{IndicatifProgress, MultiProgress};
use sprawl_oracle::{Oracle, earth_engine::EarthEngineOracle, memory::MemoryOracle};
use sprawl_region_models::{RegionOfInterest, TimePeriod};

type CliResult<T> = Result<T, Box<dyn std::error::Error>>;

/// Arguments of `sprawl analyze`.
pub struct AnalyzeArgs {
    pub geometry: PathBuf,
    pub start: String,
    pub end: String,
    pub sensor: Option<String>,
    pub options: AnalysisOptions,
    pub area_name: String,
    pub outputs: OutputPaths,
    pub offline: Option<PathBuf>,
}

/// Loads the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> CliResult<AnalysisConfig> {
    let config = match path {
        Some(path) => {
            log::info!("Loading configuration from {}", path.display());
            AnalysisConfig::load(path)?
        }
        None => AnalysisConfig::default(),
    };
    Ok(config)
}

fn load_region(path: &Path) -> CliResult<RegionOfInterest> {
    let geometry = std::fs::read_to_string(path)?;
    Ok(RegionOfInterest::from_geojson_str(&geometry)?)
}

/// Builds the oracle: an in-memory one over `offline` if given, otherwise
/// Earth Engine configured from the environment.
fn create_oracle(offline: Option<&Path>) -> CliResult<Box<dyn Oracle>> {
    if let Some(path) = offline {
        log::info!("Using offline scenes from {}", path.display());
        let scenario = std::fs::read_to_string(path)?;
        return Ok(Box::new(MemoryOracle::from_json(&scenario)?));
    }

    log::info!("Using Earth Engine");
    Ok(Box::new(EarthEngineOracle::from_env()?))
}

/// Hides service details from the user; they are logged instead.
fn user_facing(err: AnalysisError) -> Box<dyn std::error::Error> {
    if let AnalysisError::Oracle(source) = &err {
        log::error!("{source}");
    }
    err.user_message().into()
}

/// `sprawl analyze`.
pub async fn analyze(
    multi: &MultiProgress,
    mut config: AnalysisConfig,
    args: &AnalyzeArgs,
) -> CliResult<()> {
    if let Some(sensor) = &args.sensor {
        config = config.with_sensor(sensor)?;
    }
    let region = load_region(&args.geometry)?;
    let period = TimePeriod::parse(&args.start, &args.end)?;
    let oracle = create_oracle(args.offline.as_deref())?;

    let progress = IndicatifProgress::steps_bar(multi, "Analysing");
    let run = Analyzer::new(oracle.as_ref(), &config)
        .with_progress(progress)
        .run(&region, period, args.options)
        .await
        .map_err(user_facing)?;

    let outputs = render_outputs(
        &run,
        &args.outputs,
        &args.area_name,
        chrono::Local::now().naive_local(),
        config.export.csv_encoding,
    )?;

    println!("{}", summary_report(&run.summary_metrics()));
    outputs.write_all()?;

    Ok(())
}

/// `sprawl report`.
pub fn report(input: &Path, area_name: &str, details: bool) -> CliResult<()> {
    let run: AnalysisRun = serde_json::from_str(&std::fs::read_to_string(input)?)?;

    let generated_at = chrono::Local::now().naive_local();
    println!("{}", render_report(&run, area_name, generated_at, details));

    Ok(())
}

/// `sprawl availability`.
pub async fn availability(
    multi: &MultiProgress,
    config: &AnalysisConfig,
    geometry: &Path,
    start_year: i32,
    end_year: i32,
    offline: Option<&Path>,
) -> CliResult<()> {
    let region = load_region(geometry)?;
    let oracle = create_oracle(offline)?;

    let progress = IndicatifProgress::years_bar(multi, "Checking availability");
    let years = Analyzer::new(oracle.as_ref(), config)
        .with_progress(progress)
        .availability(&region, start_year, end_year)
        .await
        .map_err(user_facing)?;

    println!("| Year | Images | Available |");
    println!("|---|---|---|");
    for year in &years {
        println!(
            "| {} | {} | {} |",
            year.year,
            year.image_count,
            if year.available() { "yes" } else { "no" }
        );
    }

    Ok(())
}

/// `sprawl legend`.
pub fn legend() {
    print!("{}", legend_markdown());
}
