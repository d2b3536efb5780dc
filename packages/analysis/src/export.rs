//! File exports of a run.
//!
//! For CSV, a run is flattened into one header row and one data row.
//! Nested records become `_`-joined column names such as
//! `vegetation_change_loss_km2`; missing values are empty cells. The
//! `GeoJSON` export is the region as a single feature carrying the
//! headline metrics.
//!
//! Every requested output is rendered in memory by [`render_outputs`]
//! before [`OutputSet::write_all`] touches the filesystem.

use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde_json::json;
use sprawl_analysis_models::{
    AnalysisRun, ChangeRecord, ClassBreakdown, CsvEncoding, IndexChange, LandCoverClass,
};

use crate::{AnalysisError, report::render_report};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Default)]
struct Row {
    cells: Vec<(String, String)>,
}

impl Row {
    fn text(&mut self, key: impl Into<String>, value: impl ToString) {
        self.cells.push((key.into(), value.to_string()));
    }

    fn number(&mut self, key: impl Into<String>, value: Option<f64>) {
        self.cells
            .push((key.into(), value.map_or_else(String::new, |v| v.to_string())));
    }

    fn record(&mut self, prefix: &str, record: &ChangeRecord) {
        self.number(format!("{prefix}_earlier"), record.earlier);
        self.number(format!("{prefix}_later"), record.later);
        self.number(format!("{prefix}_delta"), record.delta);
    }

    fn change(&mut self, prefix: &str, change: &IndexChange) {
        self.number(format!("{prefix}_loss_km2"), Some(change.loss_km2));
        self.number(format!("{prefix}_gain_km2"), Some(change.gain_km2));
        self.number(format!("{prefix}_stable_km2"), Some(change.stable_km2));
        self.number(format!("{prefix}_net_change_km2"), Some(change.net_change_km2));
        self.number(format!("{prefix}_change_percentage"), change.change_percentage);
        self.number(format!("{prefix}_gain_percentage"), change.gain_percentage);
        self.number(format!("{prefix}_difference_mean"), change.difference.mean);
        self.number(format!("{prefix}_difference_std_dev"), change.difference.std_dev);
        self.number(format!("{prefix}_difference_min"), change.difference.min);
        self.number(format!("{prefix}_difference_max"), change.difference.max);
    }

    fn breakdown(&mut self, prefix: &str, breakdown: &ClassBreakdown) {
        for stats in &breakdown.classes {
            let class = stats.class;
            self.number(format!("{prefix}_{class}_pixel_count"), Some(stats.pixel_count));
            self.number(format!("{prefix}_{class}_area_km2"), Some(stats.area_km2));
            self.number(format!("{prefix}_{class}_percentage"), Some(stats.percentage));
        }
    }
}

/// The run as ordered `(column, value)` pairs.
#[must_use]
pub fn metrics_row(run: &AnalysisRun) -> Vec<(String, String)> {
    let mut row = Row::default();

    row.text("region_type", run.region.kind());
    row.text("period_start", run.period.start());
    row.text("period_end", run.period.end());
    row.text("sensor", run.sensor);
    row.text("start_window_start", run.start_window.start_str());
    row.text("start_window_end", run.start_window.end_str());
    row.text("end_window_start", run.end_window.start_str());
    row.text("end_window_end", run.end_window.end_str());
    row.text("start_image_count", run.start_image_count);
    row.text("end_image_count", run.end_image_count);
    row.text("start_thumbnail_url", &run.start_thumbnail_url);
    row.text("end_thumbnail_url", &run.end_thumbnail_url);
    row.record("vegetation", &run.vegetation);
    row.record("built_up", &run.built_up);
    row.record("vegetation_fraction", &run.vegetation_fraction);
    row.record("impervious_fraction", &run.impervious_fraction);
    row.text("conservation_priority", run.priority);
    row.change("vegetation_change", &run.vegetation_change);
    row.change("urban_change", &run.urban_change);

    if let Some(classification) = &run.classification {
        row.breakdown("classification_earlier", &classification.earlier);
        row.breakdown("classification_later", &classification.later);
        row.text(
            "classification_earlier_thumbnail_url",
            &classification.earlier_thumbnail_url,
        );
        row.text(
            "classification_later_thumbnail_url",
            &classification.later_thumbnail_url,
        );
    }

    if let Some(matrix) = &run.change_matrix {
        for from in LandCoverClass::ALL {
            for to in LandCoverClass::ALL {
                row.number(
                    format!("change_matrix_{from}_to_{to}_km2"),
                    Some(matrix.area(from, to)),
                );
            }
        }
    }

    for zone in run.elevation_zones.iter().flatten() {
        row.number(format!("{}_mean_change", zone.label), zone.mean_change);
        row.number(format!("{}_std_dev_change", zone.label), zone.std_dev_change);
    }

    row.cells
}

/// Writes the run as CSV.
///
/// # Errors
///
/// Returns [`AnalysisError`] if writing fails.
pub fn write_csv<W: Write>(
    mut writer: W,
    run: &AnalysisRun,
    encoding: CsvEncoding,
) -> Result<(), AnalysisError> {
    if encoding == CsvEncoding::Utf8Sig {
        writer.write_all(UTF8_BOM)?;
    }

    let row = metrics_row(run);
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(row.iter().map(|(key, _)| key))?;
    csv.write_record(row.iter().map(|(_, value)| value))?;
    csv.flush()?;

    Ok(())
}

/// The CSV export as bytes.
///
/// # Errors
///
/// Returns [`AnalysisError`] if rendering fails.
pub fn render_csv(run: &AnalysisRun, encoding: CsvEncoding) -> Result<Vec<u8>, AnalysisError> {
    let mut buffer = Vec::new();
    write_csv(&mut buffer, run, encoding)?;
    Ok(buffer)
}

/// The region as a `GeoJSON` feature with the headline metrics as
/// properties. Missing deltas are `null`.
#[must_use]
pub fn region_feature(run: &AnalysisRun) -> geojson::Feature {
    let properties = json!({
        "region_type": run.region.kind().as_ref(),
        "period_start": run.period.start().to_string(),
        "period_end": run.period.end().to_string(),
        "sensor": run.sensor.to_string(),
        "conservation_priority": run.priority.to_string(),
        "vegetation_delta": run.vegetation.delta,
        "built_up_delta": run.built_up.delta,
        "vegetation_fraction_delta": run.vegetation_fraction.delta,
        "impervious_fraction_delta": run.impervious_fraction.delta,
        "vegetation_loss_km2": run.vegetation_change.loss_km2,
        "urban_expansion_km2": run.urban_change.gain_km2,
    });

    geojson::Feature {
        bbox: None,
        geometry: Some(run.region.to_geojson()),
        id: None,
        properties: properties.as_object().cloned(),
        foreign_members: None,
    }
}

/// Destinations of the exports of one run; `None` skips an output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputPaths {
    /// Markdown report with the detailed reports appended.
    pub report: Option<PathBuf>,
    /// Flattened metrics.
    pub csv: Option<PathBuf>,
    /// The whole run, readable by `sprawl report`.
    pub json: Option<PathBuf>,
    /// The region as a `GeoJSON` feature.
    pub geojson: Option<PathBuf>,
}

/// Rendered exports waiting to be written.
#[derive(Debug, Default)]
pub struct OutputSet {
    files: Vec<(PathBuf, Vec<u8>)>,
}

impl OutputSet {
    /// Destinations in write order.
    pub fn paths(&self) -> impl Iterator<Item = &Path> {
        self.files.iter().map(|(path, _)| path.as_path())
    }

    /// Rendered content for `path`, if it is part of the set.
    #[must_use]
    pub fn content(&self, path: &Path) -> Option<&[u8]> {
        self.files
            .iter()
            .find(|(p, _)| p == path)
            .map(|(_, bytes)| bytes.as_slice())
    }

    /// Writes every rendered file.
    ///
    /// # Errors
    ///
    /// Returns [`AnalysisError::Io`] on the first file that cannot be
    /// written.
    pub fn write_all(&self) -> Result<(), AnalysisError> {
        for (path, bytes) in &self.files {
            std::fs::write(path, bytes)?;
            log::info!("Wrote {}", path.display());
        }
        Ok(())
    }
}

/// Renders every requested export of `run` into memory.
///
/// # Errors
///
/// Returns [`AnalysisError`] if any output fails to render. Nothing has
/// been written at that point.
pub fn render_outputs(
    run: &AnalysisRun,
    paths: &OutputPaths,
    area_name: &str,
    generated_at: NaiveDateTime,
    encoding: CsvEncoding,
) -> Result<OutputSet, AnalysisError> {
    let mut set = OutputSet::default();

    if let Some(path) = &paths.report {
        let report = render_report(run, area_name, generated_at, true);
        set.files.push((path.clone(), report.into_bytes()));
    }
    if let Some(path) = &paths.csv {
        set.files.push((path.clone(), render_csv(run, encoding)?));
        log::debug!("Rendered CSV ({encoding})");
    }
    if let Some(path) = &paths.json {
        set.files.push((path.clone(), serde_json::to_vec_pretty(run)?));
    }
    if let Some(path) = &paths.geojson {
        let feature = region_feature(run);
        set.files.push((path.clone(), serde_json::to_vec_pretty(&feature)?));
    }

    Ok(set)
}
