#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Urban sprawl analysis over a remote sensing oracle.
//!
//! Spectral indices, the land-cover classification, and the change masks
//! are built as [`ImageExpr`](sprawl_oracle_models::ImageExpr) graphs and
//! reduced by an [`Oracle`](sprawl_oracle::Oracle). The [`pipeline`]
//! module ties the steps into one run; [`report`] and [`export`] turn the
//! resulting [`AnalysisRun`](sprawl_analysis_models::AnalysisRun) into
//! Markdown, CSV, JSON, and `GeoJSON`.

pub mod acquire;
pub mod change;
pub mod classify;
pub mod elevation;
pub mod export;
pub mod indices;
pub mod pipeline;
pub mod progress;
pub mod report;
#[cfg(test)]
mod testing;
pub mod zonal;

use chrono::NaiveDate;
use sprawl_analysis_models::ConfigError;
use sprawl_oracle::OracleError;
use sprawl_region_models::RegionError;

/// What the user is told when the imagery service fails; the underlying
/// error is logged instead.
pub const ORACLE_FAILURE_MESSAGE: &str = "Analysis failed: the imagery service could not \
     complete the request. Check your connection and credentials and try again";

/// Errors that can occur during an analysis run.
#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    /// The region or dates were invalid.
    #[error(transparent)]
    Region(#[from] RegionError),

    /// The configuration was invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// An oracle call failed.
    #[error("Oracle request failed: {0}")]
    Oracle(#[from] OracleError),

    /// No scenes matched even after widening the date window.
    #[error("No images found between {start} and {end}; try a different area or time period")]
    NoImagesFound {
        /// Start of the widened window.
        start: NaiveDate,
        /// End of the widened window.
        end: NaiveDate,
    },

    /// An availability query asked for a year range that runs backwards
    /// or leaves the calendar.
    #[error("Invalid year range {start}..={end}")]
    InvalidYearRange {
        /// First year.
        start: i32,
        /// Last year.
        end: i32,
    },

    /// The oracle returned a result of the wrong shape.
    #[error("Unexpected {reducer} result: {message}")]
    UnexpectedResult {
        /// Reducer that was requested.
        reducer: String,
        /// What came back instead.
        message: String,
    },

    /// CSV writing failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON rendering failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// File I/O failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalysisError {
    /// The message shown to the user. Oracle failures are replaced by
    /// [`ORACLE_FAILURE_MESSAGE`] so service details stay in the log.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::Oracle(_) => ORACLE_FAILURE_MESSAGE.to_string(),
            other => other.to_string(),
        }
    }
}
