//! Typed wrappers around single oracle reductions.
//!
//! Each helper issues exactly one [`Oracle::reduce`] call and checks that
//! the result has the shape its reducer produces.

use std::collections::BTreeMap;

use sprawl_analysis_models::config::ReductionConfig;
use sprawl_oracle::Oracle;
use sprawl_oracle_models::{ImageExpr, ReduceRequest, ReductionResult, Reducer};
use sprawl_region_models::RegionOfInterest;

use crate::AnalysisError;

/// Square metres per square kilometre.
pub const M2_PER_KM2: f64 = 1e6;

/// Where and how finely to reduce.
#[derive(Debug, Clone, Copy)]
pub struct Zone<'a> {
    /// Region to reduce over.
    pub region: &'a RegionOfInterest,
    /// Sampling resolution in metres.
    pub scale: f64,
    /// Pixel ceiling.
    pub max_pixels: f64,
}

impl<'a> Zone<'a> {
    /// Zone for area and histogram reductions.
    #[must_use]
    pub const fn area(region: &'a RegionOfInterest, reduction: &ReductionConfig) -> Self {
        Self {
            region,
            scale: reduction.scale,
            max_pixels: reduction.max_pixels,
        }
    }

    /// Zone for whole-region index means.
    #[must_use]
    pub const fn mean(region: &'a RegionOfInterest, reduction: &ReductionConfig) -> Self {
        Self {
            region,
            scale: reduction.scale,
            max_pixels: reduction.mean_max_pixels,
        }
    }
}

async fn reduce<O: Oracle + ?Sized>(
    oracle: &O,
    image: ImageExpr,
    zone: Zone<'_>,
    reducer: Reducer,
) -> Result<ReductionResult, AnalysisError> {
    log::trace!("Reducing with {reducer} at {} m", zone.scale);

    Ok(oracle
        .reduce(&ReduceRequest {
            image,
            region: zone.region.clone(),
            reducer,
            scale: zone.scale,
            max_pixels: zone.max_pixels,
        })
        .await?)
}

fn unexpected(reducer: Reducer, result: &ReductionResult) -> AnalysisError {
    AnalysisError::UnexpectedResult {
        reducer: reducer.to_string(),
        message: format!("{result:?}"),
    }
}

/// Reduces to one value; `None` when no unmasked pixel was reduced.
///
/// # Errors
///
/// Returns [`AnalysisError`] if the oracle call fails or returns a
/// non-scalar result.
pub async fn scalar<O: Oracle + ?Sized>(
    oracle: &O,
    image: ImageExpr,
    zone: Zone<'_>,
    reducer: Reducer,
) -> Result<Option<f64>, AnalysisError> {
    match reduce(oracle, image, zone, reducer).await? {
        ReductionResult::Scalar { value } => Ok(value),
        other => Err(unexpected(reducer, &other)),
    }
}

/// Reduces to `(min, max)`, either side `None` when nothing was reduced.
///
/// # Errors
///
/// Returns [`AnalysisError`] if the oracle call fails or returns a
/// non-range result.
pub async fn min_max<O: Oracle + ?Sized>(
    oracle: &O,
    image: ImageExpr,
    zone: Zone<'_>,
) -> Result<(Option<f64>, Option<f64>), AnalysisError> {
    match reduce(oracle, image, zone, Reducer::MinMax).await? {
        ReductionResult::Range { min, max } => Ok((min, max)),
        other => Err(unexpected(Reducer::MinMax, &other)),
    }
}

/// Counts pixels per integer value.
///
/// # Errors
///
/// Returns [`AnalysisError`] if the oracle call fails or returns a
/// non-histogram result.
pub async fn histogram<O: Oracle + ?Sized>(
    oracle: &O,
    image: ImageExpr,
    zone: Zone<'_>,
) -> Result<BTreeMap<i64, f64>, AnalysisError> {
    match reduce(oracle, image, zone, Reducer::FrequencyHistogram).await? {
        ReductionResult::Histogram { counts } => Ok(counts),
        other => Err(unexpected(Reducer::FrequencyHistogram, &other)),
    }
}

/// Area in km² of the pixels where `mask` is non-zero.
///
/// # Errors
///
/// Returns [`AnalysisError`] if the oracle call fails.
pub async fn masked_area_km2<O: Oracle + ?Sized>(
    oracle: &O,
    mask: ImageExpr,
    zone: Zone<'_>,
) -> Result<f64, AnalysisError> {
    let area_m2 = scalar(
        oracle,
        mask.multiply(ImageExpr::PixelArea),
        zone,
        Reducer::Sum,
    )
    .await?;
    Ok(area_m2.unwrap_or(0.0) / M2_PER_KM2)
}
