//! Threshold land-cover classification.
//!
//! A pixel is vegetation if its NDVI exceeds the vegetation threshold,
//! otherwise built-up if its NDBI exceeds the built-up threshold,
//! otherwise water if its MNDWI exceeds the water threshold, otherwise
//! bare soil. A masked index value fails its test.

use std::collections::BTreeMap;

use sprawl_analysis_models::{
    ClassBreakdown, ClassStatistics, LandCoverClass,
    config::{ReductionConfig, ThresholdConfig},
};
use sprawl_oracle::Oracle;
use sprawl_oracle_models::{CompositeHandle, ImageExpr, Visualization};
use sprawl_region_models::RegionOfInterest;

use crate::{
    AnalysisError,
    indices::SpectralIndex,
    zonal::{self, M2_PER_KM2, Zone},
};

/// Class of a single pixel from its three index values.
#[must_use]
pub fn classify_pixel(
    ndvi: Option<f64>,
    ndbi: Option<f64>,
    mndwi: Option<f64>,
    thresholds: &ThresholdConfig,
) -> LandCoverClass {
    let exceeds = |value: Option<f64>, threshold: f64| value.is_some_and(|v| v > threshold);

    if exceeds(ndvi, thresholds.vegetation) {
        LandCoverClass::Vegetation
    } else if exceeds(ndbi, thresholds.built_up) {
        LandCoverClass::BuiltUp
    } else if exceeds(mndwi, thresholds.water) {
        LandCoverClass::Water
    } else {
        LandCoverClass::BareSoil
    }
}

/// Classified image of a composite; pixel values are
/// [`LandCoverClass::id`].
///
/// Replacements run from lowest to highest priority so the vegetation
/// test is applied last and wins.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn classification_image(
    composite: &CompositeHandle,
    thresholds: &ThresholdConfig,
) -> ImageExpr {
    let id = |class: LandCoverClass| class.id() as f64;

    let labelled = ImageExpr::constant(0.0)
        .replace_where(
            SpectralIndex::Mndwi.image(composite).gt(thresholds.water),
            id(LandCoverClass::Water),
        )
        .replace_where(
            SpectralIndex::Ndbi.image(composite).gt(thresholds.built_up),
            id(LandCoverClass::BuiltUp),
        )
        .replace_where(
            SpectralIndex::Ndvi.image(composite).gt(thresholds.vegetation),
            id(LandCoverClass::Vegetation),
        );

    labelled
        .clone()
        .replace_where(labelled.equals(0.0), id(LandCoverClass::BareSoil))
}

/// Renders class ids through the legend colours, one palette entry per
/// class in id order.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn classification_visualization() -> Visualization {
    let ids = LandCoverClass::ALL.map(LandCoverClass::id);
    Visualization {
        min: ids[0] as f64,
        max: ids[ids.len() - 1] as f64,
        gamma: None,
        palette: LandCoverClass::ALL
            .iter()
            .map(|class| class.color().to_string())
            .collect(),
    }
}

/// Per-class statistics from a class histogram sampled at `scale` metres.
///
/// Classes missing from the histogram report zero. Keys that are not a
/// class id are ignored.
#[must_use]
pub fn class_breakdown(counts: &BTreeMap<i64, f64>, scale: f64) -> ClassBreakdown {
    for (key, count) in counts {
        if LandCoverClass::from_id(*key).is_none() {
            log::warn!("Ignoring {count} pixels with unknown class value {key}");
        }
    }

    let count_of = |class: LandCoverClass| counts.get(&class.id()).copied().unwrap_or(0.0);
    let total: f64 = LandCoverClass::ALL.iter().map(|c| count_of(*c)).sum();

    let classes = LandCoverClass::ALL
        .iter()
        .map(|class| {
            let pixel_count = count_of(*class);
            ClassStatistics {
                class: *class,
                pixel_count,
                area_km2: pixel_count * scale * scale / M2_PER_KM2,
                percentage: if total > 0.0 {
                    pixel_count / total * 100.0
                } else {
                    0.0
                },
            }
        })
        .collect();

    ClassBreakdown { classes }
}

/// Classifies a composite and reduces it to per-class statistics.
///
/// # Errors
///
/// Returns [`AnalysisError`] if the histogram reduction fails.
pub async fn class_statistics<O: Oracle + ?Sized>(
    oracle: &O,
    composite: &CompositeHandle,
    region: &RegionOfInterest,
    thresholds: &ThresholdConfig,
    reduction: &ReductionConfig,
) -> Result<ClassBreakdown, AnalysisError> {
    let counts = zonal::histogram(
        oracle,
        classification_image(composite, thresholds),
        Zone::area(region, reduction),
    )
    .await?;

    let breakdown = class_breakdown(&counts, reduction.scale);
    log::debug!(
        "Classified {} pixels of {}, dominant class {:?}",
        breakdown.total_pixels(),
        composite.id,
        breakdown.dominant()
    );

    Ok(breakdown)
}
