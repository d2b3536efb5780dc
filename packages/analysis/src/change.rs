//! Change detection between two composites.
//!
//! Index differences are bucketed into loss, stable, and gain at a
//! symmetric threshold; the stable bucket includes both boundaries so the
//! three buckets cover every unmasked pixel exactly once.

use sprawl_analysis_models::{
    ChangeMatrix, ConservationPriority, DifferenceStats, IndexChange, LandCoverClass,
    config::{ReductionConfig, ThresholdConfig},
};
use sprawl_oracle::Oracle;
use sprawl_oracle_models::{CompositeHandle, ImageExpr, Reducer};
use sprawl_region_models::RegionOfInterest;
use strum_macros::{AsRefStr, Display};

use crate::{
    AnalysisError,
    classify::classification_image,
    indices::SpectralIndex,
    zonal::{self, Zone},
};

/// Direction of a per-pixel index change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ChangeBucket {
    /// Fell by more than the threshold.
    Loss,
    /// Within the threshold, boundaries included.
    Stable,
    /// Rose by more than the threshold.
    Gain,
}

impl ChangeBucket {
    /// All buckets.
    pub const ALL: [Self; 3] = [Self::Loss, Self::Stable, Self::Gain];

    /// Pixels of `difference` that fall in this bucket, as a 0/1 image.
    #[must_use]
    pub fn mask(self, difference: ImageExpr, threshold: f64) -> ImageExpr {
        match self {
            Self::Loss => difference.lt(-threshold),
            Self::Stable => difference.abs().lte(threshold),
            Self::Gain => difference.gt(threshold),
        }
    }
}

/// Bucket of one difference value.
#[must_use]
pub fn bucket(difference: f64, threshold: f64) -> ChangeBucket {
    if difference < -threshold {
        ChangeBucket::Loss
    } else if difference > threshold {
        ChangeBucket::Gain
    } else {
        ChangeBucket::Stable
    }
}

/// `later - earlier` of an index.
#[must_use]
pub fn difference_image(
    index: SpectralIndex,
    earlier: &CompositeHandle,
    later: &CompositeHandle,
) -> ImageExpr {
    index.image(later).subtract(index.image(earlier))
}

/// Loss/gain/stable areas and difference statistics of an index.
///
/// # Errors
///
/// Returns [`AnalysisError`] if any reduction fails.
pub async fn index_change<O: Oracle + ?Sized>(
    oracle: &O,
    index: SpectralIndex,
    earlier: &CompositeHandle,
    later: &CompositeHandle,
    region: &RegionOfInterest,
    thresholds: &ThresholdConfig,
    reduction: &ReductionConfig,
) -> Result<IndexChange, AnalysisError> {
    let difference = difference_image(index, earlier, later);
    let zone = Zone::area(region, reduction);

    let mean = zonal::scalar(oracle, difference.clone(), zone, Reducer::Mean).await?;
    let std_dev = zonal::scalar(oracle, difference.clone(), zone, Reducer::StdDev).await?;
    let (min, max) = zonal::min_max(oracle, difference.clone(), zone).await?;

    let mut areas = [0.0; 3];
    for (area, bucket) in areas.iter_mut().zip(ChangeBucket::ALL) {
        *area = zonal::masked_area_km2(
            oracle,
            bucket.mask(difference.clone(), thresholds.change),
            zone,
        )
        .await?;
    }
    let [loss, stable, gain] = areas;

    let change = IndexChange::from_areas(
        loss,
        gain,
        stable,
        DifferenceStats {
            mean,
            std_dev,
            min,
            max,
        },
    );
    log::info!(
        "{index} change: loss {loss:.4} km², gain {gain:.4} km², stable {stable:.4} km²"
    );

    Ok(change)
}

/// Priority from the whole-region mean vegetation and built-up deltas.
///
/// High when vegetation fell and built-up rose, both by more than
/// `significant`; Medium when both merely moved that way.
#[must_use]
pub fn conservation_priority(
    vegetation_delta: Option<f64>,
    built_up_delta: Option<f64>,
    significant: f64,
) -> ConservationPriority {
    let (Some(dv), Some(db)) = (vegetation_delta, built_up_delta) else {
        return ConservationPriority::Unknown;
    };

    if dv < -significant && db > significant {
        ConservationPriority::High
    } else if dv < 0.0 && db > 0.0 {
        ConservationPriority::Medium
    } else {
        ConservationPriority::Low
    }
}

/// Area that moved between each pair of classes.
///
/// Issues one area reduction per ordered class pair.
///
/// # Errors
///
/// Returns [`AnalysisError`] if any reduction fails.
#[allow(clippy::cast_precision_loss)]
pub async fn change_matrix<O: Oracle + ?Sized>(
    oracle: &O,
    earlier: &CompositeHandle,
    later: &CompositeHandle,
    region: &RegionOfInterest,
    thresholds: &ThresholdConfig,
    reduction: &ReductionConfig,
) -> Result<ChangeMatrix, AnalysisError> {
    let before = classification_image(earlier, thresholds);
    let after = classification_image(later, thresholds);
    let zone = Zone::area(region, reduction);

    let mut matrix = ChangeMatrix::default();
    for from in LandCoverClass::ALL {
        for to in LandCoverClass::ALL {
            let transition = before
                .clone()
                .equals(from.id() as f64)
                .and(after.clone().equals(to.id() as f64));
            let area = zonal::masked_area_km2(oracle, transition, zone).await?;
            log::trace!("{from} -> {to}: {area:.4} km²");
            matrix.cells[from.index()][to.index()] = area;
        }
    }

    log::debug!(
        "Change matrix: {:.4} of {:.4} km² unchanged",
        matrix.unchanged(),
        matrix.total()
    );

    Ok(matrix)
}
