//! Normalized difference spectral indices.
//!
//! Each index is `(a - b) / (a + b)` over two reflectance bands. A zero
//! denominator masks the pixel instead of failing, so the result is always
//! within `[-1, 1]` for non-negative reflectances. Cover fractions rescale
//! an index linearly into `[0, 1]`.

use sprawl_analysis_models::config::ReductionConfig;
use sprawl_oracle::Oracle;
use sprawl_oracle_models::{Band, CompositeHandle, ImageExpr, Reducer};
use sprawl_region_models::RegionOfInterest;
use strum_macros::{AsRefStr, Display};

use crate::{
    AnalysisError,
    zonal::{self, Zone},
};

/// Indices used by the classifier and change detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum SpectralIndex {
    /// Normalized Difference Vegetation Index, `(nir - red) / (nir + red)`.
    Ndvi,
    /// Normalized Difference Built-up Index, `(swir - nir) / (swir + nir)`.
    Ndbi,
    /// Modified Normalized Difference Water Index,
    /// `(green - swir) / (green + swir)`.
    Mndwi,
}

impl SpectralIndex {
    /// The `(positive, negative)` band pair.
    #[must_use]
    pub const fn bands(self) -> (Band, Band) {
        match self {
            Self::Ndvi => (Band::Nir, Band::Red),
            Self::Ndbi => (Band::Swir, Band::Nir),
            Self::Mndwi => (Band::Green, Band::Swir),
        }
    }

    /// The index as an image over a composite.
    #[must_use]
    pub fn image(self, composite: &CompositeHandle) -> ImageExpr {
        let (positive, negative) = self.bands();
        ImageExpr::normalized_difference(composite, positive, negative)
    }

    /// The index for one pixel's reflectances.
    #[must_use]
    pub fn compute(self, positive: f64, negative: f64) -> Option<f64> {
        normalized_difference(positive, negative)
    }
}

/// `(a - b) / (a + b)`, or `None` when the sum is zero or an input is not
/// finite.
#[must_use]
#[allow(clippy::float_cmp)]
pub fn normalized_difference(a: f64, b: f64) -> Option<f64> {
    let sum = a + b;
    if !a.is_finite() || !b.is_finite() || sum == 0.0 {
        return None;
    }
    Some((a - b) / sum)
}

/// Fractional vegetation cover, `clamp((ndvi - 0.1) / 0.6, 0, 1)`.
#[must_use]
pub fn vegetation_fraction(ndvi: ImageExpr) -> ImageExpr {
    ndvi.subtract(0.1).divide(0.6).clamp(0.0, 1.0)
}

/// Fractional impervious cover, `clamp((ndbi + 0.5) / 0.5, 0, 1)`.
#[must_use]
pub fn impervious_fraction(ndbi: ImageExpr) -> ImageExpr {
    ndbi.plus(0.5).divide(0.5).clamp(0.0, 1.0)
}

/// Cover fractions estimated from a spectral index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum CoverFraction {
    /// Vegetation cover, from NDVI.
    Vegetation,
    /// Impervious surface cover, from NDBI.
    Impervious,
}

impl CoverFraction {
    /// The fraction as an image over a composite.
    #[must_use]
    pub fn image(self, composite: &CompositeHandle) -> ImageExpr {
        match self {
            Self::Vegetation => vegetation_fraction(SpectralIndex::Ndvi.image(composite)),
            Self::Impervious => impervious_fraction(SpectralIndex::Ndbi.image(composite)),
        }
    }
}

async fn region_mean<O: Oracle + ?Sized>(
    oracle: &O,
    image: ImageExpr,
    label: &str,
    composite: &CompositeHandle,
    region: &RegionOfInterest,
    reduction: &ReductionConfig,
) -> Result<Option<f64>, AnalysisError> {
    let mean = zonal::scalar(oracle, image, Zone::mean(region, reduction), Reducer::Mean).await?;

    match mean {
        Some(value) => log::debug!("Mean {label} over {}: {value:.4}", composite.id),
        None => log::warn!("Mean {label} over {} has no unmasked pixels", composite.id),
    }

    Ok(mean)
}

/// Mean of an index over the region; `None` if every pixel was masked.
///
/// # Errors
///
/// Returns [`AnalysisError`] if the reduction fails.
pub async fn mean_index<O: Oracle + ?Sized>(
    oracle: &O,
    composite: &CompositeHandle,
    index: SpectralIndex,
    region: &RegionOfInterest,
    reduction: &ReductionConfig,
) -> Result<Option<f64>, AnalysisError> {
    let image = index.image(composite);
    region_mean(oracle, image, index.as_ref(), composite, region, reduction).await
}

/// Mean cover fraction over the region; `None` if every pixel was masked.
///
/// # Errors
///
/// Returns [`AnalysisError`] if the reduction fails.
pub async fn mean_fraction<O: Oracle + ?Sized>(
    oracle: &O,
    composite: &CompositeHandle,
    fraction: CoverFraction,
    region: &RegionOfInterest,
    reduction: &ReductionConfig,
) -> Result<Option<f64>, AnalysisError> {
    let image = fraction.image(composite);
    let label = format!("{fraction} fraction");
    region_mean(oracle, image, &label, composite, region, reduction).await
}

#[cfg(test)]
mod tests {
    use sprawl_oracle::memory::Scene;

    use super::*;
    use crate::testing;

    #[test]
    fn index_values_stay_in_unit_range() {
        let reflectances = [0.0, 0.01, 0.05, 0.2, 0.35, 0.5, 0.9, 1.0, 1500.0, 3000.0];
        for a in reflectances {
            for b in reflectances {
                if let Some(v) = normalized_difference(a, b) {
                    assert!((-1.0..=1.0).contains(&v), "{a}, {b} -> {v}");
                }
            }
        }
    }

    #[test]
    fn zero_denominator_is_masked() {
        assert_eq!(normalized_difference(0.0, 0.0), None);
        assert_eq!(normalized_difference(f64::NAN, 0.3), None);
    }

    #[test]
    fn band_pairs() {
        assert_eq!(SpectralIndex::Ndvi.bands(), (Band::Nir, Band::Red));
        assert_eq!(SpectralIndex::Ndbi.bands(), (Band::Swir, Band::Nir));
        assert_eq!(SpectralIndex::Mndwi.bands(), (Band::Green, Band::Swir));
        assert!((SpectralIndex::Ndvi.compute(0.7, 0.3).unwrap() - 0.4).abs() < 1e-12);
        assert_eq!(SpectralIndex::Ndvi.to_string(), "NDVI");
    }

    async fn constant_mean(image: ImageExpr) -> f64 {
        let oracle = testing::empty_oracle();
        let region = testing::region();
        let zone = Zone::mean(&region, &ReductionConfig::default());
        zonal::scalar(&oracle, image, zone, Reducer::Mean)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn fractions_are_clamped() {
        let veg = constant_mean(vegetation_fraction(ImageExpr::constant(0.4))).await;
        assert!((veg - 0.5).abs() < 1e-9);

        let veg = constant_mean(vegetation_fraction(ImageExpr::constant(0.0))).await;
        assert!(veg.abs() < 1e-12);

        let impervious = constant_mean(impervious_fraction(ImageExpr::constant(0.6))).await;
        assert!((impervious - 1.0).abs() < 1e-12);
    }

    #[tokio::test]
    async fn mean_index_over_composite() {
        let oracle = testing::two_date_oracle(
            testing::Reflectance::new(0.40, 0.10),
            testing::Reflectance::new(0.30, 0.20),
        );
        let handle = testing::composite(&oracle, testing::START).await;

        let mean = mean_index(
            &oracle,
            &handle,
            SpectralIndex::Ndvi,
            &testing::region(),
            &ReductionConfig::default(),
        )
        .await
        .unwrap()
        .unwrap();
        assert!((mean - 0.40).abs() < 1e-9);
    }

    #[tokio::test]
    async fn mean_fractions_over_composite() {
        let oracle = testing::two_date_oracle(
            testing::Reflectance::new(0.40, -0.25),
            testing::Reflectance::new(0.30, 0.20),
        );
        let handle = testing::composite(&oracle, testing::START).await;
        let region = testing::region();
        let reduction = ReductionConfig::default();

        let vegetation =
            mean_fraction(&oracle, &handle, CoverFraction::Vegetation, &region, &reduction)
                .await
                .unwrap()
                .unwrap();
        assert!((vegetation - 0.5).abs() < 1e-9);

        let impervious =
            mean_fraction(&oracle, &handle, CoverFraction::Impervious, &region, &reduction)
                .await
                .unwrap()
                .unwrap();
        assert!((impervious - 0.5).abs() < 1e-9);
        assert_eq!(CoverFraction::Impervious.to_string(), "impervious");
    }

    #[tokio::test]
    async fn fraction_of_fully_masked_composite_is_none() {
        let scene = Scene::uniform(
            testing::date(testing::START),
            5.0,
            &[(Band::Nir, 0.0), (Band::Red, 0.0)],
        );
        let oracle = testing::oracle(vec![scene], None);
        let handle = testing::composite(&oracle, testing::START).await;

        let mean = mean_fraction(
            &oracle,
            &handle,
            CoverFraction::Vegetation,
            &testing::region(),
            &ReductionConfig::default(),
        )
        .await
        .unwrap();
        assert_eq!(mean, None);
    }
}
