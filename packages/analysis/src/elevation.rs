//! Vegetation change broken down by terrain elevation.

use sprawl_analysis_models::{ElevationZoneChange, config::ReductionConfig};
use sprawl_oracle::Oracle;
use sprawl_oracle_models::{CompositeHandle, ImageExpr, Reducer};
use sprawl_region_models::RegionOfInterest;

use crate::{
    AnalysisError,
    change::difference_image,
    indices::SpectralIndex,
    zonal::{self, Zone},
};

/// Number of equal-width elevation bands.
pub const ZONE_COUNT: usize = 4;

/// One elevation band, `[min_m, max_m)` or `[min_m, max_m]` for the top one.
#[derive(Debug, Clone, PartialEq)]
pub struct ElevationZone {
    /// Lower bound in metres.
    pub min_m: f64,
    /// Upper bound in metres.
    pub max_m: f64,
    /// Whether `max_m` itself belongs to the zone.
    pub closed: bool,
}

impl ElevationZone {
    /// Label such as `elevation_100-250m`, with bounds truncated to whole
    /// metres.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn label(&self) -> String {
        format!(
            "elevation_{}-{}m",
            self.min_m.trunc() as i64,
            self.max_m.trunc() as i64
        )
    }

    /// Whether an elevation falls in the zone.
    #[must_use]
    pub fn contains(&self, elevation_m: f64) -> bool {
        elevation_m >= self.min_m
            && (elevation_m < self.max_m || (self.closed && elevation_m <= self.max_m))
    }

    /// The zone as a 0/1 image over the terrain model.
    #[must_use]
    pub fn mask(&self) -> ImageExpr {
        let below = if self.closed {
            ImageExpr::Elevation.lte(self.max_m)
        } else {
            ImageExpr::Elevation.lt(self.max_m)
        };
        ImageExpr::Elevation.gte(self.min_m).and(below)
    }
}

/// Splits `[min_m, max_m]` into [`ZONE_COUNT`] equal-width zones.
#[must_use]
#[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
pub fn elevation_zones(min_m: f64, max_m: f64) -> Vec<ElevationZone> {
    let width = (max_m - min_m) / ZONE_COUNT as f64;
    (0..ZONE_COUNT)
        .map(|k| {
            let last = k + 1 == ZONE_COUNT;
            ElevationZone {
                min_m: min_m + k as f64 * width,
                max_m: if last {
                    max_m
                } else {
                    min_m + (k + 1) as f64 * width
                },
                closed: last,
            }
        })
        .collect()
}

/// Mean and standard deviation of the vegetation index difference inside
/// each elevation zone of the region.
///
/// Returns no zones when the region has no elevation data.
///
/// # Errors
///
/// Returns [`AnalysisError`] if any reduction fails.
pub async fn elevation_change<O: Oracle + ?Sized>(
    oracle: &O,
    earlier: &CompositeHandle,
    later: &CompositeHandle,
    region: &RegionOfInterest,
    reduction: &ReductionConfig,
) -> Result<Vec<ElevationZoneChange>, AnalysisError> {
    let zone = Zone::area(region, reduction);

    let (Some(min_m), Some(max_m)) = zonal::min_max(oracle, ImageExpr::Elevation, zone).await?
    else {
        log::warn!("No elevation data over the region; skipping elevation zones");
        return Ok(Vec::new());
    };
    log::debug!("Elevation range {min_m:.1}..{max_m:.1} m");

    let difference = difference_image(SpectralIndex::Ndvi, earlier, later);
    let mut changes = Vec::with_capacity(ZONE_COUNT);

    for band in elevation_zones(min_m, max_m) {
        let masked = difference.clone().update_mask(band.mask());
        let mean_change = zonal::scalar(oracle, masked.clone(), zone, Reducer::Mean).await?;
        let std_dev_change = zonal::scalar(oracle, masked, zone, Reducer::StdDev).await?;

        changes.push(ElevationZoneChange {
            label: band.label(),
            min_m: band.min_m,
            max_m: band.max_m,
            mean_change,
            std_dev_change,
        });
    }

    Ok(changes)
}

#[cfg(test)]
mod tests {
    use sprawl_oracle::memory::BandValues;

    use super::*;
    use crate::testing::{self, Reflectance};

    #[test]
    fn zones_tile_the_range() {
        let zones = elevation_zones(100.0, 500.0);
        assert_eq!(zones.len(), 4);
        assert_eq!(zones[0].label(), "elevation_100-200m");
        assert_eq!(zones[3].label(), "elevation_400-500m");

        for elevation in [100.0, 199.9, 200.0, 350.0, 499.0, 500.0] {
            let hits = zones.iter().filter(|z| z.contains(elevation)).count();
            assert_eq!(hits, 1, "{elevation}");
        }
        assert!(!zones.iter().any(|z| z.contains(500.1)));
    }

    #[test]
    fn labels_truncate_fractional_bounds() {
        let zones = elevation_zones(10.7, 20.3);
        assert_eq!(zones[0].label(), "elevation_10-13m");
    }

    #[tokio::test]
    async fn change_per_zone() {
        // Low half of the grid loses vegetation, high half is unchanged.
        let elevation: Vec<Option<f64>> = (0..testing::PIXELS)
            .map(|i| Some(if i < 50 { 100.0 } else { 500.0 }))
            .collect();
        let later: Vec<Reflectance> = (0..testing::PIXELS)
            .map(|i| Reflectance::new(if i < 50 { 0.3 } else { 0.5 }, 0.0))
            .collect();
        let oracle = testing::oracle(
            vec![
                testing::uniform_scene(testing::START, Reflectance::new(0.5, 0.0)),
                testing::pixel_scene(testing::END, &later),
            ],
            Some(BandValues::Pixels(elevation)),
        );
        let earlier = testing::composite(&oracle, testing::START).await;
        let later = testing::composite(&oracle, testing::END).await;

        let zones = elevation_change(
            &oracle,
            &earlier,
            &later,
            &testing::region(),
            &ReductionConfig::default(),
        )
        .await
        .unwrap();

        assert_eq!(zones.len(), 4);
        assert!((zones[0].mean_change.unwrap() + 0.2).abs() < 1e-9);
        assert_eq!(zones[1].mean_change, None);
        assert_eq!(zones[2].mean_change, None);
        assert!(zones[3].mean_change.unwrap().abs() < 1e-9);
        assert!(zones[3].std_dev_change.unwrap().abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_elevation_yields_no_zones() {
        let handle = CompositeHandle {
            id: "unused".to_string(),
            request: testing::request(testing::START),
        };
        let masked = Some(BandValues::Pixels(vec![None; testing::PIXELS]));

        for oracle in [testing::oracle(Vec::new(), masked), testing::empty_oracle()] {
            let zones = elevation_change(
                &oracle,
                &handle,
                &handle,
                &testing::region(),
                &ReductionConfig::default(),
            )
            .await
            .unwrap();
            assert!(zones.is_empty());
            assert_eq!(oracle.calls().len(), 1);
        }
    }
}
