//! One analysis run from region and period to [`AnalysisRun`].
//!
//! Every oracle call is awaited before the next is issued.

use std::sync::Arc;

use sprawl_analysis_models::{
    AnalysisConfig, AnalysisRun, ChangeRecord, ClassificationComparison, YearAvailability,
};
use sprawl_oracle::Oracle;
use sprawl_oracle_models::{
    Band, CompositeHandle, CompositeRequest, ThumbnailRequest, ThumbnailSource, Visualization,
};
use sprawl_region_models::{DateWindow, RegionOfInterest, TimePeriod};

use crate::{
    AnalysisError,
    acquire::acquire_composite,
    change::{change_matrix, conservation_priority, index_change},
    classify::{class_statistics, classification_image, classification_visualization},
    elevation::elevation_change,
    indices::{CoverFraction, SpectralIndex, mean_fraction, mean_index},
    progress::{ProgressCallback, null_progress},
};

/// Optional stages of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AnalysisOptions {
    /// Classify both composites and report per-class statistics.
    pub classify: bool,
    /// Compute the 4×4 class transition matrix.
    pub change_matrix: bool,
    /// Break vegetation change down by elevation.
    pub elevation: bool,
}

impl AnalysisOptions {
    /// Every optional stage enabled.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            classify: true,
            change_matrix: true,
            elevation: true,
        }
    }

    fn steps(self) -> u64 {
        6 + u64::from(self.classify) + u64::from(self.change_matrix) + u64::from(self.elevation)
    }
}

/// Runs analyses against one oracle with one configuration.
pub struct Analyzer<'a, O: Oracle + ?Sized> {
    oracle: &'a O,
    config: &'a AnalysisConfig,
    progress: Arc<dyn ProgressCallback>,
}

impl<'a, O: Oracle + ?Sized> Analyzer<'a, O> {
    /// An analyzer that reports no progress.
    #[must_use]
    pub fn new(oracle: &'a O, config: &'a AnalysisConfig) -> Self {
        Self {
            oracle,
            config,
            progress: null_progress(),
        }
    }

    /// Reports step progress to `progress`.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressCallback>) -> Self {
        self.progress = progress;
        self
    }

    fn composite_request(&self, region: &RegionOfInterest, window: DateWindow) -> CompositeRequest {
        let imagery = &self.config.imagery;
        CompositeRequest {
            region: region.clone(),
            window,
            cloud_ceiling: imagery.cloud_ceiling,
            sensor: imagery.sensor,
            method: imagery.composite_method,
            cloud_mask: imagery.cloud_mask,
        }
    }

    fn step(&self, message: &str) {
        log::info!("{message}");
        self.progress.set_message(message.to_string());
    }

    async fn thumbnail(
        &self,
        source: ThumbnailSource,
        visualization: Visualization,
        region: &RegionOfInterest,
    ) -> Result<String, AnalysisError> {
        let url = self
            .oracle
            .thumbnail_url(&ThumbnailRequest {
                source,
                region: region.clone(),
                dimensions: self.config.thumbnail.dimensions,
                visualization,
            })
            .await?;
        Ok(url)
    }

    async fn true_colour_thumbnail(
        &self,
        composite: &CompositeHandle,
        region: &RegionOfInterest,
    ) -> Result<String, AnalysisError> {
        let thumbnail = &self.config.thumbnail;
        let source = ThumbnailSource::Composite {
            composite: composite.clone(),
            bands: Band::RGB,
        };
        let visualization = Visualization {
            min: thumbnail.min,
            max: thumbnail.max,
            gamma: Some(thumbnail.gamma),
            palette: Vec::new(),
        };
        let url = self.thumbnail(source, visualization, region).await?;
        log::debug!("Thumbnail for {}: {url}", composite.id);
        Ok(url)
    }

    async fn classification_thumbnail(
        &self,
        composite: &CompositeHandle,
        region: &RegionOfInterest,
    ) -> Result<String, AnalysisError> {
        let source = ThumbnailSource::Expression {
            image: classification_image(composite, &self.config.thresholds),
        };
        let url = self
            .thumbnail(source, classification_visualization(), region)
            .await?;
        log::debug!("Classification thumbnail for {}: {url}", composite.id);
        Ok(url)
    }

    /// Runs the analysis.
    ///
    /// # Errors
    ///
    /// * [`AnalysisError::Config`] if the configuration is invalid, before
    ///   any oracle call
    /// * [`AnalysisError::Region`] if a query window leaves the calendar
    /// * [`AnalysisError::NoImagesFound`] if either endpoint has no imagery
    ///   even after widening its window
    /// * [`AnalysisError::Oracle`] if an oracle call fails
    pub async fn run(
        &self,
        region: &RegionOfInterest,
        period: TimePeriod,
        options: AnalysisOptions,
    ) -> Result<AnalysisRun, AnalysisError> {
        self.config.validate()?;

        let imagery = &self.config.imagery;
        let thresholds = &self.config.thresholds;
        let reduction = &self.config.reduction;

        log::info!(
            "Analysing {} region from {period} with {}",
            region.kind(),
            imagery.sensor
        );
        let start_window = period.start_window(imagery.window_days)?;
        let end_window = period.end_window(imagery.window_days)?;
        self.progress.set_total(options.steps());

        self.step("Fetching start composite");
        let start = acquire_composite(
            self.oracle,
            &self.composite_request(region, start_window),
            imagery.fallback_margin_days,
        )
        .await?;
        self.progress.inc(1);

        self.step("Fetching end composite");
        let end = acquire_composite(
            self.oracle,
            &self.composite_request(region, end_window),
            imagery.fallback_margin_days,
        )
        .await?;
        self.progress.inc(1);

        self.step("Rendering thumbnails");
        let start_thumbnail_url = self.true_colour_thumbnail(&start.handle, region).await?;
        let end_thumbnail_url = self.true_colour_thumbnail(&end.handle, region).await?;
        self.progress.inc(1);

        self.step("Computing mean indices");
        let mut means = [None; 4];
        for (mean, (index, composite)) in means.iter_mut().zip([
            (SpectralIndex::Ndvi, &start.handle),
            (SpectralIndex::Ndvi, &end.handle),
            (SpectralIndex::Ndbi, &start.handle),
            (SpectralIndex::Ndbi, &end.handle),
        ]) {
            *mean = mean_index(self.oracle, composite, index, region, reduction).await?;
        }
        let [ndvi_start, ndvi_end, ndbi_start, ndbi_end] = means;
        let vegetation = ChangeRecord::new(ndvi_start, ndvi_end);
        let built_up = ChangeRecord::new(ndbi_start, ndbi_end);

        let mut fractions = [None; 4];
        for (mean, (fraction, composite)) in fractions.iter_mut().zip([
            (CoverFraction::Vegetation, &start.handle),
            (CoverFraction::Vegetation, &end.handle),
            (CoverFraction::Impervious, &start.handle),
            (CoverFraction::Impervious, &end.handle),
        ]) {
            *mean = mean_fraction(self.oracle, composite, fraction, region, reduction).await?;
        }
        let [vegetation_start, vegetation_end, impervious_start, impervious_end] = fractions;
        let vegetation_fraction = ChangeRecord::new(vegetation_start, vegetation_end);
        let impervious_fraction = ChangeRecord::new(impervious_start, impervious_end);
        let priority =
            conservation_priority(vegetation.delta, built_up.delta, thresholds.priority_delta);
        log::info!("Conservation priority: {priority}");
        self.progress.inc(1);

        self.step("Detecting vegetation change");
        let vegetation_change = index_change(
            self.oracle,
            SpectralIndex::Ndvi,
            &start.handle,
            &end.handle,
            region,
            thresholds,
            reduction,
        )
        .await?;
        self.progress.inc(1);

        self.step("Detecting urban change");
        let urban_change = index_change(
            self.oracle,
            SpectralIndex::Ndbi,
            &start.handle,
            &end.handle,
            region,
            thresholds,
            reduction,
        )
        .await?;
        self.progress.inc(1);

        let classification = if options.classify {
            self.step("Classifying land cover");
            let earlier =
                class_statistics(self.oracle, &start.handle, region, thresholds, reduction).await?;
            let later =
                class_statistics(self.oracle, &end.handle, region, thresholds, reduction).await?;
            let earlier_thumbnail_url = self.classification_thumbnail(&start.handle, region).await?;
            let later_thumbnail_url = self.classification_thumbnail(&end.handle, region).await?;
            self.progress.inc(1);
            Some(ClassificationComparison {
                earlier,
                later,
                earlier_thumbnail_url,
                later_thumbnail_url,
            })
        } else {
            None
        };

        let change_matrix = if options.change_matrix {
            self.step("Computing class transitions");
            let matrix = change_matrix(
                self.oracle,
                &start.handle,
                &end.handle,
                region,
                thresholds,
                reduction,
            )
            .await?;
            self.progress.inc(1);
            Some(matrix)
        } else {
            None
        };

        let elevation_zones = if options.elevation {
            self.step("Analysing change by elevation");
            let zones =
                elevation_change(self.oracle, &start.handle, &end.handle, region, reduction).await?;
            self.progress.inc(1);
            Some(zones)
        } else {
            None
        };

        self.progress.finish(format!("Analysis complete: {priority} priority"));

        Ok(AnalysisRun {
            region: region.clone(),
            period,
            sensor: imagery.sensor,
            start_window: start.window,
            end_window: end.window,
            start_image_count: start.image_count,
            end_image_count: end.image_count,
            start_thumbnail_url,
            end_thumbnail_url,
            vegetation,
            built_up,
            vegetation_fraction,
            impervious_fraction,
            priority,
            vegetation_change,
            urban_change,
            classification,
            change_matrix,
            elevation_zones,
        })
    }

    /// Scene counts per calendar year from `start_year` to `end_year`
    /// inclusive.
    ///
    /// # Errors
    ///
    /// * [`AnalysisError::InvalidYearRange`] if the range is empty or a
    ///   year is outside the calendar
    /// * [`AnalysisError::Oracle`] if an oracle call fails
    pub async fn availability(
        &self,
        region: &RegionOfInterest,
        start_year: i32,
        end_year: i32,
    ) -> Result<Vec<YearAvailability>, AnalysisError> {
        self.config.validate()?;
        if start_year > end_year {
            return Err(AnalysisError::InvalidYearRange {
                start: start_year,
                end: end_year,
            });
        }

        let years = start_year..=end_year;
        self.progress
            .set_total(u64::try_from(years.clone().count()).unwrap_or(u64::MAX));

        let mut availability = Vec::new();
        for year in years {
            let window = DateWindow::year(year).ok_or(AnalysisError::InvalidYearRange {
                start: start_year,
                end: end_year,
            })?;
            self.progress.set_message(format!("Counting {year} scenes"));

            let image_count = self
                .oracle
                .image_count(&self.composite_request(region, window))
                .await?;
            if image_count == 0 {
                log::warn!("No images available for {year}");
            } else {
                log::info!("{year}: {image_count} images");
            }

            availability.push(YearAvailability {
                year,
                window,
                image_count,
            });
            self.progress.inc(1);
        }

        self.progress.finish(format!(
            "{} of {} years have imagery",
            availability.iter().filter(|y| y.available()).count(),
            availability.len()
        ));

        Ok(availability)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::NaiveDate;
    use sprawl_analysis_models::{ConservationPriority, LandCoverClass};
    use sprawl_oracle::memory::{BandValues, MemoryOracle, OracleCall};

    use super::*;
    use crate::{
        report::{render_report, summary_report},
        testing::{self, Reflectance},
    };

    #[derive(Default)]
    struct RecordingProgress {
        total: Mutex<u64>,
        done: Mutex<u64>,
        finished: Mutex<Option<String>>,
    }

    impl ProgressCallback for RecordingProgress {
        fn set_total(&self, total: u64) {
            *self.total.lock().unwrap() = total;
        }

        fn inc(&self, delta: u64) {
            *self.done.lock().unwrap() += delta;
        }

        fn set_message(&self, _msg: String) {}

        fn finish(&self, msg: String) {
            *self.finished.lock().unwrap() = Some(msg);
        }
    }

    fn default_oracle() -> MemoryOracle {
        testing::two_date_oracle(Reflectance::new(0.40, 0.10), Reflectance::new(0.30, 0.20))
    }

    #[tokio::test]
    async fn vegetation_loss_with_urban_growth_is_high_priority() {
        let oracle = default_oracle();
        let config = AnalysisConfig::default();

        let run = Analyzer::new(&oracle, &config)
            .run(&testing::region(), testing::period(), AnalysisOptions::default())
            .await
            .unwrap();

        assert_eq!(run.priority, ConservationPriority::High);
        assert!((run.vegetation.delta.unwrap() + 0.1).abs() < 1e-9);
        assert!((run.built_up.delta.unwrap() - 0.1).abs() < 1e-9);
        assert_eq!(run.start_image_count, 1);
        assert_eq!(run.end_image_count, 1);
        assert_eq!(run.start_thumbnail_url, "memory://thumbnails/1");
        assert_eq!(run.end_thumbnail_url, "memory://thumbnails/2");
        assert!((run.vegetation_change.total_km2() - 0.09).abs() < 1e-9);
        assert!(run.classification.is_none());

        assert!((run.vegetation_fraction.earlier.unwrap() - 0.5).abs() < 1e-9);
        assert!((run.vegetation_fraction.delta.unwrap() + 1.0 / 6.0).abs() < 1e-9);
        assert!((run.impervious_fraction.later.unwrap() - 1.0).abs() < 1e-9);
        assert!(run.impervious_fraction.delta.unwrap().abs() < 1e-9);

        let report = summary_report(&run.summary_metrics());
        assert!(report.contains("significant vegetation decline"));
        assert!(report.contains("significant urban expansion"));
        assert!(report.contains("**High**"));
    }

    #[tokio::test]
    async fn calls_are_sequential_and_ordered() {
        let oracle = default_oracle();
        let config = AnalysisConfig::default();

        Analyzer::new(&oracle, &config)
            .run(&testing::region(), testing::period(), AnalysisOptions::default())
            .await
            .unwrap();

        let calls = oracle.calls();
        let start = testing::request(testing::START).window;
        let end = testing::request(testing::END).window;
        assert_eq!(
            &calls[..6],
            &[
                OracleCall::ImageCount(start),
                OracleCall::Composite(start),
                OracleCall::ImageCount(end),
                OracleCall::Composite(end),
                OracleCall::Thumbnail,
                OracleCall::Thumbnail,
            ]
        );
        // Four index means and four fraction means, then mean, std dev,
        // min/max and three areas per index.
        assert_eq!(calls.len(), 6 + 8 + 2 * 6);
    }

    #[tokio::test]
    async fn optional_stages() {
        let oracle = testing::oracle(
            vec![
                testing::uniform_scene(testing::START, Reflectance::new(0.6, 0.0)),
                testing::uniform_scene(testing::END, Reflectance::new(0.1, 0.4)),
            ],
            Some(BandValues::Uniform(120.0)),
        );
        let config = AnalysisConfig::default();
        let progress = Arc::new(RecordingProgress::default());

        let run = Analyzer::new(&oracle, &config)
            .with_progress(progress.clone())
            .run(&testing::region(), testing::period(), AnalysisOptions::all())
            .await
            .unwrap();

        let classification = run.classification.unwrap();
        assert_eq!(classification.earlier.dominant(), Some(LandCoverClass::Vegetation));
        assert_eq!(classification.later.dominant(), Some(LandCoverClass::BuiltUp));
        assert_eq!(classification.earlier_thumbnail_url, "memory://thumbnails/3");
        assert_eq!(classification.later_thumbnail_url, "memory://thumbnails/4");

        let matrix = run.change_matrix.unwrap();
        let converted = matrix.area(LandCoverClass::Vegetation, LandCoverClass::BuiltUp);
        assert!((converted - 0.09).abs() < 1e-9);
        assert!(matrix.unchanged().abs() < 1e-12);

        let zones = run.elevation_zones.unwrap();
        assert_eq!(zones.len(), 4);
        assert_eq!(zones[3].label, "elevation_120-120m");
        assert!((zones[3].mean_change.unwrap() + 0.5).abs() < 1e-9);

        assert_eq!(*progress.total.lock().unwrap(), 9);
        assert_eq!(*progress.done.lock().unwrap(), 9);
        assert!(progress.finished.lock().unwrap().is_some());
    }

    #[tokio::test]
    async fn elevation_without_terrain_data_reports_no_zones() {
        let oracle = default_oracle();
        let config = AnalysisConfig::default();
        let options = AnalysisOptions {
            elevation: true,
            ..AnalysisOptions::default()
        };

        let run = Analyzer::new(&oracle, &config)
            .run(&testing::region(), testing::period(), options)
            .await
            .unwrap();

        assert_eq!(run.elevation_zones, Some(Vec::new()));
    }

    #[tokio::test]
    async fn run_survives_json_round_trip() {
        let oracle = testing::oracle(
            vec![
                testing::uniform_scene(testing::START, Reflectance::new(0.6, 0.0)),
                testing::uniform_scene(testing::END, Reflectance::new(0.1, 0.4)),
            ],
            Some(BandValues::Uniform(120.0)),
        );
        let config = AnalysisConfig::default();
        let run = Analyzer::new(&oracle, &config)
            .run(&testing::region(), testing::period(), AnalysisOptions::all())
            .await
            .unwrap();

        let json = serde_json::to_string(&run).unwrap();
        let parsed: AnalysisRun = serde_json::from_str(&json).unwrap();

        assert_eq!(parsed, run);
        let generated_at = testing::date("2024-01-01").and_hms_opt(0, 0, 0).unwrap();
        assert_eq!(
            render_report(&parsed, "Test", generated_at, true),
            render_report(&run, "Test", generated_at, true)
        );
    }

    #[tokio::test]
    async fn missing_end_imagery_stops_the_run() {
        let oracle = testing::oracle(
            vec![testing::uniform_scene(testing::START, Reflectance::new(0.4, 0.1))],
            None,
        );
        let config = AnalysisConfig::default();

        let err = Analyzer::new(&oracle, &config)
            .run(&testing::region(), testing::period(), AnalysisOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::NoImagesFound { .. }));
        assert!(!oracle.calls().contains(&OracleCall::Thumbnail));
    }

    #[tokio::test]
    async fn invalid_config_makes_no_oracle_call() {
        let oracle = testing::empty_oracle();
        let mut config = AnalysisConfig::default();
        config.reduction.scale = 0.0;

        let err = Analyzer::new(&oracle, &config)
            .run(&testing::region(), testing::period(), AnalysisOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Config(_)));
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn window_past_the_calendar_makes_no_oracle_call() {
        let oracle = testing::empty_oracle();
        let config = AnalysisConfig::default();
        let period = TimePeriod::new(testing::date("2020-01-01"), NaiveDate::MAX).unwrap();

        let err = Analyzer::new(&oracle, &config)
            .run(&testing::region(), period, AnalysisOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, AnalysisError::Region(_)));
        assert!(oracle.calls().is_empty());
    }

    #[tokio::test]
    async fn availability_per_year() {
        let oracle = testing::oracle(
            vec![
                testing::uniform_scene("2019-06-01", Reflectance::new(0.4, 0.1)),
                testing::uniform_scene("2021-03-01", Reflectance::new(0.4, 0.1)),
                testing::uniform_scene("2021-09-01", Reflectance::new(0.4, 0.1)),
            ],
            None,
        );
        let config = AnalysisConfig::default();
        let analyzer = Analyzer::new(&oracle, &config);

        let years = analyzer
            .availability(&testing::region(), 2019, 2021)
            .await
            .unwrap();
        let counts: Vec<(i32, u64)> = years.iter().map(|y| (y.year, y.image_count)).collect();
        assert_eq!(counts, vec![(2019, 1), (2020, 0), (2021, 2)]);
        assert!(!years[1].available());

        let err = analyzer
            .availability(&testing::region(), 2021, 2019)
            .await
            .unwrap_err();
        assert!(matches!(err, AnalysisError::InvalidYearRange { .. }));
    }
}
