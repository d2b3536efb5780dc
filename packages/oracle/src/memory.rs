//! In-memory oracle over a synthetic pixel grid.
//!
//! Scenes are dated rasters of per-band values laid out on one shared
//! [`PixelGrid`]. Composites, band math, and reductions follow the same
//! masking rules as Earth Engine: a masked pixel is `NaN` and drops out of
//! every reducer. Every call is recorded so tests can assert on the exact
//! request sequence.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sprawl_oracle_models::{
    Band, CompositeHandle, CompositeMethod, CompositeRequest, ImageExpr, QA_CLOUD_BIT,
    QA_SHADOW_BIT, ReduceRequest, ReductionResult, Reducer, ThumbnailRequest,
};
use sprawl_region_models::{BoundingBox, DateWindow, RegionOfInterest};

use crate::{Oracle, OracleError};

/// A north-up grid of square cells in geographic coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelGrid {
    /// Longitude of the western edge.
    pub west: f64,
    /// Latitude of the northern edge.
    pub north: f64,
    /// Cell edge length in degrees.
    pub cell_degrees: f64,
    /// Number of rows.
    pub rows: usize,
    /// Number of columns.
    pub cols: usize,
    /// Nominal ground size of one cell edge in metres.
    pub pixel_size_m: f64,
}

impl PixelGrid {
    /// A grid whose cells tile `bbox`, rounding the cell count up.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::suboptimal_flops
    )]
    pub fn covering(bbox: &BoundingBox, cell_degrees: f64, pixel_size_m: f64) -> Self {
        let count = |extent: f64| ((extent / cell_degrees) - 1e-9).ceil().max(1.0) as usize;
        Self {
            west: bbox.west,
            north: bbox.north,
            cell_degrees,
            rows: count(bbox.height()),
            cols: count(bbox.width()),
            pixel_size_m,
        }
    }

    /// Total number of cells.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.rows * self.cols
    }

    /// Whether the grid has no cells.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(lon, lat)` of the centre of cell `index` in row-major order.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::suboptimal_flops)]
    pub fn center(&self, index: usize) -> (f64, f64) {
        let row = index / self.cols.max(1);
        let col = index % self.cols.max(1);
        (
            self.west + (col as f64 + 0.5) * self.cell_degrees,
            self.north - (row as f64 + 0.5) * self.cell_degrees,
        )
    }
}

/// Band values of a scene, either one value everywhere or one per cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BandValues {
    /// Same value in every cell.
    Uniform(f64),
    /// Row-major per-cell values; `null` marks a masked cell.
    Pixels(Vec<Option<f64>>),
}

impl BandValues {
    fn expand(&self, len: usize) -> Result<Vec<f64>, OracleError> {
        match self {
            Self::Uniform(value) => Ok(vec![*value; len]),
            Self::Pixels(values) => {
                if values.len() != len {
                    return Err(OracleError::Config {
                        message: format!(
                            "band has {} pixels but the grid has {len}",
                            values.len()
                        ),
                    });
                }
                Ok(values.iter().map(|v| v.unwrap_or(f64::NAN)).collect())
            }
        }
    }
}

/// One dated acquisition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Scene {
    /// Acquisition date.
    pub acquired: NaiveDate,
    /// Scene cloud percentage.
    pub cloud_cover: f64,
    /// Values per band.
    pub bands: BTreeMap<Band, BandValues>,
}

impl Scene {
    /// A scene with the same value in every cell of every listed band.
    #[must_use]
    pub fn uniform(acquired: NaiveDate, cloud_cover: f64, bands: &[(Band, f64)]) -> Self {
        Self {
            acquired,
            cloud_cover,
            bands: bands
                .iter()
                .map(|(band, value)| (*band, BandValues::Uniform(*value)))
                .collect(),
        }
    }
}

/// Serializable description of an offline dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryScenario {
    /// Shared pixel grid.
    pub grid: PixelGrid,
    /// Available scenes.
    #[serde(default)]
    pub scenes: Vec<Scene>,
    /// Terrain elevation in metres.
    #[serde(default)]
    pub elevation: Option<BandValues>,
}

/// A request observed by [`MemoryOracle`].
#[derive(Debug, Clone, PartialEq)]
pub enum OracleCall {
    /// [`Oracle::image_count`] over a window.
    ImageCount(DateWindow),
    /// [`Oracle::composite`] over a window.
    Composite(DateWindow),
    /// [`Oracle::reduce`] with a reducer.
    Reduce(Reducer),
    /// [`Oracle::thumbnail_url`].
    Thumbnail,
}

type Raster = Vec<f64>;

struct StoredScene {
    acquired: NaiveDate,
    cloud_cover: f64,
    bands: BTreeMap<Band, Raster>,
}

#[derive(Default)]
struct State {
    composites: BTreeMap<String, BTreeMap<Band, Raster>>,
    calls: Vec<OracleCall>,
    thumbnails: u64,
}

/// Oracle that evaluates expressions over in-memory rasters.
pub struct MemoryOracle {
    grid: PixelGrid,
    scenes: Vec<StoredScene>,
    elevation: Option<Raster>,
    state: Mutex<State>,
}

impl MemoryOracle {
    /// Builds an oracle from a scenario.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Config`] if a per-pixel band does not match
    /// the grid size.
    pub fn new(scenario: MemoryScenario) -> Result<Self, OracleError> {
        let len = scenario.grid.len();
        let scenes = scenario
            .scenes
            .iter()
            .map(|scene| {
                let bands = scene
                    .bands
                    .iter()
                    .map(|(band, values)| Ok((*band, values.expand(len)?)))
                    .collect::<Result<BTreeMap<_, _>, OracleError>>()?;
                Ok(StoredScene {
                    acquired: scene.acquired,
                    cloud_cover: scene.cloud_cover,
                    bands,
                })
            })
            .collect::<Result<Vec<_>, OracleError>>()?;
        let elevation = scenario
            .elevation
            .as_ref()
            .map(|values| values.expand(len))
            .transpose()?;

        Ok(Self {
            grid: scenario.grid,
            scenes,
            elevation,
            state: Mutex::new(State::default()),
        })
    }

    /// Parses a JSON scenario and builds an oracle from it.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError`] if the JSON is malformed or inconsistent
    /// with its grid.
    pub fn from_json(input: &str) -> Result<Self, OracleError> {
        Self::new(serde_json::from_str(input)?)
    }

    /// The pixel grid.
    #[must_use]
    pub const fn grid(&self) -> &PixelGrid {
        &self.grid
    }

    /// Every call made so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<OracleCall> {
        self.lock().calls.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn record(&self, call: OracleCall) {
        self.lock().calls.push(call);
    }

    fn matching<'a>(
        &'a self,
        request: &'a CompositeRequest,
    ) -> impl Iterator<Item = &'a StoredScene> + 'a {
        self.scenes.iter().filter(move |scene| {
            request.window.contains(scene.acquired) && scene.cloud_cover < request.cloud_ceiling
        })
    }

    fn build_composite(&self, request: &CompositeRequest) -> BTreeMap<Band, Raster> {
        let scenes: Vec<&StoredScene> = self.matching(request).collect();
        let len = self.grid.len();

        let mut bands: BTreeMap<Band, Raster> = BTreeMap::new();
        for band in scenes.iter().flat_map(|s| s.bands.keys().copied()) {
            if bands.contains_key(&band) {
                continue;
            }
            let raster = (0..len)
                .map(|i| {
                    let values: Vec<f64> = scenes
                        .iter()
                        .filter_map(|s| s.bands.get(&band).map(|r| r[i]))
                        .filter(|v| !v.is_nan())
                        .collect();
                    merge(request.method, &values)
                })
                .collect();
            bands.insert(band, raster);
        }

        if request.cloud_mask
            && request.sensor.supports_qa_mask()
            && let Some(qa) = bands.get(&Band::Qa).cloned()
        {
            let flags = (1_i64 << QA_CLOUD_BIT) | (1_i64 << QA_SHADOW_BIT);
            for (band, raster) in &mut bands {
                if *band == Band::Qa {
                    continue;
                }
                for (value, q) in raster.iter_mut().zip(&qa) {
                    #[allow(clippy::cast_possible_truncation)]
                    let cloudy = q.is_nan() || (*q as i64) & flags != 0;
                    if cloudy {
                        *value = f64::NAN;
                    }
                }
            }
        }

        bands
    }

    #[allow(clippy::float_cmp)]
    fn evaluate(&self, state: &State, expr: &ImageExpr) -> Result<Raster, OracleError> {
        let len = self.grid.len();
        Ok(match expr {
            ImageExpr::Band { composite, band } => composite_band(state, composite, *band)?.clone(),
            ImageExpr::Constant { value } => vec![*value; len],
            ImageExpr::PixelArea => vec![self.grid.pixel_size_m * self.grid.pixel_size_m; len],
            ImageExpr::Elevation => self
                .elevation
                .clone()
                .unwrap_or_else(|| vec![f64::NAN; len]),
            ImageExpr::NormalizedDifference {
                composite,
                positive,
                negative,
            } => {
                let a = composite_band(state, composite, *positive)?;
                let b = composite_band(state, composite, *negative)?;
                a.iter()
                    .zip(b)
                    .map(|(a, b)| {
                        let sum = a + b;
                        if a.is_nan() || b.is_nan() || sum == 0.0 {
                            f64::NAN
                        } else {
                            (a - b) / sum
                        }
                    })
                    .collect()
            }
            ImageExpr::Binary { op, lhs, rhs } => {
                let a = self.evaluate(state, lhs)?;
                let b = self.evaluate(state, rhs)?;
                a.iter()
                    .zip(&b)
                    .map(|(a, b)| {
                        if a.is_nan() || b.is_nan() {
                            f64::NAN
                        } else {
                            op.apply(*a, *b)
                        }
                    })
                    .collect()
            }
            ImageExpr::Abs { input } => self
                .evaluate(state, input)?
                .into_iter()
                .map(f64::abs)
                .collect(),
            ImageExpr::Clamp { input, low, high } => self
                .evaluate(state, input)?
                .into_iter()
                .map(|v| if v.is_nan() { v } else { v.clamp(*low, *high) })
                .collect(),
            ImageExpr::Where { input, test, value } => {
                let base = self.evaluate(state, input)?;
                let test = self.evaluate(state, test)?;
                base.iter()
                    .zip(&test)
                    .map(|(v, t)| if !t.is_nan() && *t != 0.0 { *value } else { *v })
                    .collect()
            }
            ImageExpr::UpdateMask { input, mask } => {
                let base = self.evaluate(state, input)?;
                let mask = self.evaluate(state, mask)?;
                base.iter()
                    .zip(&mask)
                    .map(|(v, m)| if m.is_nan() || *m == 0.0 { f64::NAN } else { *v })
                    .collect()
            }
        })
    }

    fn pixels_in<'a>(
        &'a self,
        region: &'a RegionOfInterest,
        raster: &'a [f64],
    ) -> impl Iterator<Item = f64> + 'a {
        raster.iter().enumerate().filter_map(move |(i, v)| {
            let (lon, lat) = self.grid.center(i);
            (!v.is_nan() && region.contains(lon, lat)).then_some(*v)
        })
    }
}

fn composite_band<'a>(
    state: &'a State,
    composite: &CompositeHandle,
    band: Band,
) -> Result<&'a Raster, OracleError> {
    let bands = state
        .composites
        .get(&composite.id)
        .ok_or_else(|| OracleError::UnknownComposite {
            id: composite.id.clone(),
        })?;
    bands.get(&band).ok_or_else(|| OracleError::Evaluation {
        message: format!("composite {} has no {band} band", composite.id),
    })
}

#[allow(clippy::cast_precision_loss)]
fn merge(method: CompositeMethod, values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    match method {
        CompositeMethod::Mosaic => values[0],
        CompositeMethod::Mean => values.iter().sum::<f64>() / values.len() as f64,
        CompositeMethod::Median => {
            let mut sorted = values.to_vec();
            sorted.sort_by(f64::total_cmp);
            let mid = sorted.len() / 2;
            if sorted.len() % 2 == 0 {
                f64::midpoint(sorted[mid - 1], sorted[mid])
            } else {
                sorted[mid]
            }
        }
    }
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
fn reduce_values(reducer: Reducer, values: &[f64]) -> ReductionResult {
    let n = values.len() as f64;
    let mean = (!values.is_empty()).then(|| values.iter().sum::<f64>() / n);

    match reducer {
        Reducer::Mean => ReductionResult::Scalar { value: mean },
        Reducer::Sum => ReductionResult::Scalar {
            value: Some(values.iter().sum()),
        },
        Reducer::Count => ReductionResult::Scalar { value: Some(n) },
        Reducer::StdDev => ReductionResult::Scalar {
            value: mean.map(|m| (values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n).sqrt()),
        },
        Reducer::MinMax => ReductionResult::Range {
            min: values.iter().copied().reduce(f64::min),
            max: values.iter().copied().reduce(f64::max),
        },
        Reducer::FrequencyHistogram => {
            let mut counts = BTreeMap::new();
            for v in values {
                *counts.entry(v.round() as i64).or_insert(0.0) += 1.0;
            }
            ReductionResult::Histogram { counts }
        }
    }
}

#[async_trait]
impl Oracle for MemoryOracle {
    async fn image_count(&self, request: &CompositeRequest) -> Result<u64, OracleError> {
        self.record(OracleCall::ImageCount(request.window));
        Ok(self.matching(request).count() as u64)
    }

    async fn composite(&self, request: &CompositeRequest) -> Result<CompositeHandle, OracleError> {
        self.record(OracleCall::Composite(request.window));
        let bands = self.build_composite(request);

        let mut state = self.lock();
        let id = format!("memory-composite-{}", state.composites.len());
        log::trace!("Built {id} with {} bands", bands.len());
        state.composites.insert(id.clone(), bands);

        Ok(CompositeHandle {
            id,
            request: request.clone(),
        })
    }

    async fn reduce(&self, request: &ReduceRequest) -> Result<ReductionResult, OracleError> {
        self.record(OracleCall::Reduce(request.reducer));
        let raster = {
            let state = self.lock();
            self.evaluate(&state, &request.image)?
        };
        let values: Vec<f64> = self.pixels_in(&request.region, &raster).collect();
        Ok(reduce_values(request.reducer, &values))
    }

    async fn thumbnail_url(&self, _request: &ThumbnailRequest) -> Result<String, OracleError> {
        let mut state = self.lock();
        state.calls.push(OracleCall::Thumbnail);
        state.thumbnails += 1;
        Ok(format!("memory://thumbnails/{}", state.thumbnails))
    }
}

#[cfg(test)]
mod tests {
    use sprawl_oracle_models::{Sensor, ThumbnailSource, Visualization};

    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn region() -> RegionOfInterest {
        RegionOfInterest::rectangle(0.0, 0.0, 0.1, 0.1).unwrap()
    }

    fn grid() -> PixelGrid {
        PixelGrid::covering(&region().bounding_box(), 0.01, 30.0)
    }

    fn request(window: DateWindow) -> CompositeRequest {
        CompositeRequest {
            region: region(),
            window,
            cloud_ceiling: 20.0,
            sensor: Sensor::Sentinel2,
            method: CompositeMethod::Median,
            cloud_mask: false,
        }
    }

    fn oracle(scenes: Vec<Scene>) -> MemoryOracle {
        MemoryOracle::new(MemoryScenario {
            grid: grid(),
            scenes,
            elevation: None,
        })
        .unwrap()
    }

    fn reduce(image: ImageExpr, reducer: Reducer) -> ReduceRequest {
        ReduceRequest {
            image,
            region: region(),
            reducer,
            scale: 30.0,
            max_pixels: 1e13,
        }
    }

    #[test]
    fn grid_covers_region() {
        let grid = grid();
        assert_eq!(grid.rows, 10);
        assert_eq!(grid.cols, 10);
        let (lon, lat) = grid.center(0);
        assert!((lon - 0.005).abs() < 1e-12);
        assert!((lat - 0.095).abs() < 1e-12);
    }

    #[test]
    fn merge_methods() {
        assert!((merge(CompositeMethod::Median, &[3.0, 1.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((merge(CompositeMethod::Median, &[4.0, 1.0]) - 2.5).abs() < 1e-12);
        assert!((merge(CompositeMethod::Mean, &[1.0, 2.0]) - 1.5).abs() < 1e-12);
        assert!((merge(CompositeMethod::Mosaic, &[7.0, 1.0]) - 7.0).abs() < 1e-12);
        assert!(merge(CompositeMethod::Median, &[]).is_nan());
    }

    #[tokio::test]
    async fn counts_respect_window_and_cloud_ceiling() {
        let oracle = oracle(vec![
            Scene::uniform(date("2020-01-10"), 5.0, &[(Band::Nir, 0.5)]),
            Scene::uniform(date("2020-01-20"), 20.0, &[(Band::Nir, 0.5)]),
            Scene::uniform(date("2020-03-01"), 5.0, &[(Band::Nir, 0.5)]),
        ]);
        let window = DateWindow::narrow(date("2020-01-01"), 30).unwrap();

        assert_eq!(oracle.image_count(&request(window)).await.unwrap(), 1);
        assert_eq!(oracle.calls(), vec![OracleCall::ImageCount(window)]);
    }

    #[tokio::test]
    async fn normalized_difference_mean() {
        let oracle = oracle(vec![Scene::uniform(
            date("2020-01-10"),
            5.0,
            &[(Band::Nir, 0.7), (Band::Red, 0.3)],
        )]);
        let handle = oracle
            .composite(&request(DateWindow::narrow(date("2020-01-01"), 30).unwrap()))
            .await
            .unwrap();

        let result = oracle
            .reduce(&reduce(
                ImageExpr::normalized_difference(&handle, Band::Nir, Band::Red),
                Reducer::Mean,
            ))
            .await
            .unwrap();
        assert!((result.scalar().unwrap() - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn zero_sum_pixels_are_masked() {
        let oracle = oracle(vec![Scene::uniform(
            date("2020-01-10"),
            5.0,
            &[(Band::Nir, 0.0), (Band::Red, 0.0)],
        )]);
        let handle = oracle
            .composite(&request(DateWindow::narrow(date("2020-01-01"), 30).unwrap()))
            .await
            .unwrap();

        let nd = ImageExpr::normalized_difference(&handle, Band::Nir, Band::Red);
        let mean = oracle.reduce(&reduce(nd.clone(), Reducer::Mean)).await.unwrap();
        assert_eq!(mean.scalar(), None);
        let count = oracle.reduce(&reduce(nd, Reducer::Count)).await.unwrap();
        assert_eq!(count.scalar(), Some(0.0));
    }

    #[tokio::test]
    async fn area_sum_and_histogram() {
        let oracle = oracle(Vec::new());

        let area = oracle
            .reduce(&reduce(
                ImageExpr::constant(1.0).multiply(ImageExpr::PixelArea),
                Reducer::Sum,
            ))
            .await
            .unwrap();
        assert!((area.scalar().unwrap() - 100.0 * 900.0).abs() < 1e-6);

        let histogram = oracle
            .reduce(&reduce(ImageExpr::constant(3.0), Reducer::FrequencyHistogram))
            .await
            .unwrap();
        assert_eq!(histogram.histogram().unwrap().get(&3), Some(&100.0));
    }

    #[tokio::test]
    async fn where_keeps_base_on_masked_test() {
        let oracle = oracle(Vec::new());
        let masked = ImageExpr::constant(1.0).divide(0.0);
        let image = ImageExpr::constant(0.0).replace_where(masked.gt(0.5), 9.0);

        let result = oracle.reduce(&reduce(image, Reducer::Mean)).await.unwrap();
        assert_eq!(result.scalar(), Some(0.0));
    }

    #[tokio::test]
    async fn qa_mask_drops_cloudy_pixels() {
        let mut qa = vec![Some(0.0); 100];
        qa[0] = Some(8.0);
        qa[1] = Some(16.0);
        let scene = Scene {
            acquired: date("2020-01-10"),
            cloud_cover: 5.0,
            bands: BTreeMap::from([
                (Band::Nir, BandValues::Uniform(0.5)),
                (Band::Qa, BandValues::Pixels(qa)),
            ]),
        };
        let oracle = oracle(vec![scene]);
        let mut req = request(DateWindow::narrow(date("2020-01-01"), 30).unwrap());
        req.sensor = Sensor::Landsat8;
        req.cloud_mask = true;
        let handle = oracle.composite(&req).await.unwrap();

        let count = oracle
            .reduce(&reduce(ImageExpr::band(&handle, Band::Nir), Reducer::Count))
            .await
            .unwrap();
        assert_eq!(count.scalar(), Some(98.0));
    }

    #[tokio::test]
    async fn missing_elevation_is_fully_masked() {
        let oracle = oracle(Vec::new());

        let range = oracle
            .reduce(&reduce(ImageExpr::Elevation, Reducer::MinMax))
            .await
            .unwrap();
        assert_eq!(range.range(), None);
        let count = oracle
            .reduce(&reduce(ImageExpr::Elevation, Reducer::Count))
            .await
            .unwrap();
        assert_eq!(count.scalar(), Some(0.0));
    }

    #[tokio::test]
    async fn unknown_composite_is_rejected() {
        let oracle = oracle(Vec::new());
        let handle = CompositeHandle {
            id: "elsewhere".to_string(),
            request: request(DateWindow::narrow(date("2020-01-01"), 30).unwrap()),
        };
        let err = oracle
            .reduce(&reduce(ImageExpr::band(&handle, Band::Red), Reducer::Mean))
            .await
            .unwrap_err();
        assert!(matches!(err, OracleError::UnknownComposite { .. }));
    }

    #[tokio::test]
    async fn thumbnails_are_numbered() {
        let oracle = oracle(Vec::new());
        let req = ThumbnailRequest {
            source: ThumbnailSource::Expression {
                image: ImageExpr::constant(1.0),
            },
            region: region(),
            dimensions: 512,
            visualization: Visualization {
                min: 0.0,
                max: 1.0,
                gamma: None,
                palette: Vec::new(),
            },
        };
        assert_eq!(
            oracle.thumbnail_url(&req).await.unwrap(),
            "memory://thumbnails/1"
        );
        assert_eq!(
            oracle.thumbnail_url(&req).await.unwrap(),
            "memory://thumbnails/2"
        );
    }

    #[test]
    fn scenario_json_rejects_mismatched_pixels() {
        let json = r#"{
            "grid": { "west": 0, "north": 1, "cellDegrees": 0.5, "rows": 2, "cols": 2, "pixelSizeM": 30 },
            "scenes": [
                { "acquired": "2020-01-01", "cloudCover": 1, "bands": { "nir": [0.1, 0.2] } }
            ]
        }"#;
        assert!(matches!(
            MemoryOracle::from_json(json),
            Err(OracleError::Config { .. })
        ));
    }
}
