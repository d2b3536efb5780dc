//! Earth Engine REST client.
//!
//! Image expressions are translated into Earth Engine's serialized
//! expression graph (`constantValue` / `functionInvocationValue` nodes) and
//! evaluated with `value:compute`. Every call is a single HTTP attempt.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value, json};
use sprawl_oracle_models::{
    Band, BinaryOp, CompositeHandle, CompositeMethod, CompositeRequest, ImageExpr, QA_CLOUD_BIT,
    QA_SHADOW_BIT, ReduceRequest, ReductionResult, Reducer, ThumbnailRequest, ThumbnailSource,
    Visualization,
};
use sprawl_region_models::{GeometryKind, RegionOfInterest};

use crate::{Oracle, OracleError};

/// Default REST endpoint.
pub const DEFAULT_BASE_URL: &str = "https://earthengine.googleapis.com";

/// Digital elevation model used for terrain analysis.
pub const ELEVATION_DATASET: &str = "USGS/SRTMGL1_003";

/// Band name every reduced image is renamed to before `reduceRegion`.
const REDUCED_BAND: &str = "value";

/// Connection settings for the Earth Engine REST API.
#[derive(Debug, Clone)]
pub struct EarthEngineConfig {
    /// API root, without a trailing slash.
    pub base_url: String,
    /// Cloud project the requests are billed to.
    pub project: String,
    /// OAuth2 bearer token.
    pub access_token: String,
}

impl EarthEngineConfig {
    /// Reads settings from `EE_PROJECT`, `EE_ACCESS_TOKEN`, and the optional
    /// `EE_BASE_URL`.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Config`] if a required variable is not set.
    pub fn from_env() -> Result<Self, OracleError> {
        let project = std::env::var("EE_PROJECT").map_err(|_| OracleError::Config {
            message: "EE_PROJECT environment variable not set".to_string(),
        })?;
        let access_token = std::env::var("EE_ACCESS_TOKEN").map_err(|_| OracleError::Config {
            message: "EE_ACCESS_TOKEN environment variable not set".to_string(),
        })?;
        let base_url =
            std::env::var("EE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            project,
            access_token,
        })
    }
}

/// Oracle backed by the Earth Engine REST API.
pub struct EarthEngineOracle {
    config: EarthEngineConfig,
    client: reqwest::Client,
    next_id: AtomicU64,
}

#[derive(Deserialize)]
struct ComputeResponse {
    result: Value,
}

#[derive(Deserialize)]
struct ThumbnailResponse {
    name: String,
}

#[derive(Deserialize)]
struct ApiError {
    error: ApiErrorDetail,
}

#[derive(Deserialize)]
struct ApiErrorDetail {
    message: String,
}

impl EarthEngineOracle {
    /// Creates a client for the given settings.
    #[must_use]
    pub fn new(config: EarthEngineConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            next_id: AtomicU64::new(0),
        }
    }

    /// Creates a client from environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`OracleError::Config`] if credentials are missing.
    pub fn from_env() -> Result<Self, OracleError> {
        Ok(Self::new(EarthEngineConfig::from_env()?))
    }

    fn project_url(&self, method: &str) -> String {
        format!(
            "{}/v1/projects/{}/{method}",
            self.config.base_url, self.config.project
        )
    }

    async fn post(&self, url: &str, body: &Value) -> Result<String, OracleError> {
        log::debug!("POST {url}");

        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.config.access_token)
            .json(body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            let message = serde_json::from_str::<ApiError>(&text)
                .map_or_else(|_| format!("HTTP {status}: {text}"), |e| e.error.message);
            log::warn!("Earth Engine request failed with HTTP {status}: {message}");
            return Err(OracleError::from_status(status.as_u16(), message));
        }

        Ok(text)
    }

    async fn compute(&self, node: Value) -> Result<Value, OracleError> {
        let body = json!({ "expression": expression(node) });
        let text = self.post(&self.project_url("value:compute"), &body).await?;
        let response: ComputeResponse = serde_json::from_str(&text)?;
        Ok(response.result)
    }
}

#[async_trait]
impl Oracle for EarthEngineOracle {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    async fn image_count(&self, request: &CompositeRequest) -> Result<u64, OracleError> {
        let node = invoke("Collection.size", [("collection", collection(request))]);
        let result = self.compute(node).await?;

        number(&result)
            .filter(|n| *n >= 0.0)
            .map(|n| n.round() as u64)
            .ok_or_else(|| OracleError::Response {
                message: format!("expected a collection size, got {result}"),
            })
    }

    async fn composite(&self, request: &CompositeRequest) -> Result<CompositeHandle, OracleError> {
        // Composites are lazy on the Earth Engine side; the request is
        // re-serialized every time the handle is referenced.
        let n = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(CompositeHandle {
            id: format!("ee-composite-{n}"),
            request: request.clone(),
        })
    }

    async fn reduce(&self, request: &ReduceRequest) -> Result<ReductionResult, OracleError> {
        let node = reduce_region(request)?;
        let result = self.compute(node).await?;
        parse_reduction(request.reducer, &result)
    }

    async fn thumbnail_url(&self, request: &ThumbnailRequest) -> Result<String, OracleError> {
        let body = thumbnail_body(request)?;
        let text = self.post(&self.project_url("thumbnails"), &body).await?;
        let response: ThumbnailResponse = serde_json::from_str(&text)?;
        Ok(format!("{}/v1/{}:getPixels", self.config.base_url, response.name))
    }
}

/// Wraps a root node into a single-value expression graph.
fn expression(node: Value) -> Value {
    json!({
        "result": "0",
        "values": { "0": node },
    })
}

fn constant(value: impl Into<Value>) -> Value {
    json!({ "constantValue": value.into() })
}

fn invoke<const N: usize>(function: &str, arguments: [(&str, Value); N]) -> Value {
    let arguments: Map<String, Value> = arguments
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

    json!({
        "functionInvocationValue": {
            "functionName": function,
            "arguments": arguments,
        }
    })
}

fn number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn geometry(region: &RegionOfInterest) -> Value {
    match region.kind() {
        GeometryKind::Rectangle => {
            let b = region.bounding_box();
            invoke(
                "GeometryConstructors.Rectangle",
                [
                    (
                        "coordinates",
                        constant(json!([b.west, b.south, b.east, b.north])),
                    ),
                    ("geodesic", constant(false)),
                ],
            )
        }
        GeometryKind::Polygon => invoke(
            "GeometryConstructors.Polygon",
            [
                ("coordinates", constant(json!([region.closed_ring()]))),
                ("geodesic", constant(false)),
            ],
        ),
    }
}

fn collection(request: &CompositeRequest) -> Value {
    let loaded = invoke(
        "ImageCollection.load",
        [("id", constant(request.sensor.collection_id()))],
    );

    let in_region = invoke(
        "Collection.filter",
        [
            ("collection", loaded),
            (
                "filter",
                invoke(
                    "Filter.intersects",
                    [
                        ("leftField", constant(".all")),
                        ("rightValue", geometry(&request.region)),
                    ],
                ),
            ),
        ],
    );

    let in_window = invoke(
        "Collection.filter",
        [
            ("collection", in_region),
            (
                "filter",
                invoke(
                    "Filter.dateRangeContains",
                    [
                        (
                            "leftValue",
                            invoke(
                                "DateRange",
                                [
                                    ("start", constant(request.window.start_str())),
                                    ("end", constant(request.window.end_str())),
                                ],
                            ),
                        ),
                        ("rightField", constant("system:time_start")),
                    ],
                ),
            ),
        ],
    );

    invoke(
        "Collection.filter",
        [
            ("collection", in_window),
            (
                "filter",
                invoke(
                    "Filter.lessThan",
                    [
                        ("leftField", constant(request.sensor.cloud_property())),
                        ("rightValue", constant(request.cloud_ceiling)),
                    ],
                ),
            ),
        ],
    )
}

fn select(image: Value, name: &str) -> Value {
    invoke(
        "Image.select",
        [("input", image), ("bandSelectors", constant(json!([name])))],
    )
}

fn band_name(request: &CompositeRequest, band: Band) -> Result<&'static str, OracleError> {
    request
        .sensor
        .band_name(band)
        .ok_or_else(|| OracleError::Evaluation {
            message: format!("sensor {} has no {band} band", request.sensor),
        })
}

fn composite_image(request: &CompositeRequest) -> Result<Value, OracleError> {
    let images = collection(request);
    let merged = match request.method {
        CompositeMethod::Median => invoke("reduce.median", [("collection", images)]),
        CompositeMethod::Mean => invoke("reduce.mean", [("collection", images)]),
        CompositeMethod::Mosaic => invoke("ImageCollection.mosaic", [("collection", images)]),
    };
    let clipped = invoke(
        "Image.clip",
        [("input", merged), ("geometry", geometry(&request.region))],
    );

    if !(request.cloud_mask && request.sensor.supports_qa_mask()) {
        return Ok(clipped);
    }

    let qa = select(clipped.clone(), band_name(request, Band::Qa)?);
    let clear = |bit: u32| {
        invoke(
            "Image.eq",
            [
                (
                    "image1",
                    invoke(
                        "Image.bitwiseAnd",
                        [
                            ("image1", qa.clone()),
                            ("image2", image_constant(f64::from(1_u32 << bit))),
                        ],
                    ),
                ),
                ("image2", image_constant(0.0)),
            ],
        )
    };
    let mask = invoke(
        "Image.and",
        [
            ("image1", clear(QA_CLOUD_BIT)),
            ("image2", clear(QA_SHADOW_BIT)),
        ],
    );

    Ok(invoke("Image.updateMask", [("image", clipped), ("mask", mask)]))
}

fn image_constant(value: f64) -> Value {
    invoke("Image.constant", [("value", constant(value))])
}

const fn binary_function(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "Image.add",
        BinaryOp::Subtract => "Image.subtract",
        BinaryOp::Multiply => "Image.multiply",
        BinaryOp::Divide => "Image.divide",
        BinaryOp::Gt => "Image.gt",
        BinaryOp::Lt => "Image.lt",
        BinaryOp::Gte => "Image.gte",
        BinaryOp::Lte => "Image.lte",
        BinaryOp::Eq => "Image.eq",
        BinaryOp::And => "Image.and",
    }
}

/// Serializes an image expression into an Earth Engine node.
///
/// # Errors
///
/// Returns [`OracleError::Evaluation`] if the expression references a band
/// the composite's sensor does not have.
pub fn image(expr: &ImageExpr) -> Result<Value, OracleError> {
    Ok(match expr {
        ImageExpr::Band { composite, band } => select(
            composite_image(&composite.request)?,
            band_name(&composite.request, *band)?,
        ),
        ImageExpr::Constant { value } => image_constant(*value),
        ImageExpr::PixelArea => invoke("Image.pixelArea", []),
        ImageExpr::Elevation => select(
            invoke("Image.load", [("id", constant(ELEVATION_DATASET))]),
            "elevation",
        ),
        ImageExpr::NormalizedDifference {
            composite,
            positive,
            negative,
        } => invoke(
            "Image.normalizedDifference",
            [
                ("input", composite_image(&composite.request)?),
                (
                    "bandNames",
                    constant(json!([
                        band_name(&composite.request, *positive)?,
                        band_name(&composite.request, *negative)?,
                    ])),
                ),
            ],
        ),
        ImageExpr::Binary { op, lhs, rhs } => invoke(
            binary_function(*op),
            [("image1", image(lhs)?), ("image2", image(rhs)?)],
        ),
        ImageExpr::Abs { input } => invoke("Image.abs", [("value", image(input)?)]),
        ImageExpr::Clamp { input, low, high } => invoke(
            "Image.clamp",
            [
                ("input", image(input)?),
                ("low", constant(*low)),
                ("high", constant(*high)),
            ],
        ),
        ImageExpr::Where { input, test, value } => invoke(
            "Image.where",
            [
                ("input", image(input)?),
                ("test", image(test)?),
                ("value", image_constant(*value)),
            ],
        ),
        ImageExpr::UpdateMask { input, mask } => invoke(
            "Image.updateMask",
            [("image", image(input)?), ("mask", image(mask)?)],
        ),
    })
}

const fn reducer_function(reducer: Reducer) -> &'static str {
    match reducer {
        Reducer::Mean => "Reducer.mean",
        Reducer::Sum => "Reducer.sum",
        Reducer::Count => "Reducer.count",
        Reducer::StdDev => "Reducer.stdDev",
        Reducer::MinMax => "Reducer.minMax",
        Reducer::FrequencyHistogram => "Reducer.frequencyHistogram",
    }
}

/// Builds the `Image.reduceRegion` node for a reduction.
///
/// # Errors
///
/// Returns [`OracleError::Evaluation`] if the image cannot be serialized.
pub fn reduce_region(request: &ReduceRequest) -> Result<Value, OracleError> {
    let renamed = invoke(
        "Image.rename",
        [
            ("input", image(&request.image)?),
            ("names", constant(json!([REDUCED_BAND]))),
        ],
    );

    Ok(invoke(
        "Image.reduceRegion",
        [
            ("image", renamed),
            ("reducer", invoke(reducer_function(request.reducer), [])),
            ("geometry", geometry(&request.region)),
            ("scale", constant(request.scale)),
            ("maxPixels", constant(request.max_pixels)),
        ],
    ))
}

/// Reads a `reduceRegion` dictionary into a typed result.
///
/// # Errors
///
/// Returns [`OracleError::Response`] if the dictionary does not hold what
/// the reducer produces.
pub fn parse_reduction(reducer: Reducer, result: &Value) -> Result<ReductionResult, OracleError> {
    let dict = result.as_object().ok_or_else(|| OracleError::Response {
        message: format!("expected a dictionary, got {result}"),
    })?;
    let field = |key: &str| dict.get(key).and_then(number);

    match reducer {
        Reducer::Mean | Reducer::Sum | Reducer::Count | Reducer::StdDev => {
            Ok(ReductionResult::Scalar {
                value: field(REDUCED_BAND),
            })
        }
        Reducer::MinMax => Ok(ReductionResult::Range {
            min: field(&format!("{REDUCED_BAND}_min")),
            max: field(&format!("{REDUCED_BAND}_max")),
        }),
        Reducer::FrequencyHistogram => {
            let mut counts = std::collections::BTreeMap::new();
            let Some(histogram) = dict.get(REDUCED_BAND).filter(|v| !v.is_null()) else {
                return Ok(ReductionResult::Histogram { counts });
            };
            let histogram = histogram
                .as_object()
                .ok_or_else(|| OracleError::Response {
                    message: format!("expected a histogram dictionary, got {histogram}"),
                })?;

            for (key, count) in histogram {
                let value: f64 = key.parse().map_err(|_| OracleError::Response {
                    message: format!("histogram key is not numeric: {key}"),
                })?;
                let count = number(count).ok_or_else(|| OracleError::Response {
                    message: format!("histogram count is not numeric: {count}"),
                })?;
                #[allow(clippy::cast_possible_truncation)]
                let class = value.round() as i64;
                *counts.entry(class).or_insert(0.0) += count;
            }

            Ok(ReductionResult::Histogram { counts })
        }
    }
}

fn visualization_options(visualization: &Visualization) -> Value {
    let mut options = Map::new();
    options.insert(
        "ranges".to_string(),
        json!([{ "min": visualization.min, "max": visualization.max }]),
    );
    if let Some(gamma) = visualization.gamma {
        options.insert("gamma".to_string(), json!({ "value": gamma }));
    }
    if !visualization.palette.is_empty() {
        let colors: Vec<&str> = visualization
            .palette
            .iter()
            .map(|c| c.trim_start_matches('#'))
            .collect();
        options.insert("paletteColors".to_string(), json!(colors));
    }
    Value::Object(options)
}

/// Builds the body of a `thumbnails` request.
///
/// The rendered image is clipped to the request region so the grid
/// dimensions apply to the region's extent.
///
/// # Errors
///
/// Returns [`OracleError::Evaluation`] if the image cannot be serialized.
pub fn thumbnail_body(request: &ThumbnailRequest) -> Result<Value, OracleError> {
    let (node, band_ids) = match &request.source {
        ThumbnailSource::Composite { composite, bands } => {
            let names = bands
                .iter()
                .map(|band| band_name(&composite.request, *band))
                .collect::<Result<Vec<_>, _>>()?;
            (composite_image(&composite.request)?, Some(names))
        }
        ThumbnailSource::Expression { image: expr } => (image(expr)?, None),
    };
    let clipped = invoke(
        "Image.clip",
        [("input", node), ("geometry", geometry(&request.region))],
    );

    let mut body = json!({
        "expression": expression(clipped),
        "fileFormat": "PNG",
        "visualizationOptions": visualization_options(&request.visualization),
        "grid": {
            "dimensions": {
                "width": request.dimensions,
                "height": request.dimensions,
            }
        },
    });
    if let (Some(names), Some(obj)) = (band_ids, body.as_object_mut()) {
        obj.insert("bandIds".to_string(), json!(names));
    }

    Ok(body)
}
