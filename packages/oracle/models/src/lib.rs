#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Types exchanged with the remote sensing oracle.
//!
//! Analysis code never touches pixels directly. It describes what it wants
//! as an [`ImageExpr`] (band math over a composite) and asks the oracle to
//! reduce that expression over a region with a [`Reducer`]. The same
//! expression values are serialized for the Earth Engine REST API and
//! evaluated pixel-by-pixel by the in-memory oracle.

use sprawl_region_models::{DateWindow, RegionOfInterest};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default cloud-cover ceiling in percent.
pub const DEFAULT_CLOUD_CEILING: f64 = 20.0;

/// Bit in the Landsat `QA_PIXEL` band flagging cloud.
pub const QA_CLOUD_BIT: u32 = 3;

/// Bit in the Landsat `QA_PIXEL` band flagging cloud shadow.
pub const QA_SHADOW_BIT: u32 = 4;

/// Logical reflectance bands, independent of sensor naming.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Band {
    /// Visible blue.
    Blue,
    /// Visible green.
    Green,
    /// Visible red.
    Red,
    /// Near infrared.
    Nir,
    /// Shortwave infrared (~1.6 µm).
    Swir,
    /// Pixel quality bitmask.
    Qa,
}

impl Band {
    /// True-colour display bands.
    pub const RGB: [Self; 3] = [Self::Red, Self::Green, Self::Blue];
}

/// Supported imagery sources.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Sensor {
    /// Sentinel-2 surface reflectance.
    #[default]
    #[strum(to_string = "sentinel2", serialize = "s2")]
    Sentinel2,
    /// Landsat 8 Collection 2 Level 2.
    #[strum(to_string = "landsat8", serialize = "l8")]
    Landsat8,
}

impl Sensor {
    /// Image collection identifier.
    #[must_use]
    pub const fn collection_id(self) -> &'static str {
        match self {
            Self::Sentinel2 => "COPERNICUS/S2_SR",
            Self::Landsat8 => "LANDSAT/LC08/C02/T1_L2",
        }
    }

    /// Metadata property holding the scene cloud percentage.
    #[must_use]
    pub const fn cloud_property(self) -> &'static str {
        match self {
            Self::Sentinel2 => "CLOUDY_PIXEL_PERCENTAGE",
            Self::Landsat8 => "CLOUD_COVER",
        }
    }

    /// Sensor-specific band name, if the sensor has that band.
    #[must_use]
    pub const fn band_name(self, band: Band) -> Option<&'static str> {
        match (self, band) {
            (Self::Sentinel2, Band::Blue) => Some("B2"),
            (Self::Sentinel2, Band::Green) => Some("B3"),
            (Self::Sentinel2, Band::Red) => Some("B4"),
            (Self::Sentinel2, Band::Nir) => Some("B8"),
            (Self::Sentinel2, Band::Swir) => Some("B11"),
            (Self::Sentinel2, Band::Qa) => None,
            (Self::Landsat8, Band::Blue) => Some("SR_B2"),
            (Self::Landsat8, Band::Green) => Some("SR_B3"),
            (Self::Landsat8, Band::Red) => Some("SR_B4"),
            (Self::Landsat8, Band::Nir) => Some("SR_B5"),
            (Self::Landsat8, Band::Swir) => Some("SR_B6"),
            (Self::Landsat8, Band::Qa) => Some("QA_PIXEL"),
        }
    }

    /// Whether QA-based cloud masking is available for this sensor.
    #[must_use]
    pub const fn supports_qa_mask(self) -> bool {
        self.band_name(Band::Qa).is_some()
    }
}

/// How the scenes of a collection are merged into one image.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum CompositeMethod {
    /// Per-pixel median.
    #[default]
    Median,
    /// Per-pixel mean.
    Mean,
    /// First valid pixel in collection order.
    Mosaic,
}

/// Parameters of one composite query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeRequest {
    /// Region the composite is clipped to.
    pub region: RegionOfInterest,
    /// Acquisition date window.
    pub window: DateWindow,
    /// Scenes at or above this cloud percentage are excluded.
    pub cloud_ceiling: f64,
    /// Imagery source.
    pub sensor: Sensor,
    /// Compositing method.
    pub method: CompositeMethod,
    /// Mask cloud and cloud shadow pixels using the QA band.
    pub cloud_mask: bool,
}

impl CompositeRequest {
    /// Same request over a different date window.
    #[must_use]
    pub fn with_window(&self, window: DateWindow) -> Self {
        Self {
            window,
            ..self.clone()
        }
    }
}

/// Opaque reference to an oracle-side composite image.
///
/// Carries the request that produced it so stateless oracles can rebuild
/// the composite on every call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositeHandle {
    /// Oracle-assigned identifier.
    pub id: String,
    /// Query that produced the composite.
    pub request: CompositeRequest,
}

/// Pixel-wise binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BinaryOp {
    /// `a + b`
    Add,
    /// `a - b`
    Subtract,
    /// `a * b`
    Multiply,
    /// `a / b`
    Divide,
    /// `a > b` as 0/1
    Gt,
    /// `a < b` as 0/1
    Lt,
    /// `a >= b` as 0/1
    Gte,
    /// `a <= b` as 0/1
    Lte,
    /// `a == b` as 0/1
    Eq,
    /// logical and as 0/1
    And,
}

impl BinaryOp {
    /// Applies the operator to two unmasked pixel values.
    ///
    /// Returns `NaN` (masked) for a zero divisor.
    #[must_use]
    #[allow(clippy::float_cmp)]
    pub fn apply(self, a: f64, b: f64) -> f64 {
        let flag = |cond: bool| if cond { 1.0 } else { 0.0 };
        match self {
            Self::Add => a + b,
            Self::Subtract => a - b,
            Self::Multiply => a * b,
            Self::Divide => {
                if b == 0.0 {
                    f64::NAN
                } else {
                    a / b
                }
            }
            Self::Gt => flag(a > b),
            Self::Lt => flag(a < b),
            Self::Gte => flag(a >= b),
            Self::Lte => flag(a <= b),
            Self::Eq => flag(a == b),
            Self::And => flag(a != 0.0 && b != 0.0),
        }
    }
}

/// A single-band image expression.
///
/// Masked pixels propagate through every operator; comparisons on masked
/// pixels stay masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "camelCase")]
pub enum ImageExpr {
    /// One band of a composite.
    Band {
        /// Source composite.
        composite: CompositeHandle,
        /// Band to select.
        band: Band,
    },
    /// A constant image.
    Constant {
        /// Pixel value everywhere.
        value: f64,
    },
    /// Area of each pixel in square metres.
    PixelArea,
    /// Terrain elevation in metres.
    Elevation,
    /// `(a - b) / (a + b)` over two bands of a composite.
    NormalizedDifference {
        /// Source composite.
        composite: CompositeHandle,
        /// Band `a`.
        positive: Band,
        /// Band `b`.
        negative: Band,
    },
    /// Pixel-wise binary operation.
    Binary {
        /// Operator.
        op: BinaryOp,
        /// Left operand.
        lhs: Box<Self>,
        /// Right operand.
        rhs: Box<Self>,
    },
    /// Absolute value.
    Abs {
        /// Operand.
        input: Box<Self>,
    },
    /// Clamp into `[low, high]`.
    Clamp {
        /// Operand.
        input: Box<Self>,
        /// Lower bound.
        low: f64,
        /// Upper bound.
        high: f64,
    },
    /// Replace pixels where `test` is non-zero with `value`.
    Where {
        /// Base image.
        input: Box<Self>,
        /// Condition image.
        test: Box<Self>,
        /// Replacement value.
        value: f64,
    },
    /// Mask pixels where `mask` is zero.
    UpdateMask {
        /// Base image.
        input: Box<Self>,
        /// Mask image.
        mask: Box<Self>,
    },
}

impl From<f64> for ImageExpr {
    fn from(value: f64) -> Self {
        Self::Constant { value }
    }
}

impl ImageExpr {
    /// Selects one band of a composite.
    #[must_use]
    pub fn band(composite: &CompositeHandle, band: Band) -> Self {
        Self::Band {
            composite: composite.clone(),
            band,
        }
    }

    /// A constant image.
    #[must_use]
    pub const fn constant(value: f64) -> Self {
        Self::Constant { value }
    }

    /// Normalized difference `(a - b) / (a + b)`.
    #[must_use]
    pub fn normalized_difference(
        composite: &CompositeHandle,
        positive: Band,
        negative: Band,
    ) -> Self {
        Self::NormalizedDifference {
            composite: composite.clone(),
            positive,
            negative,
        }
    }

    fn binary(self, op: BinaryOp, rhs: impl Into<Self>) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(self),
            rhs: Box::new(rhs.into()),
        }
    }

    /// `self + rhs`
    #[must_use]
    pub fn plus(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Add, rhs)
    }

    /// `self - rhs`
    #[must_use]
    pub fn subtract(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Subtract, rhs)
    }

    /// `self * rhs`
    #[must_use]
    pub fn multiply(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Multiply, rhs)
    }

    /// `self / rhs`
    #[must_use]
    pub fn divide(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Divide, rhs)
    }

    /// `self > rhs`
    #[must_use]
    pub fn gt(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Gt, rhs)
    }

    /// `self < rhs`
    #[must_use]
    pub fn lt(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Lt, rhs)
    }

    /// `self >= rhs`
    #[must_use]
    pub fn gte(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Gte, rhs)
    }

    /// `self <= rhs`
    #[must_use]
    pub fn lte(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Lte, rhs)
    }

    /// `self == rhs`
    #[must_use]
    pub fn equals(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::Eq, rhs)
    }

    /// `self && rhs`
    #[must_use]
    pub fn and(self, rhs: impl Into<Self>) -> Self {
        self.binary(BinaryOp::And, rhs)
    }

    /// `|self|`
    #[must_use]
    pub fn abs(self) -> Self {
        Self::Abs {
            input: Box::new(self),
        }
    }

    /// Clamp into `[low, high]`.
    #[must_use]
    pub fn clamp(self, low: f64, high: f64) -> Self {
        Self::Clamp {
            input: Box::new(self),
            low,
            high,
        }
    }

    /// Replace pixels where `test` holds with `value`.
    #[must_use]
    pub fn replace_where(self, test: Self, value: f64) -> Self {
        Self::Where {
            input: Box::new(self),
            test: Box::new(test),
            value,
        }
    }

    /// Mask pixels where `mask` is zero.
    #[must_use]
    pub fn update_mask(self, mask: Self) -> Self {
        Self::UpdateMask {
            input: Box::new(self),
            mask: Box::new(mask),
        }
    }
}

/// Zonal reducers.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Reducer {
    /// Arithmetic mean.
    Mean,
    /// Sum.
    Sum,
    /// Number of unmasked pixels.
    Count,
    /// Population standard deviation.
    StdDev,
    /// Minimum and maximum.
    MinMax,
    /// Pixel count per distinct value.
    FrequencyHistogram,
}

/// One zonal reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReduceRequest {
    /// Image to reduce.
    pub image: ImageExpr,
    /// Region to reduce over.
    pub region: RegionOfInterest,
    /// Reducer.
    pub reducer: Reducer,
    /// Sampling resolution in metres per pixel.
    pub scale: f64,
    /// Upper bound on pixels the oracle may read.
    pub max_pixels: f64,
}

/// Result of a zonal reduction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReductionResult {
    /// Single value; `None` when no unmasked pixel was reduced.
    Scalar {
        /// Reduced value.
        value: Option<f64>,
    },
    /// Minimum and maximum.
    Range {
        /// Minimum value.
        min: Option<f64>,
        /// Maximum value.
        max: Option<f64>,
    },
    /// Pixel count per integer pixel value.
    Histogram {
        /// Value to pixel count.
        counts: std::collections::BTreeMap<i64, f64>,
    },
}

impl ReductionResult {
    /// The scalar value, if this is a scalar result.
    #[must_use]
    pub const fn scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar { value } => *value,
            Self::Range { .. } | Self::Histogram { .. } => None,
        }
    }

    /// The `(min, max)` pair, if this is a range result with both bounds.
    #[must_use]
    pub const fn range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Range {
                min: Some(min),
                max: Some(max),
            } => Some((*min, *max)),
            _ => None,
        }
    }

    /// The histogram, if this is a histogram result.
    #[must_use]
    pub const fn histogram(&self) -> Option<&std::collections::BTreeMap<i64, f64>> {
        match self {
            Self::Histogram { counts } => Some(counts),
            Self::Scalar { .. } | Self::Range { .. } => None,
        }
    }
}

/// Display stretch for a thumbnail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visualization {
    /// Value mapped to black / first palette colour.
    pub min: f64,
    /// Value mapped to white / last palette colour.
    pub max: f64,
    /// Gamma correction.
    pub gamma: Option<f64>,
    /// Palette colours (`#rrggbb`) for single-band images.
    #[serde(default)]
    pub palette: Vec<String>,
}

/// What a thumbnail renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "camelCase")]
pub enum ThumbnailSource {
    /// Three bands of a composite as RGB.
    Composite {
        /// Composite to render.
        composite: CompositeHandle,
        /// Red, green and blue channel bands.
        bands: [Band; 3],
    },
    /// A single-band expression with a palette.
    Expression {
        /// Expression to render.
        image: ImageExpr,
    },
}

/// A displayable thumbnail request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThumbnailRequest {
    /// Image to render.
    pub source: ThumbnailSource,
    /// Region to render.
    pub region: RegionOfInterest,
    /// Longest side in pixels.
    pub dimensions: u32,
    /// Display stretch.
    pub visualization: Visualization,
}
