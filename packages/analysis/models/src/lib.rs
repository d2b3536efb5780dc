#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Result types for urban sprawl analysis.
//!
//! Everything here is plain data: land-cover classes, per-class
//! statistics, index change buckets, the class transition matrix, and the
//! [`AnalysisRun`] record that a single run produces and the report and
//! export stages consume.

pub mod config;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sprawl_oracle_models::Sensor;
use sprawl_region_models::{DateWindow, RegionOfInterest, TimePeriod};
use strum_macros::{AsRefStr, Display, EnumString};

pub use config::{AnalysisConfig, ConfigError, CsvEncoding};

/// The four land-cover classes, in priority order.
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
pub enum LandCoverClass {
    /// Forests, grasslands, crops.
    Vegetation,
    /// Buildings, roads, other impervious surfaces.
    BuiltUp,
    /// Rivers, lakes, reservoirs.
    Water,
    /// Exposed soil, rock, sparse vegetation.
    BareSoil,
}

impl LandCoverClass {
    /// All classes in id order.
    pub const ALL: [Self; 4] = [Self::Vegetation, Self::BuiltUp, Self::Water, Self::BareSoil];

    /// Pixel value of the class in a classified raster.
    #[must_use]
    pub const fn id(self) -> i64 {
        match self {
            Self::Vegetation => 1,
            Self::BuiltUp => 2,
            Self::Water => 3,
            Self::BareSoil => 4,
        }
    }

    /// Class for a classified pixel value.
    #[must_use]
    pub const fn from_id(id: i64) -> Option<Self> {
        match id {
            1 => Some(Self::Vegetation),
            2 => Some(Self::BuiltUp),
            3 => Some(Self::Water),
            4 => Some(Self::BareSoil),
            _ => None,
        }
    }

    /// Position in [`Self::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Vegetation => 0,
            Self::BuiltUp => 1,
            Self::Water => 2,
            Self::BareSoil => 3,
        }
    }

    /// Map colour.
    #[must_use]
    pub const fn color(self) -> &'static str {
        match self {
            Self::Vegetation => "#228B22",
            Self::BuiltUp => "#8B4513",
            Self::Water => "#4169E1",
            Self::BareSoil => "#F4A460",
        }
    }

    /// Human-readable label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Vegetation => "Vegetation",
            Self::BuiltUp => "Built-up",
            Self::Water => "Water",
            Self::BareSoil => "Bare soil",
        }
    }

    /// One-line description for legends.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Vegetation => {
                "Areas with significant vegetation cover (forests, grasslands, crops)"
            }
            Self::BuiltUp => "Urban areas, buildings, roads, and other impervious surfaces",
            Self::Water => "Water bodies including rivers, lakes, and reservoirs",
            Self::BareSoil => "Exposed soil, rock, or areas with minimal vegetation",
        }
    }
}

/// One row of the class legend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegendEntry {
    /// Class.
    pub class: LandCoverClass,
    /// Pixel value.
    pub id: i64,
    /// Map colour.
    pub color: String,
    /// Description.
    pub description: String,
}

/// The legend for all classes, in id order.
#[must_use]
pub fn legend() -> Vec<LegendEntry> {
    LandCoverClass::ALL
        .iter()
        .map(|class| LegendEntry {
            class: *class,
            id: class.id(),
            color: class.color().to_string(),
            description: class.description().to_string(),
        })
        .collect()
}

/// Area statistics for one class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassStatistics {
    /// Class.
    pub class: LandCoverClass,
    /// Number of sampled pixels.
    pub pixel_count: f64,
    /// Area in square kilometres.
    pub area_km2: f64,
    /// Share of all classified pixels, in percent.
    pub percentage: f64,
}

/// Statistics for all four classes of one classified image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassBreakdown {
    /// One entry per class, in id order.
    pub classes: Vec<ClassStatistics>,
}

impl ClassBreakdown {
    /// Statistics of one class.
    #[must_use]
    pub fn get(&self, class: LandCoverClass) -> Option<&ClassStatistics> {
        self.classes.iter().find(|s| s.class == class)
    }

    /// Summed area of all classes.
    #[must_use]
    pub fn total_area_km2(&self) -> f64 {
        self.classes.iter().map(|s| s.area_km2).sum()
    }

    /// Total classified pixels.
    #[must_use]
    pub fn total_pixels(&self) -> f64 {
        self.classes.iter().map(|s| s.pixel_count).sum()
    }

    /// The class with the most pixels, `None` when nothing was classified.
    ///
    /// Ties go to the class earlier in priority order.
    #[must_use]
    pub fn dominant(&self) -> Option<LandCoverClass> {
        self.classes
            .iter()
            .filter(|s| s.pixel_count > 0.0)
            .fold(None::<&ClassStatistics>, |best, s| match best {
                Some(b) if b.pixel_count >= s.pixel_count => Some(b),
                _ => Some(s),
            })
            .map(|s| s.class)
    }
}

/// Summary statistics of an index difference raster.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DifferenceStats {
    /// Mean difference.
    pub mean: Option<f64>,
    /// Population standard deviation.
    pub std_dev: Option<f64>,
    /// Smallest difference.
    pub min: Option<f64>,
    /// Largest difference.
    pub max: Option<f64>,
}

/// Loss/gain/stable areas of an index between two dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexChange {
    /// Area where the index fell by more than the change threshold.
    pub loss_km2: f64,
    /// Area where the index rose by more than the change threshold.
    pub gain_km2: f64,
    /// Area within the change threshold.
    pub stable_km2: f64,
    /// `gain - loss`.
    pub net_change_km2: f64,
    /// Net change as a percentage of all bucketed area; `None` when that
    /// area is zero.
    pub change_percentage: Option<f64>,
    /// Gain as a percentage of all bucketed area; `None` when that area is
    /// zero.
    pub gain_percentage: Option<f64>,
    /// Statistics of the difference raster.
    pub difference: DifferenceStats,
}

impl IndexChange {
    /// Builds the record from the three bucket areas.
    #[must_use]
    pub fn from_areas(
        loss_km2: f64,
        gain_km2: f64,
        stable_km2: f64,
        difference: DifferenceStats,
    ) -> Self {
        let total = loss_km2 + gain_km2 + stable_km2;
        let share = |part: f64| (total > 0.0).then(|| part / total * 100.0);
        let net_change_km2 = gain_km2 - loss_km2;

        Self {
            loss_km2,
            gain_km2,
            stable_km2,
            net_change_km2,
            change_percentage: share(net_change_km2),
            gain_percentage: share(gain_km2),
            difference,
        }
    }

    /// Total bucketed area.
    #[must_use]
    pub fn total_km2(&self) -> f64 {
        self.loss_km2 + self.gain_km2 + self.stable_km2
    }
}

/// A whole-region metric at both dates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeRecord {
    /// Value at the start date.
    pub earlier: Option<f64>,
    /// Value at the end date.
    pub later: Option<f64>,
    /// `later - earlier`, if both are known.
    pub delta: Option<f64>,
}

impl ChangeRecord {
    /// Builds a record, deriving the delta.
    #[must_use]
    pub fn new(earlier: Option<f64>, later: Option<f64>) -> Self {
        Self {
            earlier,
            later,
            delta: earlier.zip(later).map(|(a, b)| b - a),
        }
    }
}

/// Conservation priority derived from vegetation and built-up deltas.
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
pub enum ConservationPriority {
    /// No combined loss/expansion signal.
    Low,
    /// Vegetation fell while built-up rose.
    Medium,
    /// Vegetation fell and built-up rose, both significantly.
    High,
    /// A delta was missing.
    Unknown,
}

/// Area (km²) that moved from one class to another between the two dates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeMatrix {
    /// `cells[from][to]`, indexed by [`LandCoverClass::index`].
    pub cells: [[f64; 4]; 4],
}

impl ChangeMatrix {
    /// Area that was `from` at the start and `to` at the end.
    #[must_use]
    pub const fn area(&self, from: LandCoverClass, to: LandCoverClass) -> f64 {
        self.cells[from.index()][to.index()]
    }

    /// Area that was `from` at the start.
    #[must_use]
    pub fn row_total(&self, from: LandCoverClass) -> f64 {
        self.cells[from.index()].iter().sum()
    }

    /// Area that is `to` at the end.
    #[must_use]
    pub fn column_total(&self, to: LandCoverClass) -> f64 {
        self.cells.iter().map(|row| row[to.index()]).sum()
    }

    /// All classified area.
    #[must_use]
    pub fn total(&self) -> f64 {
        self.cells.iter().flatten().sum()
    }

    /// Area that kept its class.
    #[must_use]
    pub fn unchanged(&self) -> f64 {
        (0..4).map(|i| self.cells[i][i]).sum()
    }
}

/// Vegetation index change inside one elevation band.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElevationZoneChange {
    /// Zone label, e.g. `elevation_100-250m`.
    pub label: String,
    /// Lower bound in metres (inclusive).
    pub min_m: f64,
    /// Upper bound in metres.
    pub max_m: f64,
    /// Mean vegetation index difference inside the zone.
    pub mean_change: Option<f64>,
    /// Standard deviation of the difference inside the zone.
    pub std_dev_change: Option<f64>,
}

/// Per-class statistics at both dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassificationComparison {
    /// Classes at the start date.
    pub earlier: ClassBreakdown,
    /// Classes at the end date.
    pub later: ClassBreakdown,
    /// Rendered classification at the start date.
    #[serde(default)]
    pub earlier_thumbnail_url: String,
    /// Rendered classification at the end date.
    #[serde(default)]
    pub later_thumbnail_url: String,
}

/// Scene count for one calendar year.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct YearAvailability {
    /// Calendar year.
    pub year: i32,
    /// Queried window.
    pub window: DateWindow,
    /// Scenes under the cloud ceiling.
    pub image_count: u64,
}

impl YearAvailability {
    /// Whether a composite can be built for the year.
    #[must_use]
    pub const fn available(&self) -> bool {
        self.image_count > 0
    }
}

/// Input of the summary report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryMetrics {
    /// Start of the analysis period.
    pub start: NaiveDate,
    /// End of the analysis period.
    pub end: NaiveDate,
    /// Change of the mean vegetation index.
    pub vegetation_delta: Option<f64>,
    /// Change of the mean built-up index.
    pub built_up_delta: Option<f64>,
    /// Derived priority.
    pub priority: ConservationPriority,
}

/// Everything one analysis run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRun {
    /// Analysed region.
    pub region: RegionOfInterest,
    /// Analysed period.
    pub period: TimePeriod,
    /// Imagery source.
    pub sensor: Sensor,
    /// Window the start composite was actually built from.
    pub start_window: DateWindow,
    /// Window the end composite was actually built from.
    pub end_window: DateWindow,
    /// Scenes in the start composite.
    pub start_image_count: u64,
    /// Scenes in the end composite.
    pub end_image_count: u64,
    /// True-colour thumbnail of the start composite.
    pub start_thumbnail_url: String,
    /// True-colour thumbnail of the end composite.
    pub end_thumbnail_url: String,
    /// Mean vegetation index at both dates.
    pub vegetation: ChangeRecord,
    /// Mean built-up index at both dates.
    pub built_up: ChangeRecord,
    /// Mean vegetation cover fraction at both dates.
    #[serde(default)]
    pub vegetation_fraction: ChangeRecord,
    /// Mean impervious surface fraction at both dates.
    #[serde(default)]
    pub impervious_fraction: ChangeRecord,
    /// Conservation priority.
    pub priority: ConservationPriority,
    /// Vegetation index loss/gain buckets.
    pub vegetation_change: IndexChange,
    /// Built-up index loss/gain buckets.
    pub urban_change: IndexChange,
    /// Land-cover statistics at both dates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<ClassificationComparison>,
    /// Class transition areas.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_matrix: Option<ChangeMatrix>,
    /// Vegetation change by elevation band.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevation_zones: Option<Vec<ElevationZoneChange>>,
}

impl AnalysisRun {
    /// The report input for this run.
    #[must_use]
    pub const fn summary_metrics(&self) -> SummaryMetrics {
        SummaryMetrics {
            start: self.period.start(),
            end: self.period.end(),
            vegetation_delta: self.vegetation.delta,
            built_up_delta: self.built_up.delta,
            priority: self.priority,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(class: LandCoverClass, pixel_count: f64) -> ClassStatistics {
        ClassStatistics {
            class,
            pixel_count,
            area_km2: pixel_count * 900.0 / 1e6,
            percentage: 0.0,
        }
    }

    #[test]
    fn class_ids_round_trip_in_priority_order() {
        for (i, class) in LandCoverClass::ALL.iter().enumerate() {
            assert_eq!(class.index(), i);
            assert_eq!(LandCoverClass::from_id(class.id()), Some(*class));
        }
        assert_eq!(LandCoverClass::from_id(0), None);
        assert_eq!(LandCoverClass::BuiltUp.to_string(), "built_up");
    }

    #[test]
    fn legend_lists_classes_in_id_order() {
        let legend = legend();
        let ids: Vec<i64> = legend.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        assert_eq!(legend[2].color, "#4169E1");
    }

    #[test]
    fn dominant_class_prefers_priority_on_ties() {
        let breakdown = ClassBreakdown {
            classes: vec![
                stats(LandCoverClass::Vegetation, 10.0),
                stats(LandCoverClass::BuiltUp, 10.0),
                stats(LandCoverClass::Water, 0.0),
                stats(LandCoverClass::BareSoil, 3.0),
            ],
        };
        assert_eq!(breakdown.dominant(), Some(LandCoverClass::Vegetation));

        let empty = ClassBreakdown {
            classes: LandCoverClass::ALL.iter().map(|c| stats(*c, 0.0)).collect(),
        };
        assert_eq!(empty.dominant(), None);
    }

    #[test]
    fn index_change_percentages() {
        let change = IndexChange::from_areas(1.0, 3.0, 6.0, DifferenceStats::default());
        assert!((change.net_change_km2 - 2.0).abs() < 1e-12);
        assert!((change.change_percentage.unwrap() - 20.0).abs() < 1e-12);
        assert!((change.gain_percentage.unwrap() - 30.0).abs() < 1e-12);
    }

    #[test]
    fn index_change_on_empty_region_is_undefined() {
        let change = IndexChange::from_areas(0.0, 0.0, 0.0, DifferenceStats::default());
        assert_eq!(change.change_percentage, None);
        assert_eq!(change.gain_percentage, None);
        assert!(change.net_change_km2.abs() < f64::EPSILON);
    }

    #[test]
    fn change_record_delta_needs_both_sides() {
        let record = ChangeRecord::new(Some(0.4), Some(0.3));
        assert!((record.delta.unwrap() + 0.1).abs() < 1e-12);
        assert_eq!(ChangeRecord::new(None, Some(0.3)).delta, None);
    }

    #[test]
    fn matrix_sums() {
        let mut matrix = ChangeMatrix::default();
        matrix.cells[0][0] = 2.0;
        matrix.cells[0][1] = 1.0;
        matrix.cells[3][1] = 0.5;

        assert!((matrix.row_total(LandCoverClass::Vegetation) - 3.0).abs() < 1e-12);
        assert!((matrix.column_total(LandCoverClass::BuiltUp) - 1.5).abs() < 1e-12);
        assert!((matrix.total() - 3.5).abs() < 1e-12);
        assert!((matrix.unchanged() - 2.0).abs() < 1e-12);
        let bare_to_built = matrix.area(LandCoverClass::BareSoil, LandCoverClass::BuiltUp);
        assert!((bare_to_built - 0.5).abs() < 1e-12);
    }
}
