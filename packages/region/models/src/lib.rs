#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Region of interest and analysis period types.
//!
//! A [`RegionOfInterest`] is parsed from the GeoJSON-style geometry that map
//! drawing tools emit (`Polygon` or the non-standard `Rectangle` type) and is
//! validated once, up front, before any imagery is requested. A
//! [`TimePeriod`] bounds the two endpoints of an analysis; [`DateWindow`] is
//! the half-open date range actually sent with an imagery query.

use chrono::{Days, NaiveDate};
use geo::{Contains as _, Coord, LineString, Point, Polygon};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Date format used for every date that crosses a process boundary.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// Errors raised while building a region or a time period.
#[derive(Debug, Error, PartialEq)]
pub enum RegionError {
    /// No geometry was supplied, or it carried no coordinates.
    #[error("No region selected: draw a rectangle or polygon to select an area")]
    NoRegion,

    /// The geometry `type` is neither `Polygon` nor `Rectangle`.
    #[error("Unsupported geometry type '{kind}': expected Polygon or Rectangle")]
    UnsupportedGeometry {
        /// The rejected geometry type.
        kind: String,
    },

    /// A polygon needs at least three vertices.
    #[error("Polygon has {count} vertices, at least 3 are required")]
    TooFewVertices {
        /// Number of vertices supplied (closing vertex excluded).
        count: usize,
    },

    /// A rectangle needs exactly four vertices.
    #[error("Rectangle has {count} vertices, exactly 4 are required")]
    RectangleVertexCount {
        /// Number of vertices supplied (closing vertex excluded).
        count: usize,
    },

    /// The bounding box has zero width or height.
    #[error("Region is degenerate: bounding box is {width} x {height} degrees")]
    Degenerate {
        /// Bounding box width in degrees.
        width: f64,
        /// Bounding box height in degrees.
        height: f64,
    },

    /// A vertex is not a finite WGS84 coordinate.
    #[error("Coordinate ({lon}, {lat}) is outside the valid longitude/latitude range")]
    CoordinateOutOfRange {
        /// Longitude.
        lon: f64,
        /// Latitude.
        lat: f64,
    },

    /// The geometry document could not be read.
    #[error("Geometry parse error: {message}")]
    Parse {
        /// Description of the parse failure.
        message: String,
    },

    /// A date string is not `YYYY-MM-DD`.
    #[error("Invalid date '{value}': expected format YYYY-MM-DD")]
    InvalidDate {
        /// The rejected input.
        value: String,
    },

    /// The period start is not strictly before its end.
    #[error("Start period ({start}) must be before end period ({end})")]
    InvalidDateOrder {
        /// Period start.
        start: NaiveDate,
        /// Period end.
        end: NaiveDate,
    },

    /// Shifting a date by a number of days leaves the calendar.
    #[error("Date {date} shifted by {days} days is outside the supported calendar range")]
    DateOutOfRange {
        /// Date being shifted.
        date: NaiveDate,
        /// Requested shift in days.
        days: u32,
    },
}

/// Shape of a region of interest.
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
pub enum GeometryKind {
    /// Arbitrary simple polygon.
    Polygon,
    /// Axis-aligned rectangle; only its bounding box is meaningful.
    Rectangle,
}

/// Axis-aligned bounds in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundingBox {
    /// Minimum longitude.
    pub west: f64,
    /// Minimum latitude.
    pub south: f64,
    /// Maximum longitude.
    pub east: f64,
    /// Maximum latitude.
    pub north: f64,
}

impl BoundingBox {
    /// Width in degrees of longitude.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    /// Height in degrees of latitude.
    #[must_use]
    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// Whether the point lies inside or on the edge of the box.
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        lon >= self.west && lon <= self.east && lat >= self.south && lat <= self.north
    }

    fn of(vertices: &[(f64, f64)]) -> Self {
        vertices.iter().fold(
            Self {
                west: f64::INFINITY,
                south: f64::INFINITY,
                east: f64::NEG_INFINITY,
                north: f64::NEG_INFINITY,
            },
            |acc, &(lon, lat)| Self {
                west: acc.west.min(lon),
                south: acc.south.min(lat),
                east: acc.east.max(lon),
                north: acc.north.max(lat),
            },
        )
    }
}

/// Raw geometry document as emitted by drawing tools.
#[derive(Debug, Clone, Deserialize)]
struct GeometryDocument {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Vec<Vec<Vec<f64>>>,
}

/// A validated, immutable region of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionOfInterest {
    kind: GeometryKind,
    vertices: Vec<(f64, f64)>,
    bounding_box: BoundingBox,
}

impl RegionOfInterest {
    /// Builds a region from an ordered vertex list.
    ///
    /// A trailing vertex equal to the first one (a closed ring) is dropped
    /// before counting.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the vertex count, coordinate range, or
    /// bounding box is invalid for the given kind.
    pub fn new(kind: GeometryKind, mut vertices: Vec<(f64, f64)>) -> Result<Self, RegionError> {
        if vertices.is_empty() {
            return Err(RegionError::NoRegion);
        }

        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices.pop();
        }

        if let Some(&(lon, lat)) = vertices.iter().find(|(lon, lat)| {
            !lon.is_finite() || !lat.is_finite() || lon.abs() > 180.0 || lat.abs() > 90.0
        }) {
            return Err(RegionError::CoordinateOutOfRange { lon, lat });
        }

        let count = vertices.len();
        match kind {
            GeometryKind::Polygon if count < 3 => {
                return Err(RegionError::TooFewVertices { count });
            }
            GeometryKind::Rectangle if count != 4 => {
                return Err(RegionError::RectangleVertexCount { count });
            }
            _ => {}
        }

        let bounding_box = BoundingBox::of(&vertices);
        if bounding_box.width() <= 0.0 || bounding_box.height() <= 0.0 {
            return Err(RegionError::Degenerate {
                width: bounding_box.width(),
                height: bounding_box.height(),
            });
        }

        Ok(Self {
            kind,
            vertices,
            bounding_box,
        })
    }

    /// Builds a rectangle from its bounds.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the bounds are degenerate or out of range.
    pub fn rectangle(west: f64, south: f64, east: f64, north: f64) -> Result<Self, RegionError> {
        Self::new(
            GeometryKind::Rectangle,
            vec![(west, south), (west, north), (east, north), (east, south)],
        )
    }

    /// Parses a GeoJSON-style geometry string.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the document is malformed or the geometry
    /// is invalid.
    pub fn from_geojson_str(input: &str) -> Result<Self, RegionError> {
        let value: serde_json::Value =
            serde_json::from_str(input).map_err(|e| RegionError::Parse {
                message: e.to_string(),
            })?;
        Self::from_geojson_value(&value)
    }

    /// Parses a geometry from an already-decoded JSON value.
    ///
    /// Accepts either a bare geometry object or a `Feature` wrapping one.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if the document is malformed or the geometry
    /// is invalid.
    pub fn from_geojson_value(value: &serde_json::Value) -> Result<Self, RegionError> {
        let geometry = match value.get("type").and_then(serde_json::Value::as_str) {
            Some("Feature") => value.get("geometry").ok_or(RegionError::NoRegion)?,
            Some(_) => value,
            None => return Err(RegionError::NoRegion),
        };

        if geometry.is_null() {
            return Err(RegionError::NoRegion);
        }

        let doc: GeometryDocument =
            serde_json::from_value(geometry.clone()).map_err(|e| RegionError::Parse {
                message: e.to_string(),
            })?;

        let kind: GeometryKind =
            doc.kind
                .parse()
                .map_err(|_| RegionError::UnsupportedGeometry {
                    kind: doc.kind.clone(),
                })?;

        let Some(ring) = doc.coordinates.into_iter().next() else {
            return Err(RegionError::NoRegion);
        };

        let vertices = ring
            .into_iter()
            .map(|position| match position.as_slice() {
                [lon, lat, ..] => Ok((*lon, *lat)),
                _ => Err(RegionError::Parse {
                    message: format!("position {position:?} has fewer than 2 ordinates"),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(kind, vertices)
    }

    /// Geometry kind.
    #[must_use]
    pub const fn kind(&self) -> GeometryKind {
        self.kind
    }

    /// Vertices without the closing vertex.
    #[must_use]
    pub fn vertices(&self) -> &[(f64, f64)] {
        &self.vertices
    }

    /// Bounding box of the vertices.
    #[must_use]
    pub const fn bounding_box(&self) -> BoundingBox {
        self.bounding_box
    }

    /// Closed exterior ring as `[lon, lat]` pairs.
    ///
    /// Rectangles are normalised to their bounding box.
    #[must_use]
    pub fn closed_ring(&self) -> Vec<[f64; 2]> {
        let mut ring: Vec<[f64; 2]> = match self.kind {
            GeometryKind::Polygon => self.vertices.iter().map(|&(x, y)| [x, y]).collect(),
            GeometryKind::Rectangle => {
                let b = self.bounding_box;
                vec![
                    [b.west, b.south],
                    [b.west, b.north],
                    [b.east, b.north],
                    [b.east, b.south],
                ]
            }
        };
        if let Some(&first) = ring.first() {
            ring.push(first);
        }
        ring
    }

    /// The region as a `geo` polygon.
    #[must_use]
    pub fn to_polygon(&self) -> Polygon<f64> {
        let exterior: LineString<f64> = self
            .closed_ring()
            .into_iter()
            .map(|[x, y]| Coord { x, y })
            .collect();
        Polygon::new(exterior, vec![])
    }

    /// Whether a point lies inside the region.
    ///
    /// Rectangles include their edges; polygons use strict containment.
    #[must_use]
    pub fn contains(&self, lon: f64, lat: f64) -> bool {
        match self.kind {
            GeometryKind::Rectangle => self.bounding_box.contains(lon, lat),
            GeometryKind::Polygon => {
                self.bounding_box.contains(lon, lat)
                    && self.to_polygon().contains(&Point::new(lon, lat))
            }
        }
    }

    /// The region as a standard GeoJSON polygon geometry.
    #[must_use]
    pub fn to_geojson(&self) -> geojson::Geometry {
        let ring = self
            .closed_ring()
            .into_iter()
            .map(|[x, y]| vec![x, y])
            .collect();
        geojson::Geometry::new(geojson::Value::Polygon(vec![ring]))
    }
}

/// Parses a `YYYY-MM-DD` date.
///
/// # Errors
///
/// Returns [`RegionError::InvalidDate`] if the string is not a valid date.
pub fn parse_date(value: &str) -> Result<NaiveDate, RegionError> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).map_err(|_| RegionError::InvalidDate {
        value: value.to_string(),
    })
}

/// Half-open `[start, end)` date range sent with an imagery query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DateWindow {
    /// First day included.
    pub start: NaiveDate,
    /// First day excluded.
    pub end: NaiveDate,
}

fn out_of_range(date: NaiveDate, days: u32) -> RegionError {
    RegionError::DateOutOfRange { date, days }
}

impl DateWindow {
    /// A window of `days` days starting at `date`. Zero is treated as one.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::DateOutOfRange`] if the end falls outside the
    /// calendar.
    pub fn narrow(date: NaiveDate, days: u32) -> Result<Self, RegionError> {
        let days = days.max(1);
        let end = date
            .checked_add_days(Days::new(u64::from(days)))
            .ok_or_else(|| out_of_range(date, days))?;
        Ok(Self { start: date, end })
    }

    /// The whole calendar year.
    #[must_use]
    pub fn year(year: i32) -> Option<Self> {
        Some(Self {
            start: NaiveDate::from_ymd_opt(year, 1, 1)?,
            end: NaiveDate::from_ymd_opt(year + 1, 1, 1)?,
        })
    }

    /// This window grown by `margin_days` on both ends.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::DateOutOfRange`] if either end leaves the
    /// calendar.
    pub fn widened(&self, margin_days: u32) -> Result<Self, RegionError> {
        let margin = Days::new(u64::from(margin_days));
        Ok(Self {
            start: self
                .start
                .checked_sub_days(margin)
                .ok_or_else(|| out_of_range(self.start, margin_days))?,
            end: self
                .end
                .checked_add_days(margin)
                .ok_or_else(|| out_of_range(self.end, margin_days))?,
        })
    }

    /// Whether `date` falls inside the window.
    #[must_use]
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Start formatted as `YYYY-MM-DD`.
    #[must_use]
    pub fn start_str(&self) -> String {
        self.start.format(DATE_FORMAT).to_string()
    }

    /// End formatted as `YYYY-MM-DD`.
    #[must_use]
    pub fn end_str(&self) -> String {
        self.end.format(DATE_FORMAT).to_string()
    }
}

impl std::fmt::Display for DateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} to {}", self.start_str(), self.end_str())
    }
}

/// The two endpoints of an analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimePeriod {
    start: NaiveDate,
    end: NaiveDate,
}

impl TimePeriod {
    /// Builds a period, requiring `start < end`.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::InvalidDateOrder`] if `start >= end`.
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, RegionError> {
        if start >= end {
            return Err(RegionError::InvalidDateOrder { start, end });
        }
        Ok(Self { start, end })
    }

    /// Parses both endpoints from `YYYY-MM-DD` strings.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError`] if either date is malformed or out of order.
    pub fn parse(start: &str, end: &str) -> Result<Self, RegionError> {
        Self::new(parse_date(start)?, parse_date(end)?)
    }

    /// Period start.
    #[must_use]
    pub const fn start(&self) -> NaiveDate {
        self.start
    }

    /// Period end.
    #[must_use]
    pub const fn end(&self) -> NaiveDate {
        self.end
    }

    /// Query window around the start date.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::DateOutOfRange`] if the window leaves the
    /// calendar.
    pub fn start_window(&self, days: u32) -> Result<DateWindow, RegionError> {
        DateWindow::narrow(self.start, days)
    }

    /// Query window around the end date.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::DateOutOfRange`] if the window leaves the
    /// calendar.
    pub fn end_window(&self, days: u32) -> Result<DateWindow, RegionError> {
        DateWindow::narrow(self.end, days)
    }
}

impl std::fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to {}",
            self.start.format(DATE_FORMAT),
            self.end.format(DATE_FORMAT)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        parse_date(s).unwrap()
    }

    #[test]
    fn parses_drawn_polygon() {
        let json = r#"{"type":"Polygon","coordinates":[[[85.2,27.6],[85.4,27.6],[85.4,27.8],[85.2,27.8],[85.2,27.6]]]}"#;
        let region = RegionOfInterest::from_geojson_str(json).unwrap();
        assert_eq!(region.kind(), GeometryKind::Polygon);
        assert_eq!(region.vertices().len(), 4);
        let bbox = region.bounding_box();
        assert!((bbox.width() - 0.2).abs() < 1e-9);
        assert!((bbox.height() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn parses_feature_wrapped_rectangle() {
        let json = r#"{"type":"Feature","properties":{},"geometry":{"type":"Rectangle","coordinates":[[[0,0],[0,0.1],[0.1,0.1],[0.1,0]]]}}"#;
        let region = RegionOfInterest::from_geojson_str(json).unwrap();
        assert_eq!(region.kind(), GeometryKind::Rectangle);
        assert!(region.contains(0.05, 0.05));
        assert!(region.contains(0.0, 0.0));
        assert!(!region.contains(0.2, 0.05));
    }

    #[test]
    fn rejects_unsupported_geometry() {
        let json = r#"{"type":"LineString","coordinates":[[[0,0],[1,1]]]}"#;
        assert_eq!(
            RegionOfInterest::from_geojson_str(json),
            Err(RegionError::UnsupportedGeometry {
                kind: "LineString".to_string()
            })
        );
    }

    #[test]
    fn rejects_missing_geometry() {
        let json = r#"{"type":"Feature","geometry":null}"#;
        assert_eq!(
            RegionOfInterest::from_geojson_str(json),
            Err(RegionError::NoRegion)
        );
        assert_eq!(
            RegionOfInterest::new(GeometryKind::Polygon, vec![]),
            Err(RegionError::NoRegion)
        );
    }

    #[test]
    fn vertex_count_rules() {
        assert_eq!(
            RegionOfInterest::new(GeometryKind::Polygon, vec![(0.0, 0.0), (1.0, 1.0)]),
            Err(RegionError::TooFewVertices { count: 2 })
        );
        assert_eq!(
            RegionOfInterest::new(
                GeometryKind::Rectangle,
                vec![(0.0, 0.0), (0.0, 1.0), (1.0, 1.0)]
            ),
            Err(RegionError::RectangleVertexCount { count: 3 })
        );
        // Closed ring of a triangle still counts three vertices.
        assert!(
            RegionOfInterest::new(
                GeometryKind::Polygon,
                vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0), (0.0, 0.0)]
            )
            .is_ok()
        );
    }

    #[test]
    fn rejects_degenerate_bbox() {
        let err = RegionOfInterest::new(
            GeometryKind::Polygon,
            vec![(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)],
        )
        .unwrap_err();
        assert!(matches!(err, RegionError::Degenerate { .. }));
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        let err = RegionOfInterest::rectangle(0.0, 0.0, 181.0, 1.0).unwrap_err();
        assert!(matches!(err, RegionError::CoordinateOutOfRange { .. }));
    }

    #[test]
    fn polygon_containment() {
        let triangle = RegionOfInterest::new(
            GeometryKind::Polygon,
            vec![(0.0, 0.0), (1.0, 0.0), (0.0, 1.0)],
        )
        .unwrap();
        assert!(triangle.contains(0.2, 0.2));
        assert!(!triangle.contains(0.8, 0.8));
    }

    #[test]
    fn closed_ring_for_rectangle_is_bbox() {
        let rect = RegionOfInterest::rectangle(1.0, 2.0, 3.0, 4.0).unwrap();
        let ring = rect.closed_ring();
        assert_eq!(ring.len(), 5);
        assert_eq!(ring.first(), ring.last());
        assert!(matches!(rect.to_geojson().value, geojson::Value::Polygon(_)));
    }

    #[test]
    fn period_requires_ordered_dates() {
        assert!(TimePeriod::parse("2020-01-01", "2023-01-01").is_ok());
        assert!(matches!(
            TimePeriod::parse("2023-01-01", "2020-01-01"),
            Err(RegionError::InvalidDateOrder { .. })
        ));
        assert!(matches!(
            TimePeriod::parse("2023-01-01", "2023-01-01"),
            Err(RegionError::InvalidDateOrder { .. })
        ));
        assert!(matches!(
            TimePeriod::parse("2023/01/01", "2024-01-01"),
            Err(RegionError::InvalidDate { .. })
        ));
    }

    #[test]
    fn windows_narrow_and_widen() {
        let period = TimePeriod::parse("2020-01-01", "2023-01-01").unwrap();
        let window = period.start_window(1).unwrap();
        assert_eq!(window.start, date("2020-01-01"));
        assert_eq!(window.end, date("2020-01-02"));
        assert!(window.contains(date("2020-01-01")));
        assert!(!window.contains(date("2020-01-02")));

        let wide = window.widened(30).unwrap();
        assert_eq!(wide.start_str(), "2019-12-02");
        assert_eq!(wide.end_str(), "2020-02-01");
        assert_eq!(period.end_window(0).unwrap().end, date("2023-01-02"));
    }

    #[test]
    fn windows_past_the_calendar_are_rejected() {
        let period = TimePeriod::parse("2020-01-01", "2023-01-01").unwrap();
        assert!(matches!(
            period.end_window(u32::MAX),
            Err(RegionError::DateOutOfRange { days: u32::MAX, .. })
        ));

        let window = DateWindow::narrow(date("2020-01-01"), 30).unwrap();
        assert!(matches!(
            window.widened(u32::MAX),
            Err(RegionError::DateOutOfRange { .. })
        ));
        assert!(DateWindow::narrow(NaiveDate::MAX, 1).is_err());
    }

    #[test]
    fn year_window_spans_calendar_year() {
        let window = DateWindow::year(2021).unwrap();
        assert!(window.contains(date("2021-12-31")));
        assert!(!window.contains(date("2022-01-01")));
    }
}
