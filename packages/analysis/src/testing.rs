//! Fixtures shared by the unit tests: a 0.1° square region over a 10×10
//! grid of 30 m pixels, and scenes built from target index values.

use chrono::NaiveDate;
use sprawl_oracle::Oracle;
use sprawl_oracle::memory::{BandValues, MemoryOracle, MemoryScenario, PixelGrid, Scene};
use sprawl_oracle_models::{
    Band, CompositeHandle, CompositeMethod, CompositeRequest, DEFAULT_CLOUD_CEILING, Sensor,
};
use sprawl_region_models::{DateWindow, RegionOfInterest, TimePeriod, parse_date};

pub const START: &str = "2020-01-01";
pub const END: &str = "2021-01-01";
pub const PIXELS: usize = 100;

const NIR: f64 = 0.5;

pub fn date(value: &str) -> NaiveDate {
    parse_date(value).unwrap()
}

pub fn region() -> RegionOfInterest {
    RegionOfInterest::rectangle(0.0, 0.0, 0.1, 0.1).unwrap()
}

pub fn period() -> TimePeriod {
    TimePeriod::parse(START, END).unwrap()
}

pub fn grid() -> PixelGrid {
    PixelGrid::covering(&region().bounding_box(), 0.01, 30.0)
}

/// Reflectances chosen so the pixel has the given NDVI, NDBI and MNDWI.
#[derive(Debug, Clone, Copy)]
pub struct Reflectance {
    pub ndvi: f64,
    pub ndbi: f64,
    pub mndwi: f64,
}

impl Reflectance {
    /// A dry pixel (MNDWI well below the water threshold).
    pub const fn new(ndvi: f64, ndbi: f64) -> Self {
        Self {
            ndvi,
            ndbi,
            mndwi: -0.5,
        }
    }

    pub const fn wet(ndvi: f64, ndbi: f64, mndwi: f64) -> Self {
        Self { ndvi, ndbi, mndwi }
    }

    pub fn bands(self) -> [(Band, f64); 5] {
        let red = NIR * (1.0 - self.ndvi) / (1.0 + self.ndvi);
        let swir = NIR * (1.0 + self.ndbi) / (1.0 - self.ndbi);
        let green = swir * (1.0 + self.mndwi) / (1.0 - self.mndwi);
        [
            (Band::Blue, 0.05),
            (Band::Green, green),
            (Band::Red, red),
            (Band::Nir, NIR),
            (Band::Swir, swir),
        ]
    }
}

pub fn uniform_scene(acquired: &str, reflectance: Reflectance) -> Scene {
    Scene::uniform(date(acquired), 5.0, &reflectance.bands())
}

/// A scene whose pixel `i` has reflectance `pixels[i]`.
pub fn pixel_scene(acquired: &str, pixels: &[Reflectance]) -> Scene {
    assert_eq!(pixels.len(), PIXELS);
    let mut scene = Scene::uniform(date(acquired), 5.0, &[]);
    for (i, band) in [Band::Blue, Band::Green, Band::Red, Band::Nir, Band::Swir]
        .into_iter()
        .enumerate()
    {
        let values = pixels.iter().map(|p| Some(p.bands()[i].1)).collect();
        scene.bands.insert(band, BandValues::Pixels(values));
    }
    scene
}

pub fn oracle(scenes: Vec<Scene>, elevation: Option<BandValues>) -> MemoryOracle {
    MemoryOracle::new(MemoryScenario {
        grid: grid(),
        scenes,
        elevation,
    })
    .unwrap()
}

pub fn empty_oracle() -> MemoryOracle {
    oracle(Vec::new(), None)
}

pub fn two_date_oracle(start: Reflectance, end: Reflectance) -> MemoryOracle {
    oracle(
        vec![uniform_scene(START, start), uniform_scene(END, end)],
        None,
    )
}

pub fn request(acquired: &str) -> CompositeRequest {
    CompositeRequest {
        region: region(),
        window: DateWindow::narrow(date(acquired), 1).unwrap(),
        cloud_ceiling: DEFAULT_CLOUD_CEILING,
        sensor: Sensor::Sentinel2,
        method: CompositeMethod::Median,
        cloud_mask: false,
    }
}

pub async fn composite(oracle: &MemoryOracle, acquired: &str) -> CompositeHandle {
    oracle.composite(&request(acquired)).await.unwrap()
}
