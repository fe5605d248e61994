//! Decoding downloaded forecast grids and sampling them at a point.

#[cfg(feature = "grib")]
mod grib2;

#[cfg(feature = "grib")]
pub use self::grib2::GribDecoder;

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::ErrorKind;
use crate::geo::{Coordinate, normalize_lon};

/// Variable names under which the carbon-dioxide field may appear.
pub const CO2_VARIABLE_NAMES: [&str; 2] = ["co2", "carbon_dioxide"];

/// Mass fraction (kg/kg) to parts per million.
pub const PPM_PER_MASS_FRACTION: f64 = 1_000_000.0;

#[derive(Debug, thiserror::Error)]
pub enum GridError {
    #[error("no grid-format decoder available (build with the `grib` feature)")]
    DecoderUnavailable,

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {}: {message}", path.display())]
    Decode { path: PathBuf, message: String },

    #[error("no carbon dioxide field in {} (variables: {found})", path.display())]
    MissingVariable { path: PathBuf, found: String },

    #[error("grid in {} has no points", path.display())]
    EmptyGrid { path: PathBuf },

    #[error("messages in {} do not share one grid", path.display())]
    InconsistentGrid { path: PathBuf },
}

impl GridError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            GridError::DecoderUnavailable => ErrorKind::CfgribMissing,
            _ => ErrorKind::ProcessingFailed,
        }
    }
}

/// One decoded field: a variable at one forecast step over a set of grid points.
#[derive(Debug, Clone, PartialEq)]
pub struct GridMessage {
    pub variable: String,
    pub forecast_hour: Option<u32>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub values: Vec<f64>,
}

/// Everything decoded from one artifact.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GridDataset {
    pub messages: Vec<GridMessage>,
    /// Forecast reference time, when the file carries one.
    pub base_time: Option<String>,
}

/// A binary grid format the service can read.
pub trait GridDecoder: Send + Sync {
    fn open(&self, path: &Path) -> Result<GridDataset, GridError>;

    /// Checks that `path` is structurally readable.
    fn validate(&self, path: &Path) -> Result<(), GridError> {
        self.open(path).map(drop)
    }
}

/// The decoder compiled into this build, if any.
pub fn default_decoder() -> Option<Arc<dyn GridDecoder>> {
    #[cfg(feature = "grib")]
    {
        Some(Arc::new(GribDecoder))
    }
    #[cfg(not(feature = "grib"))]
    {
        None
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TimeInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forecast_hours: Option<Vec<String>>,
}

/// CO2 series at the grid cell nearest a requested point.
#[derive(Debug, Clone, PartialEq)]
pub struct GridSample {
    pub values_ppm: Vec<f64>,
    /// Centre of the selected cell.
    pub actual: Coordinate,
    pub time: TimeInfo,
}

/// Reads CO2 samples out of downloaded artifacts.
#[derive(Clone)]
pub struct GridReader {
    decoder: Option<Arc<dyn GridDecoder>>,
}

impl GridReader {
    pub fn new(decoder: Option<Arc<dyn GridDecoder>>) -> Self {
        Self { decoder }
    }

    pub fn has_decoder(&self) -> bool {
        self.decoder.is_some()
    }

    pub fn read(&self, path: &Path, target: Coordinate) -> Result<GridSample, GridError> {
        let decoder = self.decoder.as_ref().ok_or(GridError::DecoderUnavailable)?;
        let dataset = decoder.open(path)?;

        let mut messages: Vec<&GridMessage> = dataset
            .messages
            .iter()
            .filter(|m| CO2_VARIABLE_NAMES.contains(&m.variable.as_str()))
            .collect();
        let Some(first) = messages.first().copied() else {
            let mut found: Vec<&str> = dataset.messages.iter().map(|m| m.variable.as_str()).collect();
            found.sort_unstable();
            found.dedup();
            return Err(GridError::MissingVariable {
                path: path.to_path_buf(),
                found: found.join(", "),
            });
        };
        messages.sort_by_key(|m| m.forecast_hour);

        let index = nearest_index(&first.latitudes, &first.longitudes, target).ok_or_else(|| {
            GridError::EmptyGrid {
                path: path.to_path_buf(),
            }
        })?;
        let actual = Coordinate::new(first.latitudes[index], normalize_lon(first.longitudes[index]));

        let values_ppm = messages
            .iter()
            .map(|m| {
                if m.values.len() != first.values.len() {
                    return None;
                }
                m.values.get(index).map(|v| v * PPM_PER_MASS_FRACTION)
            })
            .collect::<Option<Vec<f64>>>()
            .ok_or_else(|| GridError::InconsistentGrid {
                path: path.to_path_buf(),
            })?;

        let forecast_hours: Vec<String> = messages
            .iter()
            .filter_map(|m| m.forecast_hour)
            .map(|h| h.to_string())
            .collect();

        Ok(GridSample {
            values_ppm,
            actual,
            time: TimeInfo {
                base_time: dataset.base_time.clone(),
                forecast_hours: (!forecast_hours.is_empty()).then_some(forecast_hours),
            },
        })
    }
}

/// Index of the grid point nearest `target`: closest latitude row first, then
/// closest longitude within it. No interpolation.
pub fn nearest_index(latitudes: &[f64], longitudes: &[f64], target: Coordinate) -> Option<usize> {
    // Decoded coordinates are single precision; compare at 1e-4 degree resolution so
    // points on one row rank as equal in latitude.
    let quantize = |x: f64| (x * 1e4).round();
    let key = |i: usize| {
        let dlat = quantize((latitudes[i] - target.lat).abs());
        let d = (normalize_lon(longitudes[i]) - target.lon).abs();
        let dlon = quantize(d.min(360.0 - d));
        (dlat, dlon)
    };

    (0..latitudes.len().min(longitudes.len())).min_by(|&a, &b| {
        let (a_lat, a_lon) = key(a);
        let (b_lat, b_lon) = key(b);
        a_lat.total_cmp(&b_lat).then(a_lon.total_cmp(&b_lon))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// 3x3 grid at 0.4 degrees around Lima, longitudes in 0..360 form.
    fn lima_grid(variable: &str, hour: u32, fractions: [f64; 9]) -> GridMessage {
        let lats = [-11.6, -12.0, -12.4];
        let lons = [282.6, 283.0, 283.4];
        let mut latitudes = Vec::new();
        let mut longitudes = Vec::new();
        for lat in lats {
            for lon in lons {
                latitudes.push(lat);
                longitudes.push(lon);
            }
        }
        GridMessage {
            variable: variable.to_string(),
            forecast_hour: Some(hour),
            latitudes,
            longitudes,
            values: fractions.to_vec(),
        }
    }

    fn centre_only(fraction: f64) -> [f64; 9] {
        let mut v = [1e-3; 9];
        v[4] = fraction;
        v
    }

    struct FakeDecoder {
        dataset: GridDataset,
        opened: Mutex<Vec<PathBuf>>,
    }

    impl GridDecoder for FakeDecoder {
        fn open(&self, path: &Path) -> Result<GridDataset, GridError> {
            self.opened.lock().unwrap().push(path.to_path_buf());
            Ok(self.dataset.clone())
        }
    }

    fn reader(dataset: GridDataset) -> GridReader {
        GridReader::new(Some(Arc::new(FakeDecoder {
            dataset,
            opened: Mutex::new(Vec::new()),
        })))
    }

    const LIMA: Coordinate = Coordinate { lat: -12.0464, lon: -77.0428 };

    #[test]
    fn picks_nearest_cell_and_converts_to_ppm() {
        let dataset = GridDataset {
            messages: vec![
                lima_grid("co2", 24, centre_only(0.000410)),
                lima_grid("co2", 0, centre_only(0.000395)),
                lima_grid("co2", 12, centre_only(0.000402)),
            ],
            base_time: Some("2025-03-01T00:00:00".to_string()),
        };

        let sample = reader(dataset).read(Path::new("x.grib"), LIMA).unwrap();

        let expected = [395.0, 402.0, 410.0];
        assert_eq!(sample.values_ppm.len(), 3);
        for (got, want) in sample.values_ppm.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} vs {want}");
        }
        assert_eq!(sample.actual, Coordinate::new(-12.0, -77.0));
        assert_eq!(
            sample.time.forecast_hours,
            Some(vec!["0".to_string(), "12".to_string(), "24".to_string()])
        );
        assert_eq!(sample.time.base_time.as_deref(), Some("2025-03-01T00:00:00"));
    }

    #[test]
    fn accepts_long_variable_name_and_ignores_others() {
        let dataset = GridDataset {
            messages: vec![
                lima_grid("t", 0, centre_only(290.0)),
                lima_grid("carbon_dioxide", 0, centre_only(0.0004)),
            ],
            base_time: None,
        };
        let sample = reader(dataset).read(Path::new("x.grib"), LIMA).unwrap();
        assert_eq!(sample.values_ppm.len(), 1);
        assert!((sample.values_ppm[0] - 400.0).abs() < 1e-9);
        assert_eq!(sample.time.base_time, None);
    }

    #[test]
    fn missing_variable_is_processing_failure() {
        let dataset = GridDataset {
            messages: vec![lima_grid("ch4", 0, [1.8e-6; 9])],
            base_time: None,
        };
        let err = reader(dataset).read(Path::new("x.grib"), LIMA).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessingFailed);
        assert!(err.to_string().contains("ch4"));
    }

    #[test]
    fn no_decoder_is_reported_as_missing_format_support() {
        let err = GridReader::new(None)
            .read(Path::new("x.grib"), LIMA)
            .unwrap_err();
        assert!(matches!(err, GridError::DecoderUnavailable));
        assert_eq!(err.kind(), ErrorKind::CfgribMissing);
    }

    #[test]
    fn mismatched_message_sizes_are_rejected() {
        let mut short = lima_grid("co2", 12, centre_only(0.0004));
        short.values.truncate(4);
        let dataset = GridDataset {
            messages: vec![lima_grid("co2", 0, centre_only(0.0004)), short],
            base_time: None,
        };
        let err = reader(dataset).read(Path::new("x.grib"), LIMA).unwrap_err();
        assert!(matches!(err, GridError::InconsistentGrid { .. }));
    }

    #[test]
    fn nearest_index_prefers_latitude_then_longitude() {
        let g = lima_grid("co2", 0, [0.0; 9]);
        assert_eq!(nearest_index(&g.latitudes, &g.longitudes, LIMA), Some(4));
        assert_eq!(
            nearest_index(&g.latitudes, &g.longitudes, Coordinate::new(-11.5, -77.5)),
            Some(0)
        );
        assert_eq!(
            nearest_index(&g.latitudes, &g.longitudes, Coordinate::new(-13.0, -76.0)),
            Some(8)
        );
        assert_eq!(nearest_index(&[], &[], LIMA), None);
    }

    #[test]
    fn nearest_index_wraps_across_the_antimeridian() {
        let lats = [0.0, 0.0, 0.0];
        let lons = [179.5, 0.0, 90.0];
        assert_eq!(nearest_index(&lats, &lons, Coordinate::new(0.0, -179.8)), Some(0));
    }
}
