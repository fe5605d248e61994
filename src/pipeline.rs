//! End-to-end CO2 lookup for one point: download, sample, classify.

use chrono::{Days, Local, NaiveDate};
use serde::Serialize;
use serde_json::{Value, json};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{CredentialResolver, Env};
use crate::error::ErrorKind;
use crate::geo::{Coordinate, haversine_km};
use crate::grid::{GridReader, TimeInfo, default_decoder};
use crate::provider::{AdsProvider, ClientOptions};
use crate::retriever::{GridRetriever, RetrievalError};
use crate::settings::Settings;
use crate::thresholds::{Co2Status, buffer_radius, classify};

/// Days subtracted from today when no usable date is given. Recent days are often
/// not yet published.
pub const DEFAULT_DATE_LAG_DAYS: u64 = 7;

pub const DEFAULT_LEADTIMES: [&str; 3] = ["0", "12", "24"];

pub fn default_leadtimes() -> Vec<String> {
    DEFAULT_LEADTIMES.iter().map(|h| h.to_string()).collect()
}

/// Parses `YYYY-MM-DD`; anything else falls back to `today` minus the default lag.
pub fn normalize_date(input: Option<&str>, today: NaiveDate) -> NaiveDate {
    let fallback = || today.checked_sub_days(Days::new(DEFAULT_DATE_LAG_DAYS)).unwrap_or(today);
    match input.map(str::trim).filter(|s| !s.is_empty()) {
        Some(raw) => NaiveDate::parse_from_str(raw, "%Y-%m-%d").unwrap_or_else(|_| {
            debug!(input = raw, "unparseable date, using default");
            fallback()
        }),
        None => fallback(),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Coordinates {
    pub target_lat: f64,
    pub target_lon: f64,
    pub actual_lat: f64,
    pub actual_lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Co2Data {
    pub values_ppm: Vec<f64>,
    pub average_ppm: f64,
    pub min_ppm: f64,
    pub max_ppm: f64,
}

impl Co2Data {
    /// Statistics over the finite values; masked cells decode as NaN and are
    /// skipped. `None` when no value is usable.
    pub fn from_values(values_ppm: Vec<f64>) -> Option<Self> {
        let finite: Vec<f64> = values_ppm.iter().copied().filter(|v| v.is_finite()).collect();
        if finite.is_empty() {
            return None;
        }
        if finite.len() < values_ppm.len() {
            debug!(
                skipped = values_ppm.len() - finite.len(),
                "ignoring missing values in CO2 series"
            );
        }
        let sum: f64 = finite.iter().sum();
        let min_ppm = finite.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ppm = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        Some(Self {
            average_ppm: sum / finite.len() as f64,
            min_ppm,
            max_ppm,
            values_ppm,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusInfo {
    #[serde(flatten)]
    pub status: Co2Status,
    /// Metres.
    pub buffer_radius: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Co2Result {
    pub city: String,
    pub coordinates: Coordinates,
    pub co2_data: Co2Data,
    pub co2_status: StatusInfo,
    pub time_info: TimeInfo,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, thiserror::Error)]
#[error("{error}")]
pub struct Co2Error {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl Co2Error {
    pub fn new(kind: Option<ErrorKind>, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            error_kind: kind,
        }
    }
}

impl From<RetrievalError> for Co2Error {
    fn from(err: RetrievalError) -> Self {
        Self::new(err.kind, err.message)
    }
}

pub struct Co2Pipeline {
    retriever: GridRetriever,
    reader: GridReader,
}

impl Co2Pipeline {
    pub fn new(retriever: GridRetriever, reader: GridReader) -> Self {
        Self { retriever, reader }
    }

    /// The production wiring: data-store provider, standard credential chain and
    /// whichever grid decoder this build has.
    pub fn from_settings(settings: &Settings, env: Arc<dyn Env>) -> Self {
        let decoder = default_decoder();
        if decoder.is_none() {
            warn!("built without a grid decoder; CO2 lookups will fail");
        }
        let provider = AdsProvider::new(ClientOptions {
            timeout: settings.provider_timeout,
            progress: settings.progress,
            ..ClientOptions::default()
        });
        let retriever = GridRetriever::new(
            Arc::new(CredentialResolver::standard(env)),
            Arc::new(provider),
            decoder.clone(),
            settings.work_dir.clone(),
        );
        Self::new(retriever, GridReader::new(decoder))
    }

    pub fn retriever(&self) -> &GridRetriever {
        &self.retriever
    }

    pub fn reader(&self) -> &GridReader {
        &self.reader
    }

    /// CO2 forecast near (`lat`, `lon`).
    ///
    /// An empty `leadtimes` means [`DEFAULT_LEADTIMES`]. The downloaded artifact is
    /// removed before returning, whatever the outcome.
    pub fn get_co2(
        &self,
        city: &str,
        lat: f64,
        lon: f64,
        date: Option<&str>,
        leadtimes: &[String],
    ) -> Result<Co2Result, Co2Error> {
        let target = Coordinate::new(lat, lon);
        if !target.is_valid() {
            return Err(Co2Error::new(
                None,
                format!("coordinates out of range: {}, {}", lat, lon),
            ));
        }

        let date = normalize_date(date, Local::now().date_naive());
        let defaults;
        let leadtimes = if leadtimes.is_empty() {
            defaults = default_leadtimes();
            &defaults[..]
        } else {
            leadtimes
        };
        info!(city, lat, lon, %date, ?leadtimes, "fetching CO2 forecast");

        let path = self.retriever.retrieve(target, date, leadtimes)?;
        let read = self.reader.read(&path, target);
        remove_artifact(&path);

        let sample = read.map_err(|e| Co2Error::new(Some(e.kind()), e.to_string()))?;
        let co2_data = Co2Data::from_values(sample.values_ppm).ok_or_else(|| {
            Co2Error::new(
                Some(ErrorKind::ProcessingFailed),
                "no valid CO2 values at the selected grid point",
            )
        })?;

        let average = co2_data.average_ppm;
        let result = Co2Result {
            city: city.to_string(),
            coordinates: Coordinates {
                target_lat: lat,
                target_lon: lon,
                actual_lat: sample.actual.lat,
                actual_lon: sample.actual.lon,
            },
            co2_status: StatusInfo {
                status: classify(average),
                buffer_radius: buffer_radius(average),
            },
            co2_data,
            time_info: sample.time,
            distance_km: haversine_km(target, sample.actual),
        };
        info!(city, average_ppm = average, tier = ?result.co2_status.status.tier, "CO2 lookup done");
        Ok(result)
    }

    /// [`get_co2`](Self::get_co2) as a JSON object: the result fields, or
    /// `{"error", "error_kind"}`.
    pub fn get_co2_data_for_city(
        &self,
        city: &str,
        lat: f64,
        lon: f64,
        date: Option<&str>,
        leadtimes: &[String],
    ) -> Value {
        let outcome = match self.get_co2(city, lat, lon, date, leadtimes) {
            Ok(result) => serde_json::to_value(result),
            Err(err) => serde_json::to_value(err),
        };
        outcome.unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }
}

fn remove_artifact(path: &Path) {
    match fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed artifact"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove artifact"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn normalizes_dates() {
        let today = day(2025, 3, 10);
        assert_eq!(normalize_date(Some("2025-01-31"), today), day(2025, 1, 31));
        assert_eq!(normalize_date(Some(" 2025-01-31 "), today), day(2025, 1, 31));
        assert_eq!(normalize_date(Some("31/01/2025"), today), day(2025, 3, 3));
        assert_eq!(normalize_date(Some("2025-02-30"), today), day(2025, 3, 3));
        assert_eq!(normalize_date(Some(""), today), day(2025, 3, 3));
        assert_eq!(normalize_date(None, today), day(2025, 3, 3));
    }

    #[test]
    fn stats_over_series() {
        let data = Co2Data::from_values(vec![395.0, 402.0, 410.0]).unwrap();
        assert!((data.average_ppm - 402.333_333).abs() < 1e-5);
        assert_eq!(data.min_ppm, 395.0);
        assert_eq!(data.max_ppm, 410.0);
        assert!(Co2Data::from_values(Vec::new()).is_none());
    }

    #[test]
    fn missing_values_are_left_out_of_stats() {
        let data = Co2Data::from_values(vec![f64::NAN, 420.0, 440.0]).unwrap();
        assert_eq!(data.average_ppm, 430.0);
        assert_eq!(data.min_ppm, 420.0);
        assert_eq!(data.max_ppm, 440.0);
        assert_eq!(data.values_ppm.len(), 3);
        assert!(Co2Data::from_values(vec![f64::NAN, f64::INFINITY]).is_none());
    }

    #[test]
    fn error_serializes_kind_only_when_known() {
        let known = Co2Error::new(Some(ErrorKind::QuotaError), "quota");
        assert_eq!(
            serde_json::to_value(&known).unwrap(),
            json!({ "error": "quota", "error_kind": "quota_error" })
        );
        let generic = Co2Error::new(None, "boom");
        assert_eq!(serde_json::to_value(&generic).unwrap(), json!({ "error": "boom" }));
    }

    #[test]
    fn status_info_flattens_status() {
        let info = StatusInfo {
            status: classify(380.0),
            buffer_radius: 5000,
        };
        assert_eq!(
            serde_json::to_value(&info).unwrap(),
            json!({
                "tier": "good",
                "color": "#28a745",
                "label": "Bueno",
                "description": "Concentración normal de CO2",
                "buffer_radius": 5000
            })
        );
    }
}
