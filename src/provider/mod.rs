//! Access to the Copernicus Atmosphere Data Store.

mod client;
mod jobs;
mod util;

pub use client::{Client, ClientOptions};
pub use jobs::RemoteFile;

use serde::Serialize;
use std::path::Path;

use crate::config::Credentials;
use crate::error::ProviderError;

/// CAMS global greenhouse-gas forecasts.
pub const CAMS_GHG_DATASET: &str = "cams-global-greenhouse-gas-forecasts";

/// Parameters of one forecast retrieval, in the data store's request vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastRequest {
    #[serde(skip)]
    pub dataset: String,
    pub variable: Vec<String>,
    pub model_level: Vec<String>,
    /// Single-day window, `YYYY-MM-DD/YYYY-MM-DD`.
    pub date: Vec<String>,
    pub leadtime_hour: Vec<String>,
    /// North, west, south, east.
    pub area: [f64; 4],
    pub format: String,
}

/// Something that can fetch a forecast request into a local file.
pub trait GridProvider: Send + Sync {
    fn retrieve(
        &self,
        credentials: &Credentials,
        request: &ForecastRequest,
        target: &Path,
    ) -> Result<(), ProviderError>;
}

/// [`GridProvider`] backed by the data store's HTTP API.
#[derive(Debug, Clone, Default)]
pub struct AdsProvider {
    options: ClientOptions,
}

impl AdsProvider {
    pub fn new(options: ClientOptions) -> Self {
        Self { options }
    }
}

impl GridProvider for AdsProvider {
    fn retrieve(
        &self,
        credentials: &Credentials,
        request: &ForecastRequest,
        target: &Path,
    ) -> Result<(), ProviderError> {
        let client = Client::new(credentials, self.options.clone())?;
        client.retrieve(&request.dataset, request, target)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_serializes_without_dataset() {
        let req = ForecastRequest {
            dataset: CAMS_GHG_DATASET.to_string(),
            variable: vec!["carbon_dioxide".to_string()],
            model_level: vec!["137".to_string()],
            date: vec!["2025-03-01/2025-03-01".to_string()],
            leadtime_hour: vec!["0".to_string(), "12".to_string()],
            area: [1.5, -1.5, 0.5, 0.5],
            format: "grib".to_string(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "variable": ["carbon_dioxide"],
                "model_level": ["137"],
                "date": ["2025-03-01/2025-03-01"],
                "leadtime_hour": ["0", "12"],
                "area": [1.5, -1.5, 0.5, 0.5],
                "format": "grib"
            })
        );
    }
}
