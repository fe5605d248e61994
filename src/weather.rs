//! OpenWeatherMap current weather, forecast and air quality.

use reqwest::blocking::Client as HttpClient;
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_BASE_URL: &str = "https://api.openweathermap.org/data/2.5";
const TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum WeatherError {
    #[error("OPENWEATHERMAP_API_KEY no configurada en el entorno")]
    MissingKey,

    /// The upstream answered with an error status; its body is passed through.
    #[error("OpenWeatherMap returned HTTP {status}")]
    Upstream { status: u16, body: Value },

    #[error("OpenWeatherMap request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Label and color of an OpenWeatherMap air quality index.
pub fn aqi_label_and_color(aqi: Option<u64>) -> (&'static str, &'static str) {
    match aqi {
        Some(1) => ("Verde (Buena)", "#00E400"),
        Some(2) => ("Amarillo (Moderada)", "#FFFF00"),
        Some(3) => ("Naranja (Insalubre para grupos sensibles)", "#FF7E00"),
        Some(4) => ("Rojo (Insalubre)", "#FF0000"),
        Some(5) => ("Morado (Muy insalubre)", "#8F3F97"),
        Some(6) => ("Granate (Peligroso)", "#7E0023"),
        _ => ("Desconocido", "#6B7280"),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AirQuality {
    pub aqi: Option<u64>,
    pub label: &'static str,
    pub color: &'static str,
    pub components: Value,
}

impl AirQuality {
    /// Reads the first entry of an `/air_pollution` response.
    pub fn from_response(body: &Value) -> Self {
        let first = body.get("list").and_then(Value::as_array).and_then(|l| l.first());
        let aqi = first
            .and_then(|entry| entry.pointer("/main/aqi"))
            .and_then(Value::as_u64);
        let components = first
            .and_then(|entry| entry.get("components"))
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        let (label, color) = aqi_label_and_color(aqi);
        Self {
            aqi,
            label,
            color,
            components,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WeatherReport {
    pub weather: Value,
    pub forecast: Value,
    pub air_quality: AirQuality,
}

#[derive(Debug, Clone)]
pub struct WeatherClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<String>,
}

impl WeatherClient {
    pub fn new(api_key: Option<String>) -> Result<Self, WeatherError> {
        Self::with_base_url(DEFAULT_BASE_URL, api_key)
    }

    pub fn with_base_url(base_url: impl Into<String>, api_key: Option<String>) -> Result<Self, WeatherError> {
        let base_url = base_url.into();
        let http = HttpClient::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|source| WeatherError::Transport {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    pub fn has_key(&self) -> bool {
        self.api_key.is_some()
    }

    pub fn fetch(&self, lat: f64, lon: f64) -> Result<WeatherReport, WeatherError> {
        let key = self.api_key.as_deref().ok_or(WeatherError::MissingKey)?;
        let localized = [("units", "metric"), ("lang", "es")];

        let weather = self.get("weather", lat, lon, key, &localized)?;
        let forecast = self.get("forecast", lat, lon, key, &localized)?;
        let pollution = self.get("air_pollution", lat, lon, key, &[])?;

        Ok(WeatherReport {
            weather,
            forecast,
            air_quality: AirQuality::from_response(&pollution),
        })
    }

    fn get(
        &self,
        endpoint: &str,
        lat: f64,
        lon: f64,
        key: &str,
        extra: &[(&str, &str)],
    ) -> Result<Value, WeatherError> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint);
        let transport = |source| WeatherError::Transport {
            url: url.clone(),
            source,
        };

        debug!(endpoint, lat, lon, "OpenWeatherMap request");
        let resp = self
            .http
            .get(&url)
            .query(&[("lat", lat.to_string()), ("lon", lon.to_string()), ("appid", key.to_string())])
            .query(extra)
            .send()
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().unwrap_or_default();
            let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
            return Err(WeatherError::Upstream {
                status: status.as_u16(),
                body,
            });
        }
        resp.json::<Value>().map_err(transport)
    }
}
