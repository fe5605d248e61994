//! Route handlers: each returns an HTTP status and a `{"success": ..}` JSON body.

use anyhow::Result;
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::{error, warn};

use crate::cities;
use crate::config::{CredentialOrigin, Env, USER_ID_VAR};
use crate::error::ErrorKind;
use crate::geo::Coordinate;
use crate::geocoding::Geocoder;
use crate::pipeline::{Co2Error, Co2Pipeline};
use crate::settings::Settings;
use crate::weather::{WeatherClient, WeatherError};

pub const DEFAULT_SEARCH_LIMIT: usize = 5;
pub const MAX_SEARCH_LIMIT: usize = 10;
pub const CUSTOM_LOCATION_LABEL: &str = "Ubicación personalizada";

#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    pub fn ok(mut body: Value) -> Self {
        if let Value::Object(map) = &mut body {
            map.insert("success".to_string(), Value::Bool(true));
        }
        Self { status: 200, body }
    }

    pub fn error(status: u16, error: impl Into<Value>) -> Self {
        Self {
            status,
            body: json!({ "success": false, "error": error.into() }),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// User-facing message for a failed CO2 lookup.
fn localized_message(err: &Co2Error) -> String {
    match err.error_kind {
        Some(ErrorKind::CredentialsMissing) => "Faltan credenciales de Copernicus/ADS (.cdsapirc)".to_string(),
        Some(ErrorKind::AuthError) => "Token de Copernicus inválido o no autorizado".to_string(),
        Some(ErrorKind::TermsError) => {
            "Debes aceptar los términos del dataset en ADS antes de descargar".to_string()
        }
        Some(ErrorKind::QuotaError) => "Cuota de descarga excedida, intenta más tarde".to_string(),
        Some(ErrorKind::Connection | ErrorKind::Timeout) => {
            "Problema de conexión/timeout con la API de Copernicus".to_string()
        }
        _ => err.error.clone(),
    }
}

pub fn co2_error_response(err: &Co2Error) -> ApiResponse {
    let status = err.error_kind.map_or(500, ErrorKind::http_status);
    ApiResponse {
        status,
        body: json!({
            "success": false,
            "error": localized_message(err),
            "error_kind": err.error_kind,
        }),
    }
}

pub struct Api {
    pipeline: Co2Pipeline,
    geocoder: Geocoder,
    weather: WeatherClient,
    env: Arc<dyn Env>,
}

impl Api {
    pub fn new(pipeline: Co2Pipeline, geocoder: Geocoder, weather: WeatherClient, env: Arc<dyn Env>) -> Self {
        Self {
            pipeline,
            geocoder,
            weather,
            env,
        }
    }

    pub fn from_settings(settings: &Settings, env: Arc<dyn Env>) -> Result<Self> {
        let pipeline = Co2Pipeline::from_settings(settings, env.clone());
        let geocoder = Geocoder::new(settings.nominatim_url.clone())?;
        let weather = WeatherClient::new(settings.openweathermap_key.clone())?;
        Ok(Self::new(pipeline, geocoder, weather, env))
    }

    pub fn cities(&self) -> ApiResponse {
        let keys: Vec<&str> = cities::keys().collect();
        ApiResponse::ok(json!({ "cities": keys }))
    }

    /// Predefined cities first, then geocoding.
    pub fn city_coordinates(&self, name: &str) -> ApiResponse {
        if let Some(city) = cities::lookup(name) {
            return ApiResponse::ok(json!({ "city": city, "source": "predefined" }));
        }
        match self.geocoder.search_city(name) {
            Ok(Some(place)) => ApiResponse::ok(json!({ "city": place, "source": "geocoding" })),
            Ok(None) => ApiResponse::error(404, "Ciudad no encontrada"),
            Err(e) => {
                warn!(city = name, error = %format!("{:#}", e), "city search failed");
                ApiResponse::error(404, "Ciudad no encontrada")
            }
        }
    }

    pub fn search_cities(&self, query: &str, limit: Option<usize>) -> ApiResponse {
        let query = query.trim();
        if query.is_empty() {
            return ApiResponse::error(400, "Parámetro de búsqueda requerido");
        }
        let limit = limit.unwrap_or(DEFAULT_SEARCH_LIMIT).clamp(1, MAX_SEARCH_LIMIT);

        let places = self.geocoder.search_cities(query, limit).unwrap_or_else(|e| {
            warn!(query, error = %format!("{:#}", e), "city search failed");
            Vec::new()
        });
        ApiResponse::ok(json!({ "cities": places, "query": query }))
    }

    pub fn co2_for_city(&self, name: &str, date: Option<&str>, hours: &[String]) -> ApiResponse {
        let Some(city) = cities::lookup(name) else {
            return ApiResponse::error(404, format!("Ciudad \"{}\" no encontrada", name));
        };
        match self.pipeline.get_co2(city.name, city.lat, city.lon, date, hours) {
            Ok(result) => ApiResponse::ok(json!({ "data": result })),
            Err(err) => {
                error!(city = city.name, kind = ?err.error_kind, error = %err.error, "CO2 lookup failed");
                co2_error_response(&err)
            }
        }
    }

    pub fn co2_custom(
        &self,
        lat: Option<f64>,
        lon: Option<f64>,
        label: Option<&str>,
        date: Option<&str>,
        hours: &[String],
    ) -> ApiResponse {
        let (Some(lat), Some(lon)) = (lat, lon) else {
            return ApiResponse::error(400, "Se requieren parámetros lat y lon");
        };
        if !Coordinate::new(lat, lon).is_valid() {
            return ApiResponse::error(400, "Coordenadas fuera de rango válido");
        }

        let label = label.unwrap_or(CUSTOM_LOCATION_LABEL);
        match self.pipeline.get_co2(label, lat, lon, date, hours) {
            Ok(result) => ApiResponse::ok(json!({ "data": result })),
            Err(err) => {
                error!(lat, lon, kind = ?err.error_kind, error = %err.error, "CO2 lookup failed");
                ApiResponse::error(500, format!("Error general: {}", err.error))
            }
        }
    }

    pub fn weather(&self, lat: Option<f64>, lon: Option<f64>) -> ApiResponse {
        let (Some(lat), Some(lon)) = (lat, lon) else {
            return ApiResponse::error(400, "Parámetros lat y lon requeridos");
        };
        match self.weather.fetch(lat, lon) {
            Ok(report) => ApiResponse::ok(json!({
                "weather": report.weather,
                "forecast": report.forecast,
                "air_quality": report.air_quality,
            })),
            Err(WeatherError::MissingKey) => ApiResponse::error(500, WeatherError::MissingKey.to_string()),
            Err(WeatherError::Upstream { status, body }) => ApiResponse::error(status, body),
            Err(e @ WeatherError::Transport { .. }) => {
                warn!(error = %e, "weather request failed");
                ApiResponse::error(502, e.to_string())
            }
        }
    }

    /// Which integrations are configured. Never reveals secrets.
    pub fn health(&self) -> ApiResponse {
        let credentials = self.pipeline.retriever().resolver().find();
        let source = match credentials.as_ref().map(|c| &c.origin) {
            Some(CredentialOrigin::Environment) => "env",
            Some(CredentialOrigin::File(_)) => "cdsapirc",
            None => "none",
        };

        ApiResponse::ok(json!({
            "health": {
                "cds": {
                    "url_present": credentials.as_ref().is_some_and(|c| !c.url.is_empty()),
                    "key_present": credentials.as_ref().is_some_and(|c| !c.key.is_empty()),
                    "key_has_uid": credentials.as_ref().is_some_and(|c| c.has_user_id()),
                    "uid_env_present": self.env.var(USER_ID_VAR).is_some(),
                    "source": source,
                },
                "cfgrib_available": self.pipeline.reader().has_decoder(),
                "openweathermap_key_present": self.weather.has_key(),
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialResolver, Credentials, EnvSource};
    use crate::error::ProviderError;
    use crate::grid::GridReader;
    use crate::provider::{ForecastRequest, GridProvider};
    use crate::retriever::{GridRetriever, RetryPolicy};
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProvider(AtomicUsize);

    impl GridProvider for CountingProvider {
        fn retrieve(&self, _: &Credentials, _: &ForecastRequest, _: &Path) -> Result<(), ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(ProviderError::QuotaExceeded {
                message: "too many requests".to_string(),
            })
        }
    }

    fn test_api(env_pairs: &[(&str, &str)], dir: &Path) -> (Api, Arc<CountingProvider>) {
        let env: HashMap<String, String> = env_pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let env: Arc<dyn Env> = Arc::new(env);
        let provider = Arc::new(CountingProvider(AtomicUsize::new(0)));
        let resolver = Arc::new(CredentialResolver::new(env.clone(), vec![Box::new(EnvSource)]));
        let retriever = GridRetriever::new(resolver, provider.clone(), None, dir)
            .with_policy(RetryPolicy::immediate());
        let pipeline = Co2Pipeline::new(retriever, GridReader::new(None));
        // Unroutable endpoints; none of these tests reach the network.
        let geocoder = Geocoder::new("http://127.0.0.1:9/search").unwrap();
        let weather = WeatherClient::with_base_url("http://127.0.0.1:9", None).unwrap();
        (Api::new(pipeline, geocoder, weather, env), provider)
    }

    const CREDS: [(&str, &str); 2] = [("CDSAPI_URL", "https://ads.example/api"), ("CDSAPI_KEY", "token")];

    #[test]
    fn kind_maps_to_status_and_message() {
        let cases = [
            (Some(ErrorKind::CredentialsMissing), 400, "Faltan credenciales"),
            (Some(ErrorKind::AuthError), 400, "Token de Copernicus"),
            (Some(ErrorKind::TermsError), 400, "aceptar los términos"),
            (Some(ErrorKind::QuotaError), 429, "Cuota"),
            (Some(ErrorKind::Connection), 502, "conexión"),
            (Some(ErrorKind::Timeout), 502, "timeout"),
            (Some(ErrorKind::ProcessingFailed), 500, "raw message"),
            (Some(ErrorKind::CfgribMissing), 500, "raw message"),
            (None, 500, "raw message"),
        ];
        for (kind, status, fragment) in cases {
            let resp = co2_error_response(&Co2Error::new(kind, "raw message"));
            assert_eq!(resp.status, status, "{:?}", kind);
            assert_eq!(resp.body["success"], json!(false));
            assert!(resp.body["error"].as_str().unwrap().contains(fragment), "{:?}", kind);
            assert_eq!(resp.body["error_kind"], json!(kind));
        }
    }

    #[test]
    fn lists_city_keys() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = test_api(&[], dir.path());
        let resp = api.cities();
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["success"], json!(true));
        assert_eq!(resp.body["cities"].as_array().unwrap().len(), 8);
    }

    #[test]
    fn predefined_city_needs_no_geocoding() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = test_api(&[], dir.path());
        let resp = api.city_coordinates("Arequipa");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body["source"], "predefined");
        assert_eq!(resp.body["city"]["region"], "Arequipa");
    }

    #[test]
    fn unknown_city_is_404_without_download() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, provider) = test_api(&CREDS, dir.path());
        let resp = api.co2_for_city("Atlantis", None, &[]);
        assert_eq!(resp.status, 404);
        assert!(resp.body["error"].as_str().unwrap().contains("Atlantis"));
        assert_eq!(provider.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn quota_failure_is_429() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, provider) = test_api(&CREDS, dir.path());
        let resp = api.co2_for_city("lima", Some("2025-03-01"), &[]);
        assert_eq!(resp.status, 429);
        assert_eq!(resp.body["error_kind"], "quota_error");
        assert_eq!(provider.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn missing_credentials_is_400() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, provider) = test_api(&[], dir.path());
        let resp = api.co2_for_city("cusco", None, &[]);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error_kind"], "credentials_missing");
        assert_eq!(provider.0.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn custom_point_validation() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, provider) = test_api(&CREDS, dir.path());
        assert_eq!(api.co2_custom(None, Some(-77.0), None, None, &[]).status, 400);
        assert_eq!(api.co2_custom(Some(-12.0), None, None, None, &[]).status, 400);
        let resp = api.co2_custom(Some(95.0), Some(-77.0), None, None, &[]);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body["error"], "Coordenadas fuera de rango válido");
        assert_eq!(api.co2_custom(Some(0.0), Some(181.0), None, None, &[]).status, 400);
        assert_eq!(provider.0.load(Ordering::SeqCst), 0);

        let resp = api.co2_custom(Some(-12.0), Some(-77.0), Some("Callao"), None, &[]);
        assert_eq!(resp.status, 500);
        assert!(resp.body["error"].as_str().unwrap().starts_with("Error general:"));
    }

    #[test]
    fn empty_search_is_400() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = test_api(&[], dir.path());
        assert_eq!(api.search_cities("   ", None).status, 400);
    }

    #[test]
    fn weather_requires_point_and_key() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = test_api(&[], dir.path());
        assert_eq!(api.weather(None, Some(1.0)).status, 400);
        let resp = api.weather(Some(-12.0), Some(-77.0));
        assert_eq!(resp.status, 500);
        assert!(resp.body["error"].as_str().unwrap().contains("OPENWEATHERMAP_API_KEY"));
    }

    #[test]
    fn health_reports_configuration() {
        let dir = tempfile::TempDir::new().unwrap();
        let (api, _) = test_api(&[CREDS[0], CREDS[1], ("CDSAPI_USER_ID", "42")], dir.path());
        let health = &api.health().body["health"];
        assert_eq!(health["cds"]["source"], "env");
        assert_eq!(health["cds"]["url_present"], true);
        assert_eq!(health["cds"]["key_present"], true);
        assert_eq!(health["cds"]["key_has_uid"], false);
        assert_eq!(health["cds"]["uid_env_present"], true);
        assert_eq!(health["cfgrib_available"], false);
        assert_eq!(health["openweathermap_key_present"], false);

        let (api, _) = test_api(&[], dir.path());
        assert_eq!(api.health().body["health"]["cds"]["source"], "none");
    }
}
