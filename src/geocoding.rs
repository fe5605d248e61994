//! Free-text place search through Nominatim (OpenStreetMap).

use anyhow::{Context, Result};
use reqwest::blocking::Client as HttpClient;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

const TIMEOUT: Duration = Duration::from_secs(10);
/// Candidates fetched when looking for a single best city.
const BEST_MATCH_CANDIDATES: usize = 5;
const UNKNOWN: &str = "Unknown";

/// A place as returned to API clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Place {
    pub name: String,
    pub display_name: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    pub region: String,
    pub importance: f64,
    pub place_type: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Address {
    city: Option<String>,
    town: Option<String>,
    village: Option<String>,
    municipality: Option<String>,
    country: Option<String>,
    country_code: Option<String>,
    state: Option<String>,
    province: Option<String>,
    region: Option<String>,
    county: Option<String>,
}

impl Address {
    fn settlement(&self) -> Option<&str> {
        first_of(&[&self.city, &self.town, &self.village])
    }
}

/// Nominatim sends coordinates as strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Number {
    Float(f64),
    Text(String),
}

impl Number {
    fn value(&self) -> f64 {
        match self {
            Number::Float(v) => *v,
            Number::Text(s) => s.trim().parse().unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct SearchHit {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    lat: Option<Number>,
    lon: Option<Number>,
    #[serde(default)]
    importance: Option<f64>,
    #[serde(rename = "type", default)]
    place_type: Option<String>,
    #[serde(default)]
    address: Address,
}

fn first_of<'a>(fields: &[&'a Option<String>]) -> Option<&'a str> {
    fields
        .iter()
        .filter_map(|f| f.as_deref())
        .find(|s| !s.is_empty())
}

impl SearchHit {
    fn into_place(self, query: &str) -> Place {
        let a = &self.address;
        let name = first_of(&[&a.city, &a.town, &a.village, &a.municipality, &self.name])
            .or(self.display_name.as_deref())
            .unwrap_or(UNKNOWN)
            .to_string();
        let country = first_of(&[&a.country, &a.country_code]).unwrap_or(UNKNOWN).to_string();
        let region = first_of(&[&a.state, &a.province, &a.region, &a.county])
            .unwrap_or(UNKNOWN)
            .to_string();

        Place {
            name,
            display_name: self.display_name.clone().unwrap_or_else(|| query.to_string()),
            lat: self.lat.as_ref().map_or(0.0, Number::value),
            lon: self.lon.as_ref().map_or(0.0, Number::value),
            country,
            region,
            importance: self.importance.unwrap_or(0.0),
            place_type: self.place_type.clone().unwrap_or_else(|| "unknown".to_string()),
        }
    }

    /// Settlement type, importance and name matches, weighted.
    fn score(&self, query: &str) -> f64 {
        let query = query.to_lowercase();
        let type_priority = match self.place_type.as_deref().map(str::to_lowercase).as_deref() {
            Some("city") => 3.0,
            Some("town") => 2.0,
            Some("village") => 1.0,
            _ => 0.0,
        };

        let mut score = type_priority * 10.0 + self.importance.unwrap_or(0.0) * 5.0;
        if self
            .display_name
            .as_deref()
            .is_some_and(|d| d.to_lowercase().contains(&query))
        {
            score += 5.0;
        }
        if self
            .address
            .settlement()
            .is_some_and(|s| s.to_lowercase().contains(&query))
        {
            score += 8.0;
        }
        score
    }
}

/// The highest-scoring hit; the earliest wins ties.
fn best_match(hits: Vec<SearchHit>, query: &str) -> Option<SearchHit> {
    let mut best: Option<(f64, SearchHit)> = None;
    for hit in hits {
        let score = hit.score(query);
        if best.as_ref().is_none_or(|(top, _)| score > *top) {
            best = Some((score, hit));
        }
    }
    best.map(|(_, hit)| hit)
}

#[derive(Debug, Clone)]
pub struct Geocoder {
    http: HttpClient,
    url: String,
}

impl Geocoder {
    pub fn new(url: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("co2map/{} (CO2 map backend)", env!("CARGO_PKG_VERSION")))
                .context("invalid User-Agent header")?,
        );
        let http = HttpClient::builder()
            .default_headers(headers)
            .timeout(TIMEOUT)
            .build()
            .context("failed to build geocoding HTTP client")?;
        Ok(Self {
            http,
            url: url.into(),
        })
    }

    /// The single most plausible city for `name`.
    pub fn search_city(&self, name: &str) -> Result<Option<Place>> {
        let hits = self.search(name, BEST_MATCH_CANDIDATES, true)?;
        Ok(best_match(hits, name).map(|hit| hit.into_place(name)))
    }

    /// Up to `limit` places matching `query`, most important first.
    pub fn search_cities(&self, query: &str, limit: usize) -> Result<Vec<Place>> {
        let hits = self.search(query, limit, false)?;
        let mut places: Vec<Place> = hits.into_iter().map(|h| h.into_place(query)).collect();
        places.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        Ok(places)
    }

    fn search(&self, query: &str, limit: usize, dedupe: bool) -> Result<Vec<SearchHit>> {
        let limit = limit.to_string();
        let mut params = vec![
            ("q", query),
            ("format", "json"),
            ("limit", limit.as_str()),
            ("addressdetails", "1"),
            ("class", "place"),
            ("type", "city,town,village"),
        ];
        if dedupe {
            params.push(("dedupe", "1"));
        }

        debug!(query, limit = %limit, "geocoding search");
        let hits = self
            .http
            .get(&self.url)
            .query(&params)
            .send()
            .with_context(|| format!("geocoding request to {} failed", self.url))?
            .error_for_status()
            .context("geocoding service returned an error")?
            .json::<Vec<SearchHit>>()
            .context("failed to parse geocoding response")?;
        debug!(query, hits = hits.len(), "geocoding results");
        Ok(hits)
    }
}
