//! Backend for a CO2 concentration map.
//!
//! Given a city or a point, the crate downloads a CAMS global greenhouse-gas forecast
//! for the surrounding area from the Copernicus Atmosphere Data Store, samples the grid
//! cell nearest the point, and classifies the concentration for display.
//!
//! ## Quick start
//! - Configure data-store access via environment variables (`CDSAPI_URL`, `CDSAPI_KEY`,
//!   optionally `CDSAPI_USER_ID`) or a `.cdsapirc` file.
//! - Build a [`Co2Pipeline`] and call [`Co2Pipeline::get_co2`].
//!
//! ```no_run
//! use std::sync::Arc;
//! use co2map::{Co2Pipeline, ProcessEnv, Settings};
//!
//! let env = Arc::new(ProcessEnv);
//! let settings = Settings::from_env(env.as_ref());
//! let pipeline = Co2Pipeline::from_settings(&settings, env);
//! match pipeline.get_co2("Lima", -12.0464, -77.0428, None, &[]) {
//!     Ok(result) => println!("{:.1} ppm", result.co2_data.average_ppm),
//!     Err(err) => eprintln!("{} ({:?})", err, err.error_kind),
//! }
//! ```
//!
//! The [`api`] module wraps the pipeline, the city table, geocoding and the weather
//! proxy in route-shaped handlers returning a status code and a JSON body.

#![forbid(unsafe_code)]

pub mod api;
pub mod cities;
pub mod config;
pub mod error;
pub mod geo;
pub mod geocoding;
pub mod grid;
pub mod pipeline;
pub mod provider;
pub mod retriever;
pub mod settings;
pub mod thresholds;
pub mod weather;

pub use config::{CredentialResolver, Credentials, Env, ProcessEnv};
pub use error::{ErrorKind, ProviderError};
pub use geo::{Coordinate, haversine_km};
pub use grid::{GridDecoder, GridReader};
pub use pipeline::{Co2Error, Co2Pipeline, Co2Result};
pub use provider::{AdsProvider, GridProvider};
pub use retriever::{GridRetriever, RetryPolicy};
pub use settings::Settings;
