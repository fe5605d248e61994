use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::config::Env;

pub const WORK_DIR_VAR: &str = "CO2MAP_WORK_DIR";
pub const PROVIDER_TIMEOUT_VAR: &str = "CO2MAP_PROVIDER_TIMEOUT";
pub const OPENWEATHERMAP_KEY_VAR: &str = "OPENWEATHERMAP_API_KEY";
pub const NOMINATIM_URL_VAR: &str = "NOMINATIM_URL";

pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(300);
pub const DEFAULT_NOMINATIM_URL: &str = "https://nominatim.openstreetmap.org/search";

/// Service settings read from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Where downloaded grids are written before being read and deleted.
    pub work_dir: PathBuf,
    pub provider_timeout: Duration,
    pub openweathermap_key: Option<String>,
    pub nominatim_url: String,
    /// Show a download progress bar.
    pub progress: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            work_dir: std::env::temp_dir().join("co2map"),
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            openweathermap_key: None,
            nominatim_url: DEFAULT_NOMINATIM_URL.to_string(),
            progress: false,
        }
    }
}

impl Settings {
    pub fn from_env(env: &dyn Env) -> Self {
        let defaults = Self::default();

        let provider_timeout = match env.var(PROVIDER_TIMEOUT_VAR) {
            Some(raw) => match raw.trim().parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!(value = %raw, "ignoring invalid {}", PROVIDER_TIMEOUT_VAR);
                    defaults.provider_timeout
                }
            },
            None => defaults.provider_timeout,
        };

        Self {
            work_dir: env.var(WORK_DIR_VAR).map(PathBuf::from).unwrap_or(defaults.work_dir),
            provider_timeout,
            openweathermap_key: env.var(OPENWEATHERMAP_KEY_VAR),
            nominatim_url: env.var(NOMINATIM_URL_VAR).unwrap_or(defaults.nominatim_url),
            progress: defaults.progress,
        }
    }
}
