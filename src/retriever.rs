//! Downloading one day of CO2 forecast into a local artifact.

use chrono::NaiveDate;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

use crate::config::{CredentialResolver, Credentials};
use crate::error::{ErrorKind, ProviderError};
use crate::geo::{AREA_MARGIN_DEG, BoundingBox, Coordinate};
use crate::grid::GridDecoder;
use crate::provider::{CAMS_GHG_DATASET, ForecastRequest, GridProvider};

/// Smallest file accepted as a complete download when the exact artifact name is
/// missing. Smaller `.grib` files in the work directory are treated as partials.
pub const MIN_ARTIFACT_BYTES: u64 = 5_000_000;

pub const ARTIFACT_EXTENSION: &str = "grib";

/// Carbon dioxide at the lowest model level.
const CO2_VARIABLE: &str = "carbon_dioxide";
const SURFACE_MODEL_LEVEL: &str = "137";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Backoff after attempt `n` is `n * backoff_step`, capped at `backoff_cap`.
    pub backoff_step: Duration,
    pub backoff_cap: Duration,
    /// Pause between the provider returning and looking for the file.
    pub settle_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_step: Duration::from_secs(10),
            backoff_cap: Duration::from_secs(60),
            settle_delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Same attempt budget, no waiting.
    pub fn immediate() -> Self {
        Self {
            backoff_step: Duration::ZERO,
            backoff_cap: Duration::ZERO,
            settle_delay: Duration::ZERO,
            ..Self::default()
        }
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step.saturating_mul(attempt).min(self.backoff_cap)
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct RetrievalError {
    pub kind: Option<ErrorKind>,
    pub message: String,
    /// Attempts made before giving up.
    pub attempts: u32,
}

/// Failure of a single attempt.
#[derive(Debug)]
struct AttemptError {
    kind: Option<ErrorKind>,
    message: String,
}

impl From<ProviderError> for AttemptError {
    fn from(err: ProviderError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// `co2_data_YYYY_MM_DD.grib`
pub fn artifact_name(date: NaiveDate) -> String {
    format!("co2_data_{}.{}", date.format("%Y_%m_%d"), ARTIFACT_EXTENSION)
}

/// The CAMS request for one day of CO2 around `center`.
pub fn forecast_request(center: Coordinate, date: NaiveDate, leadtimes: &[String]) -> ForecastRequest {
    let day = date.format("%Y-%m-%d").to_string();
    ForecastRequest {
        dataset: CAMS_GHG_DATASET.to_string(),
        variable: vec![CO2_VARIABLE.to_string()],
        model_level: vec![SURFACE_MODEL_LEVEL.to_string()],
        date: vec![format!("{}/{}", day, day)],
        leadtime_hour: leadtimes.to_vec(),
        area: BoundingBox::around(center, AREA_MARGIN_DEG).to_area(),
        format: ARTIFACT_EXTENSION.to_string(),
    }
}

pub struct GridRetriever {
    resolver: Arc<CredentialResolver>,
    provider: Arc<dyn GridProvider>,
    decoder: Option<Arc<dyn GridDecoder>>,
    work_dir: PathBuf,
    policy: RetryPolicy,
}

impl GridRetriever {
    pub fn new(
        resolver: Arc<CredentialResolver>,
        provider: Arc<dyn GridProvider>,
        decoder: Option<Arc<dyn GridDecoder>>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            resolver,
            provider,
            decoder,
            work_dir: work_dir.into(),
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn resolver(&self) -> &CredentialResolver {
        &self.resolver
    }

    /// Downloads the forecast for `date` around `center` and returns the artifact path.
    ///
    /// The caller owns the returned file and is expected to delete it.
    pub fn retrieve(
        &self,
        center: Coordinate,
        date: NaiveDate,
        leadtimes: &[String],
    ) -> Result<PathBuf, RetrievalError> {
        let credentials = self.resolver.resolve().ok_or_else(|| RetrievalError {
            kind: Some(ErrorKind::CredentialsMissing),
            message: "no data store credentials configured; set CDSAPI_URL and CDSAPI_KEY or create a .cdsapirc file".to_string(),
            attempts: 0,
        })?;

        fs::create_dir_all(&self.work_dir).map_err(|e| RetrievalError {
            kind: None,
            message: format!("failed to create work directory {}: {}", self.work_dir.display(), e),
            attempts: 0,
        })?;

        let target = self.work_dir.join(artifact_name(date));
        let request = forecast_request(center, date, leadtimes);
        let max_attempts = self.policy.max_attempts.max(1);

        let mut last = None;
        for attempt in 1..=max_attempts {
            self.prepare(&target);
            info!(attempt, max_attempts, %date, target = %target.display(), "requesting CO2 forecast");

            match self.attempt(&credentials, &request, &target) {
                Ok(path) => {
                    info!(attempt, path = %path.display(), "forecast downloaded");
                    return Ok(path);
                }
                Err(err) => {
                    warn!(attempt, max_attempts, kind = ?err.kind, error = %err.message, "retrieval attempt failed");
                    self.discard_target(&target);
                    self.sweep_partials();
                    last = Some(err);
                    if attempt < max_attempts {
                        let delay = self.policy.backoff(attempt);
                        if !delay.is_zero() {
                            debug!(?delay, "backing off before retrying");
                            sleep(delay);
                        }
                    }
                }
            }
        }

        let (kind, cause) = match last {
            Some(err) => (err.kind, err.message),
            None => (None, "no attempt was made".to_string()),
        };
        Err(RetrievalError {
            kind,
            message: format!("download failed after {} attempts: {}", max_attempts, cause),
            attempts: max_attempts,
        })
    }

    fn attempt(
        &self,
        credentials: &Credentials,
        request: &ForecastRequest,
        target: &Path,
    ) -> Result<PathBuf, AttemptError> {
        self.provider.retrieve(credentials, request, target)?;

        if !self.policy.settle_delay.is_zero() {
            sleep(self.policy.settle_delay);
        }

        let candidate = self.locate(target).ok_or_else(|| AttemptError {
            kind: Some(ErrorKind::DownloadIncomplete),
            message: format!(
                "no complete download found in {} (expected {})",
                self.work_dir.display(),
                target.display()
            ),
        })?;

        if let Err(reason) = self.validate(&candidate) {
            if let Err(e) = fs::remove_file(&candidate) {
                warn!(path = %candidate.display(), error = %e, "failed to delete unreadable download");
            }
            return Err(AttemptError {
                kind: Some(ErrorKind::ProcessingFailed),
                message: format!("downloaded file {} is not readable: {}", candidate.display(), reason),
            });
        }

        if candidate != target {
            debug!(from = %candidate.display(), to = %target.display(), "renaming download");
            fs::rename(&candidate, target).map_err(|e| AttemptError {
                kind: Some(ErrorKind::ProcessingFailed),
                message: format!("failed to move {} into place: {}", candidate.display(), e),
            })?;
        }
        Ok(target.to_path_buf())
    }

    /// The exact artifact if present, otherwise the newest full-size grid file.
    fn locate(&self, target: &Path) -> Option<PathBuf> {
        if target.is_file() {
            return Some(target.to_path_buf());
        }
        self.grid_files()
            .into_iter()
            .filter(|(_, len, _)| *len >= MIN_ARTIFACT_BYTES)
            .max_by_key(|(_, _, modified)| *modified)
            .map(|(path, len, _)| {
                debug!(path = %path.display(), len, "using fallback download");
                path
            })
    }

    fn validate(&self, path: &Path) -> Result<(), String> {
        match &self.decoder {
            Some(decoder) => decoder.validate(path).map_err(|e| e.to_string()),
            None => {
                let len = fs::metadata(path).map_err(|e| e.to_string())?.len();
                warn!(path = %path.display(), len, "no grid decoder available; checking file size only");
                if len >= MIN_ARTIFACT_BYTES {
                    Ok(())
                } else {
                    Err(format!("{} byte(s), expected at least {}", len, MIN_ARTIFACT_BYTES))
                }
            }
        }
    }

    fn prepare(&self, target: &Path) {
        self.discard_target(target);
        self.sweep_partials();
    }

    /// Removes whatever sits at the artifact path, whatever its size.
    fn discard_target(&self, target: &Path) {
        if !target.exists() {
            return;
        }
        match fs::remove_file(target) {
            Ok(()) => debug!(path = %target.display(), "removed artifact"),
            Err(e) => warn!(path = %target.display(), error = %e, "failed to remove artifact"),
        }
    }

    /// Deletes grid files below the size floor.
    fn sweep_partials(&self) {
        for (path, len, _) in self.grid_files() {
            if len >= MIN_ARTIFACT_BYTES {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), len, "removed partial download"),
                Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial download"),
            }
        }
    }

    fn grid_files(&self) -> Vec<(PathBuf, u64, SystemTime)> {
        let entries = match fs::read_dir(&self.work_dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.work_dir.display(), error = %e, "cannot list work directory");
                return Vec::new();
            }
        };
        entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.extension().is_some_and(|ext| ext == ARTIFACT_EXTENSION))
            .filter_map(|path| {
                let meta = fs::metadata(&path).ok()?;
                if !meta.is_file() {
                    return None;
                }
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                Some((path, meta.len(), modified))
            })
            .collect()
    }
}
