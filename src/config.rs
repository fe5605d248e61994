//! Data-store credential resolution.
//!
//! Credentials come from the first source that can supply both a URL and a key:
//! the `CDSAPI_URL`/`CDSAPI_KEY` environment variables, then a `.cdsapirc` file
//! (`$CDSAPI_RC`, or the install directory, the working directory and the home
//! directory, in that order).

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const URL_VAR: &str = "CDSAPI_URL";
pub const KEY_VAR: &str = "CDSAPI_KEY";
pub const USER_ID_VAR: &str = "CDSAPI_USER_ID";
pub const RC_VAR: &str = "CDSAPI_RC";
const RC_FILE_NAME: &str = ".cdsapirc";

/// Read access to environment variables.
pub trait Env: Send + Sync {
    /// Returns the variable's value, treating empty values as unset.
    fn var(&self, key: &str) -> Option<String>;
}

/// The real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl Env for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.trim().is_empty())
    }
}

impl Env for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.trim().is_empty()).cloned()
    }
}

/// Where a set of credentials was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialOrigin {
    Environment,
    File(PathBuf),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Base API URL, e.g. `https://ads.atmosphere.copernicus.eu/api`.
    pub url: String,
    /// API key.
    ///
    /// Supported formats:
    /// - Legacy: `<UID>:<APIKEY>`
    /// - Token-only: `<PERSONAL_ACCESS_TOKEN>` (no colon)
    pub key: String,
    /// Whether to verify TLS certificates.
    pub verify: bool,
    pub origin: CredentialOrigin,
}

impl Credentials {
    pub fn has_user_id(&self) -> bool {
        self.key.contains(':')
    }

    /// Prefixes a bare key with `<uid>:`. Keys that already carry a UID are kept.
    fn merge_user_id(mut self, user_id: Option<String>) -> Self {
        if self.has_user_id() {
            return self;
        }
        match user_id {
            Some(uid) => self.key = format!("{}:{}", uid.trim(), self.key),
            None => warn!(
                origin = ?self.origin,
                "key has no '<UID>:' prefix and {} is not set; passing it through as-is",
                USER_ID_VAR
            ),
        }
        self
    }
}

/// One place credentials may be looked up.
pub trait CredentialSource: Send + Sync {
    fn lookup(&self, env: &dyn Env) -> Option<Credentials>;
}

/// `CDSAPI_URL` + `CDSAPI_KEY`; both must be set.
#[derive(Debug, Default)]
pub struct EnvSource;

impl CredentialSource for EnvSource {
    fn lookup(&self, env: &dyn Env) -> Option<Credentials> {
        let url = env.var(URL_VAR)?;
        let key = env.var(KEY_VAR)?;
        Some(Credentials {
            url,
            key,
            verify: true,
            origin: CredentialOrigin::Environment,
        })
    }
}

/// `.cdsapirc` files, tried in order; the first with both `url:` and `key:` wins.
#[derive(Debug, Default)]
pub struct RcFileSource {
    candidates: Vec<PathBuf>,
}

impl RcFileSource {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        Self { candidates }
    }

    /// `$CDSAPI_RC` alone when set, otherwise the install, working and home directories.
    pub fn standard(env: &dyn Env) -> Self {
        if let Some(p) = env.var(RC_VAR) {
            return Self::new(vec![PathBuf::from(p)]);
        }

        let mut v = Vec::new();
        if let Some(dir) = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
        {
            v.push(dir.join(RC_FILE_NAME));
        }
        if let Ok(cwd) = std::env::current_dir() {
            v.push(cwd.join(RC_FILE_NAME));
        }
        if let Some(home) = dirs::home_dir() {
            v.push(home.join(RC_FILE_NAME));
        }
        v.dedup();
        Self::new(v)
    }

    pub fn candidates(&self) -> &[PathBuf] {
        &self.candidates
    }
}

impl CredentialSource for RcFileSource {
    fn lookup(&self, _env: &dyn Env) -> Option<Credentials> {
        for path in &self.candidates {
            if !path.exists() {
                continue;
            }
            let rc = match read_rc(path) {
                Ok(rc) => rc,
                Err(e) => {
                    warn!(path = %path.display(), error = %format!("{e:#}"), "skipping unreadable credentials file");
                    continue;
                }
            };
            if let (Some(url), Some(key)) = (rc.url, rc.key) {
                info!(path = %path.display(), "using data-store credentials from file");
                return Some(Credentials {
                    url,
                    key,
                    verify: rc.verify.unwrap_or(true),
                    origin: CredentialOrigin::File(path.clone()),
                });
            }
            debug!(path = %path.display(), "credentials file lacks url or key");
        }
        None
    }
}

/// Ordered chain of credential sources.
pub struct CredentialResolver {
    env: Arc<dyn Env>,
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialResolver {
    pub fn new(env: Arc<dyn Env>, sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self { env, sources }
    }

    /// Environment variables first, then the standard `.cdsapirc` locations.
    pub fn standard(env: Arc<dyn Env>) -> Self {
        let rc = RcFileSource::standard(env.as_ref());
        Self::new(env, vec![Box::new(EnvSource), Box::new(rc)])
    }

    /// Returns the first complete set of credentials, with the user id merged in.
    pub fn resolve(&self) -> Option<Credentials> {
        self.find()
            .map(|creds| creds.merge_user_id(self.env.var(USER_ID_VAR)))
    }

    /// The first complete set of credentials, exactly as configured.
    pub fn find(&self) -> Option<Credentials> {
        self.sources
            .iter()
            .find_map(|source| source.lookup(self.env.as_ref()))
    }
}

#[derive(Debug, Default)]
struct RcConfig {
    url: Option<String>,
    key: Option<String>,
    verify: Option<bool>,
}

fn read_rc(path: &Path) -> Result<RcConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read configuration file {}", path.display()))?;
    Ok(parse_rc(&text))
}

fn parse_rc(text: &str) -> RcConfig {
    let mut cfg = RcConfig::default();

    // A key may be written as `key:` with its value alone on the next line.
    let mut pending: Option<String> = None;

    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = pending.take() {
            if !line.contains(':') {
                assign(&mut cfg, &name, strip_quotes(line));
                continue;
            }
        }

        if let Some((k, v)) = line.split_once(':') {
            let name = k.trim().to_ascii_lowercase();
            let v = strip_quotes(v);
            if v.is_empty() {
                if name == "url" || name == "key" {
                    pending = Some(name);
                }
            } else {
                assign(&mut cfg, &name, v);
            }
        }
    }

    cfg
}

fn assign(cfg: &mut RcConfig, name: &str, value: &str) {
    match name {
        "url" => cfg.url = Some(value.to_string()),
        "key" => cfg.key = Some(value.to_string()),
        "verify" => cfg.verify = Some(value != "0"),
        _ => {}
    }
}

fn strip_quotes(s: &str) -> &str {
    let s = s.trim();
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}
