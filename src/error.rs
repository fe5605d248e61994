use reqwest::StatusCode;
use serde::Serialize;
use std::path::PathBuf;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure categories reported to callers alongside an error message.
///
/// The serialized names are part of the JSON contract with the web client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CredentialsMissing,
    AuthError,
    TermsError,
    QuotaError,
    Connection,
    Timeout,
    DownloadIncomplete,
    ProcessingFailed,
    /// No grid-format decoder is compiled in.
    CfgribMissing,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::CredentialsMissing => "credentials_missing",
            ErrorKind::AuthError => "auth_error",
            ErrorKind::TermsError => "terms_error",
            ErrorKind::QuotaError => "quota_error",
            ErrorKind::Connection => "connection",
            ErrorKind::Timeout => "timeout",
            ErrorKind::DownloadIncomplete => "download_incomplete",
            ErrorKind::ProcessingFailed => "processing_failed",
            ErrorKind::CfgribMissing => "cfgrib_missing",
        }
    }

    /// HTTP status the route layer answers with for this kind.
    pub fn http_status(self) -> u16 {
        match self {
            ErrorKind::CredentialsMissing | ErrorKind::AuthError | ErrorKind::TermsError => 400,
            ErrorKind::QuotaError => 429,
            ErrorKind::Connection | ErrorKind::Timeout => 502,
            ErrorKind::DownloadIncomplete
            | ErrorKind::ProcessingFailed
            | ErrorKind::CfgribMissing => 500,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors raised by the data-store client, classified at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("could not connect to {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("request to {url} timed out")]
    Timeout {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error(
        "authentication failed (HTTP {status}); check that the key is a valid token, with or without the '<UID>:' prefix your endpoint expects: {message}"
    )]
    Unauthorized { status: u16, message: String },

    #[error(
        "required dataset licence(s) have not been accepted; sign in at {link} and accept them under 'Manage licences': {message}"
    )]
    TermsNotAccepted { link: String, message: String },

    #[error("download quota exceeded: {message}")]
    QuotaExceeded { message: String },

    #[error("API endpoint not found (HTTP 404) at {url}; the configured base URL may be wrong: {message}")]
    NotFound { url: String, message: String },

    #[error("API request failed: HTTP {status} for url ({url}): {message}")]
    Api {
        status: u16,
        url: String,
        message: String,
    },

    #[error("request failed: {0}")]
    Rejected(String),

    #[error("download incomplete: {downloaded} of {expected} byte(s)")]
    Incomplete { downloaded: u64, expected: u64 },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("unexpected API response from {url}: {message}")]
    Protocol { url: String, message: String },

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ProviderError {
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ProviderError::Connection { .. } => Some(ErrorKind::Connection),
            ProviderError::Timeout { .. } => Some(ErrorKind::Timeout),
            ProviderError::Unauthorized { .. } => Some(ErrorKind::AuthError),
            ProviderError::TermsNotAccepted { .. } => Some(ErrorKind::TermsError),
            ProviderError::QuotaExceeded { .. } => Some(ErrorKind::QuotaError),
            ProviderError::Incomplete { .. } => Some(ErrorKind::DownloadIncomplete),
            ProviderError::NotFound { .. }
            | ProviderError::Api { .. }
            | ProviderError::Rejected(_)
            | ProviderError::HttpClient(_)
            | ProviderError::Protocol { .. }
            | ProviderError::Io { .. } => None,
        }
    }

    /// Classifies the failure text of a job the data store gave up on.
    pub(crate) fn job_failed(message: String) -> Self {
        if mentions_licence(&message) {
            ProviderError::TermsNotAccepted {
                link: licence_link(&message),
                message,
            }
        } else if mentions_quota(&message) {
            ProviderError::QuotaExceeded { message }
        } else {
            ProviderError::Rejected(message)
        }
    }

    /// Classifies a transport failure from `reqwest`.
    pub(crate) fn transport(url: &str, err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ProviderError::Timeout {
                url: url.to_string(),
                source: Box::new(err),
            }
        } else {
            ProviderError::Connection {
                url: url.to_string(),
                source: Box::new(err),
            }
        }
    }
}

/// Error payload returned by the data store. Both the OGC processes API and
/// the legacy API use subsets of these fields.
#[derive(Debug, Default, serde::Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default, rename = "type")]
    pub(crate) kind: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) status: Option<u16>,
    #[serde(default)]
    pub(crate) detail: Option<String>,
    #[serde(default)]
    pub(crate) trace_id: Option<String>,
    // Some endpoints respond with {"message":...,"detail":...}
    #[serde(default)]
    pub(crate) message: Option<String>,
}

const DEFAULT_LICENCE_LINK: &str = "https://ads.atmosphere.copernicus.eu/how-to-api";

const LICENCE_MARKERS: [&str; 2] = ["required licence", "manage-licences"];
const QUOTA_MARKERS: [&str; 4] = ["quota", "too many requests", "rate limit", "limit exceeded"];

fn mentions_any(text: &str, markers: &[&str]) -> bool {
    let text = text.to_lowercase();
    markers.iter().any(|m| text.contains(m))
}

fn mentions_licence(text: &str) -> bool {
    mentions_any(text, &LICENCE_MARKERS)
}

fn mentions_quota(text: &str) -> bool {
    mentions_any(text, &QUOTA_MARKERS)
}

/// First URL in `text`, else the generic how-to page.
fn licence_link(text: &str) -> String {
    text.find("https://")
        .and_then(|idx| text[idx..].split_whitespace().next())
        .unwrap_or(DEFAULT_LICENCE_LINK)
        .to_string()
}

/// Turns a non-success response into a typed error.
pub(crate) fn classify_response(status: StatusCode, url: &str, text: &str) -> ProviderError {
    let body = serde_json::from_str::<ApiErrorBody>(text).unwrap_or_default();

    let title = body.title.as_deref().or(body.message.as_deref()).unwrap_or("");
    let detail = body.detail.as_deref().unwrap_or("");
    let trace = body.trace_id.as_deref().unwrap_or("(none)");
    let parts: Vec<&str> = [title, detail]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect();
    let message = if parts.is_empty() {
        text.trim().to_string()
    } else {
        format!("{} (trace_id: {})", parts.join(" "), trace)
    };

    if status == StatusCode::FORBIDDEN && (mentions_licence(title) || mentions_licence(detail)) {
        return ProviderError::TermsNotAccepted {
            link: licence_link(detail),
            message,
        };
    }
    if mentions_quota(title) || mentions_quota(detail) {
        return ProviderError::QuotaExceeded { message };
    }

    let status_in_body = body.status.unwrap_or(status.as_u16());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ProviderError::Unauthorized {
            status: status_in_body,
            message,
        },
        StatusCode::TOO_MANY_REQUESTS => ProviderError::QuotaExceeded { message },
        StatusCode::NOT_FOUND => ProviderError::NotFound {
            url: url.to_string(),
            message,
        },
        _ => ProviderError::Api {
            status: status_in_body,
            url: url.to_string(),
            message: match body.kind.as_deref() {
                Some(kind) if !kind.is_empty() => format!("{} [{}]", message, kind),
                _ => message,
            },
        },
    }
}
