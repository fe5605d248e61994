//! Wire types for the two job flows the data stores expose.
//!
//! Token-only keys use the Retrieve API (OGC API - Processes): submit, poll the
//! monitor link, then read the results asset. `<UID>:<KEY>` keys use the older
//! `/resources` + `/tasks` flow.

use serde_json::Value;

use super::util::urljoin;

/// A finished result ready for download.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    /// Download URL.
    pub location: String,
    /// Expected content length (bytes).
    pub content_length: u64,
    /// Optional content type.
    pub content_type: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct Link {
    #[serde(default)]
    rel: Option<String>,
    href: String,
}

fn find_link(links: &[Link], rel: &str) -> Option<String> {
    links
        .iter()
        .find(|l| l.rel.as_deref() == Some(rel))
        .map(|l| l.href.clone())
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessingJob {
    #[serde(default, alias = "jobID")]
    pub(crate) job_id: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
}

impl ProcessingJob {
    pub(crate) fn monitor_url(&self) -> Option<String> {
        find_link(&self.links, "monitor")
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessingJobStatus {
    pub(crate) status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    links: Vec<Link>,
}

impl ProcessingJobStatus {
    pub(crate) fn results_url(&self) -> Option<String> {
        find_link(&self.links, "results")
    }

    /// Failure text of a job that ended without results.
    pub(crate) fn failure_message(&self) -> String {
        match self.message.as_deref().map(str::trim) {
            Some(msg) if !msg.is_empty() => {
                format!("processing job ended with status {}: {}", self.status, msg)
            }
            _ => format!("processing job ended with status {}", self.status),
        }
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ProcessingResults {
    asset: ProcessingAsset,
}

#[derive(Debug, serde::Deserialize)]
struct ProcessingAsset {
    value: ProcessingAssetValue,
}

#[derive(Debug, serde::Deserialize)]
struct ProcessingAssetValue {
    href: String,
    #[serde(rename = "file:size")]
    file_size: u64,
    #[serde(default, rename = "type")]
    content_type: Option<String>,
}

impl ProcessingResults {
    pub(crate) fn to_remote_file(&self, results_url: &str) -> Option<RemoteFile> {
        let href = self.asset.value.href.trim();
        if href.is_empty() {
            return None;
        }

        Some(RemoteFile {
            location: urljoin(results_url, href),
            content_length: self.asset.value.file_size,
            content_type: self.asset.value.content_type.clone(),
        })
    }
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiReply {
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) request_id: Option<String>,

    #[serde(default)]
    location: Option<String>,
    #[serde(default, alias = "contentLength")]
    content_length: Option<u64>,
    #[serde(default, alias = "contentType")]
    content_type: Option<String>,

    #[serde(default)]
    result: Option<Value>,

    #[serde(default)]
    pub(crate) error: Option<ApiReplyError>,
}

#[derive(Debug, serde::Deserialize)]
pub(crate) struct ApiReplyError {
    #[serde(default)]
    pub(crate) message: Option<String>,
    #[serde(default)]
    pub(crate) reason: Option<String>,
}

impl ApiReply {
    /// Failure text of a `failed` task, `message. reason` when both are present.
    pub(crate) fn failure_message(&self) -> String {
        let err = self.error.as_ref();
        let msg = err
            .and_then(|e| e.message.as_deref())
            .unwrap_or("request failed");
        match err.and_then(|e| e.reason.as_deref()) {
            Some(reason) if !reason.is_empty() => format!("{}. {}", msg, reason),
            _ => msg.to_string(),
        }
    }

    /// Download info from either `{"result": {...}}` or the top level of the reply.
    pub(crate) fn remote_file(&self, base_url: &str) -> Option<RemoteFile> {
        #[derive(serde::Deserialize)]
        struct ResultLocation {
            location: String,
            #[serde(alias = "contentLength")]
            content_length: u64,
            #[serde(default, alias = "contentType")]
            content_type: Option<String>,
        }

        if let Some(r) = self
            .result
            .as_ref()
            .and_then(|v| serde_json::from_value::<ResultLocation>(v.clone()).ok())
        {
            return Some(RemoteFile {
                location: urljoin(base_url, &r.location),
                content_length: r.content_length,
                content_type: r.content_type,
            });
        }

        match (&self.location, self.content_length) {
            (Some(location), Some(content_length)) => Some(RemoteFile {
                location: urljoin(base_url, location),
                content_length,
                content_type: self.content_type.clone(),
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn processing_links_are_found_by_rel() {
        let job: ProcessingJob = serde_json::from_str(
            r#"{"jobID":"abc","links":[{"rel":"self","href":"https://x/jobs/abc/self"},{"rel":"monitor","href":"https://x/jobs/abc"}]}"#,
        )
        .unwrap();
        assert_eq!(job.job_id.as_deref(), Some("abc"));
        assert_eq!(job.monitor_url().as_deref(), Some("https://x/jobs/abc"));

        let status: ProcessingJobStatus =
            serde_json::from_str(r#"{"status":"successful","links":[]}"#).unwrap();
        assert_eq!(status.results_url(), None);
    }

    #[test]
    fn results_asset_becomes_remote_file() {
        let results: ProcessingResults = serde_json::from_str(
            r#"{"asset":{"value":{"href":"/download/file.grib","file:size":6000000,"type":"application/x-grib"}}}"#,
        )
        .unwrap();
        let file = results
            .to_remote_file("https://ads.atmosphere.copernicus.eu")
            .unwrap();
        assert_eq!(
            file.location,
            "https://ads.atmosphere.copernicus.eu/download/file.grib"
        );
        assert_eq!(file.content_length, 6_000_000);
        assert_eq!(file.content_type.as_deref(), Some("application/x-grib"));
    }

    #[test]
    fn legacy_reply_reads_nested_or_top_level_location() {
        let nested: ApiReply = serde_json::from_str(
            r#"{"state":"completed","result":{"location":"https://dl/x.grib","contentLength":10}}"#,
        )
        .unwrap();
        assert_eq!(
            nested.remote_file("https://base/api").unwrap().location,
            "https://dl/x.grib"
        );

        let flat: ApiReply = serde_json::from_str(
            r#"{"state":"completed","location":"files/x.grib","content_length":10}"#,
        )
        .unwrap();
        assert_eq!(
            flat.remote_file("https://base/api").unwrap().location,
            "https://base/api/files/x.grib"
        );

        let empty: ApiReply = serde_json::from_str(r#"{"state":"completed"}"#).unwrap();
        assert!(empty.remote_file("https://base/api").is_none());
    }

    #[test]
    fn failure_message_joins_reason() {
        let reply: ApiReply = serde_json::from_str(
            r#"{"state":"failed","error":{"message":"the request failed","reason":"no data for date"}}"#,
        )
        .unwrap();
        assert_eq!(reply.failure_message(), "the request failed. no data for date");
    }

    #[test]
    fn processing_failure_carries_status_message() {
        let status: ProcessingJobStatus =
            serde_json::from_str(r#"{"status":"rejected","message":"Quota exceeded for user"}"#).unwrap();
        assert_eq!(
            status.failure_message(),
            "processing job ended with status rejected: Quota exceeded for user"
        );

        let status: ProcessingJobStatus = serde_json::from_str(r#"{"status":"dismissed"}"#).unwrap();
        assert_eq!(status.failure_message(), "processing job ended with status dismissed");
    }
}
