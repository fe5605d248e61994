use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::{HeaderMap, HeaderValue, RANGE, USER_AGENT};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::jobs::{ApiReply, ProcessingJob, ProcessingJobStatus, ProcessingResults, RemoteFile};
use super::util::{api_v2_variant, append_query, backoff, retriable_status, split_key_basic};
use crate::config::Credentials;
use crate::error::{ProviderError, classify_response};

type Result<T> = std::result::Result<T, ProviderError>;

/// Tuning for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Per-request HTTP timeout.
    pub timeout: Duration,
    /// Attempts per HTTP call and per download before giving up.
    pub retry_max: usize,
    /// Upper bound for the job polling interval, and the pause between retried calls.
    pub sleep_max: Duration,
    /// Draw a progress bar on stderr while downloading.
    pub progress: bool,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(300),
            retry_max: 1,
            sleep_max: Duration::from_secs(120),
            progress: false,
        }
    }
}

/// Blocking client for the Copernicus data stores (ADS and CDS share the API).
#[derive(Debug, Clone)]
pub struct Client {
    url: String,
    key: String,
    options: ClientOptions,
    http: HttpClient,
}

impl Client {
    pub fn new(credentials: &Credentials, options: ClientOptions) -> Result<Self> {
        let mut default_headers = HeaderMap::new();
        default_headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("co2map/{}", env!("CARGO_PKG_VERSION")))
                .unwrap_or(HeaderValue::from_static("co2map")),
        );

        let mut builder = HttpClient::builder()
            .default_headers(default_headers)
            .timeout(options.timeout);

        if !credentials.verify {
            warn!("TLS certificate verification disabled by configuration");
            builder = builder.danger_accept_invalid_certs(true);
        }

        let http = builder.build().map_err(ProviderError::HttpClient)?;

        Ok(Self {
            url: credentials.url.clone(),
            key: credentials.key.clone(),
            options,
            http,
        })
    }

    /// Submits a request, waits for the job, and downloads the result to `target`.
    pub fn retrieve<T: Serialize>(
        &self,
        dataset: &str,
        request: &T,
        target: &Path,
    ) -> Result<RemoteFile> {
        // Legacy "<UID>:<APIKEY>" keys use /resources + /tasks; bare tokens use
        // the Retrieve API at /retrieve/v1.
        let file = if split_key_basic(&self.key).is_some() {
            self.retrieve_legacy(dataset, request)?
        } else {
            self.retrieve_processing(dataset, request)?
        };
        self.download(&file, target)?;
        Ok(file)
    }

    fn retrieve_legacy<T: Serialize>(&self, dataset: &str, request: &T) -> Result<RemoteFile> {
        let (base_url, mut reply) = self.post_with_base_fallback(dataset, request)?;

        let mut sleep = Duration::from_secs(1);
        let mut last_state: Option<String> = None;

        loop {
            if last_state.as_deref() != Some(reply.state.as_str()) {
                last_state = Some(reply.state.clone());
                info!(dataset, state = %reply.state, "request state");
            }

            match reply.state.as_str() {
                "completed" => {
                    return reply.remote_file(&base_url).ok_or_else(|| ProviderError::Protocol {
                        url: base_url.clone(),
                        message: "missing download info in API reply".to_string(),
                    });
                }
                "queued" | "running" => {
                    let rid = reply.request_id.clone().ok_or_else(|| ProviderError::Protocol {
                        url: base_url.clone(),
                        message: format!("missing request_id while state={}", reply.state),
                    })?;
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.options.sleep_max);

                    let task_url = format!("{}/tasks/{}", base_url.trim_end_matches('/'), rid);
                    reply = self.api_json::<Value, ApiReply>("GET", &task_url, &Value::Null)?;
                }
                "failed" => return Err(ProviderError::job_failed(reply.failure_message())),
                other => {
                    return Err(ProviderError::Protocol {
                        url: base_url.clone(),
                        message: format!("unknown API state [{}]", other),
                    });
                }
            }
        }
    }

    fn retrieve_processing<T: Serialize>(&self, dataset: &str, request: &T) -> Result<RemoteFile> {
        // POST {base}/retrieve/v1/processes/{dataset}/execution {"inputs": request},
        // then poll the monitor link until the job settles.
        let base = self.url.trim_end_matches('/');
        let retrieve_base = format!("{}/retrieve/v1", base);
        let exec_url = format!("{}/processes/{}/execution", retrieve_base, dataset);

        let submit_body = serde_json::json!({ "inputs": request });
        let job: ProcessingJob = self.api_json("POST", &exec_url, &submit_body)?;

        let monitor_url = job
            .monitor_url()
            .or_else(|| {
                job.job_id
                    .as_deref()
                    .map(|id| format!("{}/jobs/{}", retrieve_base, id))
            })
            .ok_or_else(|| ProviderError::Protocol {
                url: exec_url.clone(),
                message: "missing monitor link in job submission response".to_string(),
            })?;

        let mut sleep = Duration::from_secs(1);
        let mut last_status: Option<String> = None;
        loop {
            let status_url = append_query(&monitor_url, &[("log", "true"), ("request", "true")]);
            let job_status: ProcessingJobStatus =
                self.api_json::<Value, ProcessingJobStatus>("GET", &status_url, &Value::Null)?;

            if last_status.as_deref() != Some(job_status.status.as_str()) {
                last_status = Some(job_status.status.clone());
                info!(dataset, status = %job_status.status, "job status");
            }

            match job_status.status.as_str() {
                "successful" => {
                    let results_url = job_status.results_url().unwrap_or_else(|| {
                        format!("{}/results", monitor_url.trim_end_matches('/'))
                    });
                    let results: ProcessingResults = self.api_json::<Value, ProcessingResults>(
                        "GET",
                        &results_url,
                        &Value::Null,
                    )?;
                    return results
                        .to_remote_file(&results_url)
                        .ok_or_else(|| ProviderError::Protocol {
                            url: results_url.clone(),
                            message: "missing results asset href".to_string(),
                        });
                }
                "accepted" | "running" => {
                    thread::sleep(sleep);
                    sleep = backoff(sleep, self.options.sleep_max);
                }
                "failed" | "rejected" | "dismissed" | "deleted" => {
                    return Err(ProviderError::job_failed(job_status.failure_message()));
                }
                other => {
                    return Err(ProviderError::Protocol {
                        url: status_url,
                        message: format!("unknown processing status [{}]", other),
                    });
                }
            }
        }
    }

    fn post_with_base_fallback<T: Serialize>(
        &self,
        dataset: &str,
        request: &T,
    ) -> Result<(String, ApiReply)> {
        // Some deployments only answer under `/api/v2`; retry there on a 404.
        let base = self.url.trim_end_matches('/').to_string();
        let url = format!("{}/resources/{}", base, dataset);

        match self.api_json::<T, ApiReply>("POST", &url, request) {
            Ok(reply) => Ok((base, reply)),
            Err(err @ ProviderError::NotFound { .. }) => {
                let Some(alt_base) = api_v2_variant(&base) else {
                    return Err(err);
                };
                debug!(from = %base, to = %alt_base, "retrying legacy request under /api/v2");
                let alt_url = format!("{}/resources/{}", alt_base, dataset);
                match self.api_json::<T, ApiReply>("POST", &alt_url, request) {
                    Ok(reply) => Ok((alt_base, reply)),
                    Err(_) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    /// Downloads `file` to `target`, resuming with range requests after short reads.
    pub fn download(&self, file: &RemoteFile, target: &Path) -> Result<PathBuf> {
        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|source| ProviderError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        let io_err = |source| ProviderError::Io {
            path: target.to_path_buf(),
            source,
        };
        let on_disk = || std::fs::metadata(target).map(|m| m.len()).map_err(io_err);

        let mut downloaded: u64 = 0;
        let mut range_from: Option<u64> = None;

        if target.exists() {
            downloaded = on_disk()?;
            if downloaded < file.content_length {
                range_from = Some(downloaded);
            } else {
                downloaded = 0;
            }
        }

        let pb = self.options.progress.then(|| {
            let pb = ProgressBar::new(file.content_length);
            let style = ProgressStyle::with_template(
                "{spinner:.green} {bytes}/{total_bytes} ({bytes_per_sec}) {wide_bar} {eta}",
            )
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
            pb.set_style(style);
            pb.set_position(downloaded);
            pb
        });

        let mut tries = 0usize;
        'attempt: while tries < self.options.retry_max {
            let mut headers = HeaderMap::new();
            if let Some(from) = range_from {
                if let Ok(value) = HeaderValue::from_str(&format!("bytes={}-", from)) {
                    headers.insert(RANGE, value);
                }
            }

            let resp = self.robust_request(&file.location, || {
                let req = self.http.get(&file.location).headers(headers.clone());
                self.apply_auth(req).send()
            })?;

            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().unwrap_or_default();
                return Err(classify_response(status, &file.location, &text));
            }
            let mut resp = resp;

            let append = range_from.is_some();
            let mut out = OpenOptions::new()
                .create(true)
                .write(true)
                .append(append)
                .truncate(!append)
                .open(target)
                .map_err(io_err)?;

            let mut buf = [0u8; 64 * 1024];
            loop {
                let n = match resp.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        tries += 1;
                        if tries >= self.options.retry_max {
                            return Err(ProviderError::Connection {
                                url: file.location.clone(),
                                source: Box::new(e),
                            });
                        }

                        out.flush().ok();
                        downloaded = on_disk()?;
                        range_from = Some(downloaded);
                        if let Some(pb) = &pb {
                            pb.set_position(downloaded);
                        }
                        warn!(downloaded, error = %e, "download interrupted, resuming");
                        thread::sleep(self.options.sleep_max);
                        continue 'attempt;
                    }
                };

                out.write_all(&buf[..n]).map_err(io_err)?;
                downloaded += n as u64;
                if let Some(pb) = &pb {
                    pb.inc(n as u64);
                }
            }

            out.flush().map_err(io_err)?;

            if downloaded >= file.content_length {
                if let Some(pb) = &pb {
                    pb.finish_and_clear();
                }
                debug!(path = %target.display(), bytes = downloaded, "download finished");
                return Ok(target.to_path_buf());
            }

            tries += 1;
            downloaded = on_disk()?;
            range_from = Some(downloaded);
            if let Some(pb) = &pb {
                pb.set_position(downloaded);
            }
            if tries < self.options.retry_max {
                warn!(downloaded, expected = file.content_length, "short download, resuming");
                thread::sleep(self.options.sleep_max);
            }
        }

        Err(ProviderError::Incomplete {
            downloaded,
            expected: file.content_length,
        })
    }

    fn apply_auth(&self, req: RequestBuilder) -> RequestBuilder {
        if let Some((u, p)) = split_key_basic(&self.key) {
            req.basic_auth(u, Some(p))
        } else {
            req.header("PRIVATE-TOKEN", self.key.trim())
        }
    }

    fn api_json<TReq: Serialize, TResp: DeserializeOwned>(
        &self,
        method: &str,
        url: &str,
        request: &TReq,
    ) -> Result<TResp> {
        let resp = self.robust_request(url, || {
            let req = match method {
                "GET" => self.http.get(url),
                "PUT" => self.http.put(url),
                _ => self.http.post(url),
            };
            let req = self.apply_auth(req);
            if method == "GET" {
                req.send()
            } else {
                req.json(request).send()
            }
        })?;

        let status = resp.status();
        let text = resp.text().unwrap_or_default();
        if !status.is_success() {
            return Err(classify_response(status, url, &text));
        }

        serde_json::from_str::<TResp>(&text).map_err(|e| ProviderError::Protocol {
            url: url.to_string(),
            message: format!("failed to parse API JSON (status={}): {}", status, e),
        })
    }

    /// Sends with retries on transport errors and retriable statuses.
    fn robust_request<F>(&self, url: &str, mut send: F) -> Result<Response>
    where
        F: FnMut() -> std::result::Result<Response, reqwest::Error>,
    {
        let mut tries = 0usize;
        loop {
            tries += 1;
            match send() {
                Ok(resp) => {
                    let status = resp.status().as_u16();
                    if retriable_status(status) && tries < self.options.retry_max {
                        warn!(url, status, tries, "retriable response, retrying");
                        thread::sleep(self.options.sleep_max);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(err) => {
                    if tries >= self.options.retry_max {
                        return Err(ProviderError::transport(url, err));
                    }
                    warn!(url, error = %err, tries, "transport error, retrying");
                    thread::sleep(self.options.sleep_max);
                }
            }
        }
    }
}
