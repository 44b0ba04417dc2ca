use std::time::Duration;

use futures_util::StreamExt;
use log::{debug, info, warn};
use reqwest::{Client, StatusCode, Url};

use crate::config::Endpoints;
use crate::engine::models::VersionRecord;
use crate::error::NetworkError;
use crate::util::TransferMeter;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Client for the version lookup endpoint and the archive download host.
#[derive(Clone, Debug)]
pub struct VersionResolver {
    client: Client,
    endpoints: Endpoints,
    lookup_timeout: Duration,
    download_timeout: Duration,
}

impl VersionResolver {
    pub fn new(endpoints: Endpoints, lookup_timeout: Duration, download_timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("release-updater/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_else(|err| {
                warn!("resolver: falling back to default HTTP client configuration ({err})");
                Client::new()
            });
        Self {
            client,
            endpoints,
            lookup_timeout,
            download_timeout,
        }
    }

    /// `{api_base}/{local_id}`, with the id escaped as one path segment.
    pub fn version_url(&self, local_id: &str) -> Result<Url, NetworkError> {
        join_segment(&self.endpoints.api_base, local_id)
    }

    /// `{download_base}/{id}.zip`, with the file name escaped as one path segment.
    pub fn archive_url(&self, record: &VersionRecord) -> Result<Url, NetworkError> {
        join_segment(&self.endpoints.download_base, &format!("{}.zip", record.id()))
    }

    /// Ask the version service which release belongs to `local_id`.
    ///
    /// `Ok(None)` means the service does not know the id (404, empty or `null`
    /// body); callers treat that as "nothing to update".
    pub async fn fetch_version(&self, local_id: &str) -> Result<Option<VersionRecord>, NetworkError> {
        let url = self.version_url(local_id)?.to_string();
        debug!("resolver: GET {url}");
        let response = self
            .client
            .get(&url)
            .timeout(self.lookup_timeout)
            .send()
            .await
            .map_err(|source| NetworkError::Request {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            info!("resolver: version service has no release for id {local_id:?}");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(NetworkError::Status { url, status });
        }

        let body = response.text().await.map_err(|source| NetworkError::Request {
            url: url.clone(),
            source,
        })?;
        if body.trim().is_empty() {
            return Ok(None);
        }
        serde_json::from_str::<Option<VersionRecord>>(&body)
            .map_err(|source| NetworkError::Decode { url, source })
    }

    /// Download the archive for `record` into memory.
    ///
    /// `progress` receives `(downloaded, total, speed)` while the body streams.
    pub async fn fetch_archive<F>(
        &self,
        record: &VersionRecord,
        mut progress: F,
    ) -> Result<Vec<u8>, NetworkError>
    where
        F: FnMut(u64, Option<u64>, &str),
    {
        let url = self.archive_url(record)?.to_string();
        info!("resolver: downloading {url}");
        let request_err = |source| NetworkError::Request {
            url: url.clone(),
            source,
        };
        let response = self
            .client
            .get(&url)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::Status {
                url: url.clone(),
                status,
            });
        }

        let total = response.content_length();
        let mut buffer = Vec::with_capacity(total.unwrap_or(0).min(64 * 1024 * 1024) as usize);
        let mut meter = TransferMeter::start();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(err) => return Err(stream_error(err, meter.received(), total, &url)),
            };
            buffer.extend_from_slice(&chunk);
            if let Some(speed) = meter.record(chunk.len()) {
                progress(meter.received(), total, speed.as_str());
            }
        }
        progress(meter.received(), total, &meter.average());
        debug!("resolver: received {} bytes from {url}", meter.received());
        Ok(buffer)
    }
}

fn join_segment(base: &str, segment: &str) -> Result<Url, NetworkError> {
    let invalid = || NetworkError::InvalidUrl {
        base: base.to_owned(),
        segment: segment.to_owned(),
    };
    // `.` and `..` would be dropped by the URL serializer instead of escaped.
    if matches!(segment, "." | "..") {
        return Err(invalid());
    }
    let mut url = Url::parse(base).map_err(|_| invalid())?;
    url.path_segments_mut()
        .map_err(|()| invalid())?
        .pop_if_empty()
        .push(segment);
    Ok(url)
}

/// A body that ends before `Content-Length` is reported as truncated.
fn stream_error(err: reqwest::Error, received: u64, total: Option<u64>, url: &str) -> NetworkError {
    match total {
        Some(expected) if received < expected && !err.is_timeout() => {
            debug!("resolver: body from {url} ended early: {err}");
            NetworkError::Truncated { received, expected }
        }
        _ => NetworkError::Request {
            url: url.to_owned(),
            source: err,
        },
    }
}
