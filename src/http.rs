use std::time::Instant;

use anyhow::Context;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info, warn};

const ERROR_BODY_PREVIEW: usize = 400;
const ERROR_BODY_KEPT: usize = 4096;

/// Non-2xx answer from a vendor. The body stays out of `Display` so it can
/// only reach logs, never a client.
#[derive(Debug, Error)]
#[error("{service} responded with {status}")]
pub struct UpstreamError {
    pub service: &'static str,
    pub status: StatusCode,
    pub body: String,
}

#[derive(Deserialize)]
struct VendorErrorBody {
    error: VendorError,
}

#[derive(Deserialize)]
struct VendorError {
    message: Option<String>,
}

impl UpstreamError {
    /// `error.message` of a JSON error body, if the vendor sent one.
    pub fn vendor_message(&self) -> Option<String> {
        serde_json::from_str::<VendorErrorBody>(&self.body)
            .ok()?
            .error
            .message
            .map(|m| m.trim().to_string())
            .filter(|m| !m.is_empty())
    }
}

/// Outbound HTTP client shared by the vendor integrations.
///
/// Every call is logged with the target service, method, host and path. Query
/// strings are never logged since some vendors accept keys there.
#[derive(Clone)]
pub struct HttpClient {
    inner: Client,
    service: &'static str,
}

impl HttpClient {
    pub fn new(service: &'static str) -> anyhow::Result<Self> {
        let inner = Client::builder()
            .user_agent(concat!("mascot-studio/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { inner, service })
    }

    /// Same connection pool, different log label.
    pub fn for_service(&self, service: &'static str) -> Self {
        Self {
            inner: self.inner.clone(),
            service,
        }
    }

    pub fn request(&self, method: reqwest::Method, url: &str) -> RequestBuilder {
        self.inner.request(method, url)
    }

    /// Sends the request and logs the exchange. Non-2xx responses are turned
    /// into errors carrying a truncated body.
    pub async fn send(&self, builder: RequestBuilder) -> anyhow::Result<Response> {
        let request = builder.build().context("build request")?;
        let method = request.method().clone();
        let target = redacted_target(request.url());
        let service = self.service;

        debug!(service, %method, %target, "outbound request");
        let started = Instant::now();
        let response = match self.inner.execute(request).await {
            Ok(r) => r,
            Err(e) => {
                warn!(service, %method, %target, error = %e, "outbound request failed");
                return Err(anyhow::Error::new(e).context(format!("{service} request failed")));
            }
        };

        let status = response.status();
        let latency_ms = started.elapsed().as_millis() as u64;
        if status.is_success() {
            info!(service, %method, %target, %status, latency_ms, "outbound response");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let preview = truncate(&body, ERROR_BODY_PREVIEW);
        warn!(service, %method, %target, %status, latency_ms, body = %preview, "outbound error response");
        Err(UpstreamError {
            service,
            status,
            body: truncate(&body, ERROR_BODY_KEPT).to_string(),
        }
        .into())
    }
}

fn redacted_target(url: &reqwest::Url) -> String {
    format!("{}{}", url.host_str().unwrap_or_default(), url.path())
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}
