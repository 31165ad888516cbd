use std::net::IpAddr;
use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::redirect::Policy;
use reqwest::{Client, Response};
use sift_core::error::AppError;
use sift_core::fetch::FetchRequest;
use sift_core::traits::Fetcher;
use url::Url;

/// Redirect hops followed before giving up.
const MAX_REDIRECTS: usize = 5;

/// HTTP fetcher using reqwest. Makes exactly one logical GET per call.
///
/// Headers (including the rotated `User-Agent`) come from the
/// [`FetchRequest`]. By default, SSRF protection is **enabled**: requests
/// to private/reserved IP ranges are refused as invalid input, and so is
/// every redirect hop that lands on one. Redirects are therefore followed
/// by hand rather than by reqwest. Use
/// [`allow_private_urls`](Self::allow_private_urls) to disable this (e.g.
/// for CLI usage) or [`allow_host`](Self::allow_host) to exempt one host.
#[derive(Clone)]
pub struct ReqwestFetcher {
    client: Client,
    timeout: Duration,
    ssrf_protection: bool,
    allowed_hosts: Vec<String>,
}

impl ReqwestFetcher {
    pub fn new() -> Result<Self, AppError> {
        Self::with_timeout(Duration::from_secs(10))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self, AppError> {
        let client = Client::builder()
            .timeout(timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| AppError::ConfigError(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            timeout,
            ssrf_protection: true,
            allowed_hosts: Vec::new(),
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    ///
    /// Only use this where the operator controls the target network.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    /// Exempt one exact host (name or IP literal) from SSRF checks while
    /// keeping them for everything else, redirect targets included.
    pub fn allow_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.push(host.into().to_ascii_lowercase());
        self
    }

    async fn send(&self, url: &Url, request: &FetchRequest) -> Result<Response, AppError> {
        let mut builder = self.client.get(url.as_str());
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder.send().await.map_err(|e| {
            if e.is_timeout() {
                AppError::Timeout(self.timeout)
            } else if e.is_connect() {
                AppError::NetworkError(format!("Connection failed: {e}"))
            } else {
                AppError::NetworkError(e.to_string())
            }
        })
    }
}

/// Target of a redirect response, resolved against the URL that produced it.
fn redirect_target(current: &Url, response: &Response) -> Option<Result<Url, AppError>> {
    if !response.status().is_redirection() {
        return None;
    }
    let location = response.headers().get(LOCATION)?;

    let next = location
        .to_str()
        .ok()
        .and_then(|l| current.join(l).ok())
        .ok_or_else(|| AppError::NetworkError(format!("Invalid redirect location from {current}")));

    Some(next.and_then(|next| match next.scheme() {
        "http" | "https" => Ok(next),
        scheme => Err(AppError::InvalidInput(format!(
            "Redirect from {current} to scheme '{scheme}' is not allowed"
        ))),
    }))
}

impl Fetcher for ReqwestFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<String, AppError> {
        let mut url = Url::parse(&request.url)
            .map_err(|e| AppError::InvalidInput(format!("Invalid URL: {e}")))?;
        let mut hops = 0;

        let response = loop {
            if self.ssrf_protection {
                validate_url(url.as_str(), &self.allowed_hosts).await?;
            }

            let response = self.send(&url, request).await?;
            let Some(next) = redirect_target(&url, &response) else {
                break response;
            };
            let next = next?;

            if hops == MAX_REDIRECTS {
                return Err(AppError::NetworkError(format!(
                    "Too many redirects fetching {}",
                    request.url
                )));
            }
            hops += 1;
            tracing::debug!(from = %url, to = %next, hops, "Following redirect");
            url = next;
        };

        let status = response.status();
        if !status.is_success() {
            return Err(AppError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        tracing::debug!(url = %url, status = status.as_u16(), attempt = request.attempt, "Response received");

        response
            .text()
            .await
            .map_err(|e| AppError::NetworkError(format!("Failed to read response body: {e}")))
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Validate a URL to prevent server-side request forgery (SSRF).
///
/// 1. Only allow `http` and `https` schemes.
/// 2. Resolve the hostname via DNS.
/// 3. Reject if any resolved IP is private/reserved.
async fn validate_url(url: &str, allowed_hosts: &[String]) -> Result<(), AppError> {
    let parsed =
        Url::parse(url).map_err(|e| AppError::InvalidInput(format!("Invalid URL: {e}")))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(AppError::InvalidInput(format!(
                "URL scheme '{scheme}' is not allowed (only http/https)"
            )));
        }
    }

    let host = parsed
        .host_str()
        .ok_or_else(|| AppError::InvalidInput("URL has no host".to_string()))?;
    let host = host.trim_start_matches('[').trim_end_matches(']');

    if allowed_hosts.iter().any(|h| h == host) {
        return Ok(());
    }

    if let Ok(ip) = host.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return Err(AppError::InvalidInput(format!(
                "SSRF blocked: {host} resolves to private/reserved IP"
            )));
        }
        return Ok(());
    }

    let port = parsed.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| AppError::NetworkError(format!("DNS resolution failed for {host}: {e}")))?
        .collect();

    if addrs.is_empty() {
        return Err(AppError::NetworkError(format!(
            "DNS resolution returned no addresses for {host}"
        )));
    }

    if let Some(blocked) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return Err(AppError::InvalidInput(format!(
            "SSRF blocked: {host} resolves to private/reserved IP {}",
            blocked.ip()
        )));
    }

    Ok(())
}

/// Check if an IP address is in a private/reserved/link-local range.
fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local() // includes cloud metadata 169.254.169.254
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                || v4.octets()[0] == 100 && (v4.octets()[1] & 0xC0) == 64 // 100.64.0.0/10 (CGN)
        }
        IpAddr::V6(v6) => {
            v6.is_loopback()
                || v6.is_unspecified()
                || (v6.segments()[0] & 0xFFC0) == 0xFE80 // link-local
                || (v6.segments()[0] & 0xFE00) == 0xFC00 // unique local
                || v6.to_ipv4_mapped().is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
