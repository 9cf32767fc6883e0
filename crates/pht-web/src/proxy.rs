//! Image pass-through for profile avatars hosted on the upstream CDN.

use std::time::Duration;

use anyhow::Context;
use axum::{
    body::Body,
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use reqwest::Url;
use thiserror::Error;

const CACHE_CONTROL: &str = "public, max-age=604800, immutable";

#[derive(Debug, Clone)]
pub struct ImageProxyConfig {
    pub allowed_host_suffixes: Vec<String>,
    pub user_agent: String,
    pub referer: String,
    pub timeout: Duration,
}

impl Default for ImageProxyConfig {
    fn default() -> Self {
        Self {
            allowed_host_suffixes: vec!["tiktokcdn.com".to_string(), "tiktokcdn-us.com".to_string()],
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                 (KHTML, like Gecko) Chrome/109.0.0.0 Safari/537.36"
                .to_string(),
            referer: "https://www.tiktok.com/".to_string(),
            timeout: Duration::from_secs(20),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("image URL is required")]
    MissingUrl,
    #[error("invalid image URL: {0}")]
    InvalidUrl(String),
    #[error("host {host} is not an allowed image domain")]
    Forbidden { host: String },
    #[error("upstream image request failed: {0}")]
    Upstream(#[from] reqwest::Error),
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        match self {
            ProxyError::MissingUrl => {
                (StatusCode::BAD_REQUEST, "Image URL is required").into_response()
            }
            ProxyError::InvalidUrl(_) => {
                (StatusCode::BAD_REQUEST, "Image URL is invalid").into_response()
            }
            ProxyError::Forbidden { .. } => (
                StatusCode::FORBIDDEN,
                "Forbidden: URL is not from an allowed domain.",
            )
                .into_response(),
            ProxyError::Upstream(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Error proxying image").into_response()
            }
        }
    }
}

/// Exact suffix match on a parsed hostname: `host` must equal a suffix or end
/// with `.` + suffix. Anything in the URL path is irrelevant.
pub fn host_is_allowed(host: &str, suffixes: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    suffixes.iter().any(|suffix| {
        let suffix = suffix.trim_start_matches('.').to_ascii_lowercase();
        !suffix.is_empty()
            && (host == suffix
                || host
                    .strip_suffix(suffix.as_str())
                    .is_some_and(|rest| rest.ends_with('.')))
    })
}

#[derive(Debug)]
pub struct ImageProxy {
    client: reqwest::Client,
    allowed_host_suffixes: Vec<String>,
    referer: String,
}

impl ImageProxy {
    pub fn new(config: &ImageProxyConfig) -> anyhow::Result<Self> {
        // Only the checked host is ever contacted; a 3xx is forwarded as-is.
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("building image proxy client")?;
        Ok(Self {
            client,
            allowed_host_suffixes: config.allowed_host_suffixes.clone(),
            referer: config.referer.clone(),
        })
    }

    pub fn check_url(&self, raw_url: &str) -> Result<Url, ProxyError> {
        let url = Url::parse(raw_url.trim()).map_err(|e| ProxyError::InvalidUrl(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidUrl(format!("unsupported scheme {}", url.scheme())));
        }
        let host = url
            .host_str()
            .ok_or_else(|| ProxyError::InvalidUrl("missing host".to_string()))?;
        if !host_is_allowed(host, &self.allowed_host_suffixes) {
            return Err(ProxyError::Forbidden {
                host: host.to_string(),
            });
        }
        Ok(url)
    }

    /// Streams the upstream image back unmodified. Non-success upstream
    /// statuses, redirects included, are forwarded as-is.
    pub async fn forward(&self, raw_url: &str) -> Result<Response, ProxyError> {
        let url = self.check_url(raw_url)?;
        let upstream = self
            .client
            .get(url)
            .header(reqwest::header::REFERER, self.referer.as_str())
            .send()
            .await?;

        let status = StatusCode::from_u16(upstream.status().as_u16())
            .unwrap_or(StatusCode::BAD_GATEWAY);
        if !status.is_success() {
            return Ok((status, "Failed to fetch image from source").into_response());
        }

        let content_type = upstream
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| HeaderValue::from_bytes(v.as_bytes()).ok());

        let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
        *response.status_mut() = status;
        let headers = response.headers_mut();
        if let Some(content_type) = content_type {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(CACHE_CONTROL));
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suffixes() -> Vec<String> {
        ImageProxyConfig::default().allowed_host_suffixes
    }

    #[test]
    fn cdn_subdomains_are_allowed() {
        assert!(host_is_allowed("p16-sign-va.tiktokcdn.com", &suffixes()));
        assert!(host_is_allowed("P77-SIGN-VA.TIKTOKCDN.COM", &suffixes()));
        assert!(host_is_allowed("tiktokcdn.com", &suffixes()));
        assert!(host_is_allowed("p16.tiktokcdn-us.com.", &suffixes()));
    }

    #[test]
    fn lookalike_hosts_are_rejected() {
        assert!(!host_is_allowed("evil.com", &suffixes()));
        assert!(!host_is_allowed("eviltiktokcdn.com", &suffixes()));
        assert!(!host_is_allowed("tiktokcdn.com.evil.com", &suffixes()));
        assert!(!host_is_allowed("anything", &[String::new()]));
    }

    #[test]
    fn path_mentioning_the_cdn_does_not_pass() {
        let proxy = ImageProxy::new(&ImageProxyConfig::default()).unwrap();
        let err = proxy
            .check_url("https://evil.com/tiktokcdn.com/img.jpg")
            .unwrap_err();
        assert!(matches!(err, ProxyError::Forbidden { host } if host == "evil.com"));
    }

    #[test]
    fn non_http_urls_are_invalid() {
        let proxy = ImageProxy::new(&ImageProxyConfig::default()).unwrap();
        assert!(matches!(
            proxy.check_url("file:///etc/passwd"),
            Err(ProxyError::InvalidUrl(_))
        ));
        assert!(matches!(proxy.check_url("not a url"), Err(ProxyError::InvalidUrl(_))));
    }
}
