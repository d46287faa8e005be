//! Shared HTTP client helpers.

use crate::error::ThinkError;
use std::net::IpAddr;
use std::time::Duration;

/// Build a reqwest client with the request timeout applied and the proxy
/// disabled for loopback targets (local gateways, tests).
pub fn build_http_client(
    base_url: &str,
    request_timeout: Duration,
) -> Result<reqwest::Client, ThinkError> {
    let mut builder = reqwest::Client::builder()
        .timeout(request_timeout)
        .connect_timeout(Duration::from_secs(10));
    if cfg!(test) || is_loopback_base_url(base_url) {
        builder = builder.no_proxy();
    }
    builder.build().map_err(|e| ThinkError::Permanent {
        message: format!("failed to build HTTP client: {e}"),
    })
}

fn is_loopback_base_url(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let normalized = host.trim_matches(&['[', ']'][..]);
    normalized.eq_ignore_ascii_case("localhost")
        || normalized
            .parse::<IpAddr>()
            .map(|ip| ip.is_loopback())
            .unwrap_or(false)
}
