//! HTTP fetching for crawl tasks
//!
//! This module handles:
//! - Building the HTTP client from a job's crawl settings
//! - GET requests and response classification
//! - robots.txt retrieval

use crate::config::CrawlSettings;
use crate::task::robots::RobotsPolicy;
use reqwest::{redirect::Policy, Client, StatusCode};
use std::time::Duration;
use url::Url;

/// Maximum redirect hops followed per request
const MAX_REDIRECTS: usize = 10;

/// Result of a fetch operation
#[derive(Debug)]
pub enum FetchResult {
    /// Successfully fetched an HTML page
    Success {
        /// Final URL after redirects
        final_url: String,
        status_code: u16,
        content_type: String,
        body: String,
    },

    /// Response was not HTML
    ContentMismatch { content_type: String },

    /// Non-success HTTP status
    HttpError { status_code: u16 },

    /// Connection refused, timeout, body read failure, ...
    NetworkError { error: String },
}

impl FetchResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Builds the HTTP client a task uses for the lifetime of its run
pub fn build_http_client(settings: &CrawlSettings) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(settings.user_agent.as_str())
        .timeout(Duration::from_secs(settings.request_timeout))
        .connect_timeout(Duration::from_secs(settings.request_timeout.min(10)))
        .redirect(Policy::limited(MAX_REDIRECTS))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches a page and classifies the response
///
/// | Condition | Result |
/// |-----------|--------|
/// | 2xx with `text/html` | `Success` |
/// | 2xx, other content type | `ContentMismatch` |
/// | any other status | `HttpError` |
/// | transport failure | `NetworkError` |
pub async fn fetch_url(client: &Client, url: &str) -> FetchResult {
    let response = match client.get(url).send().await {
        Ok(response) => response,
        Err(e) => return FetchResult::NetworkError { error: describe(&e) },
    };

    let status = response.status();
    if !status.is_success() {
        return FetchResult::HttpError {
            status_code: status.as_u16(),
        };
    }

    let final_url = response.url().to_string();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    if !content_type.contains("text/html") {
        return FetchResult::ContentMismatch { content_type };
    }

    match response.text().await {
        Ok(body) => FetchResult::Success {
            final_url,
            status_code: status.as_u16(),
            content_type,
            body,
        },
        Err(e) => FetchResult::NetworkError { error: describe(&e) },
    }
}

/// Retrieves the robots.txt policy for the origin of `url`
///
/// Anything other than a successful response (missing file, server error,
/// unreachable host) yields [`RobotsPolicy::AllowAll`].
pub async fn fetch_robots(client: &Client, url: &Url) -> RobotsPolicy {
    let Ok(robots_url) = url.join("/robots.txt") else {
        return RobotsPolicy::AllowAll;
    };

    match client.get(robots_url.as_str()).send().await {
        Ok(response) if response.status() == StatusCode::OK => match response.text().await {
            Ok(body) => RobotsPolicy::from_body(&body),
            Err(_) => RobotsPolicy::AllowAll,
        },
        Ok(response) => {
            tracing::debug!(
                "robots.txt for {} returned {}, allowing all",
                url.origin().ascii_serialization(),
                response.status()
            );
            RobotsPolicy::AllowAll
        }
        Err(e) => {
            tracing::debug!("robots.txt fetch failed for {}: {}", url, e);
            RobotsPolicy::AllowAll
        }
    }
}

fn describe(error: &reqwest::Error) -> String {
    if error.is_timeout() {
        "Request timeout".to_string()
    } else if error.is_connect() {
        "Connection refused".to_string()
    } else {
        error.to_string()
    }
}
