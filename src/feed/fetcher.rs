use futures::StreamExt;
use reqwest::redirect::Policy;
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::config::Config;
use crate::feed::parser::{parse_feed, ParseError, ParsedFeed};
use crate::ingest::ErrorCode;
use crate::util::{validate_feed_url, UrlValidationError};

/// Errors that can occur while retrieving and parsing one feed.
#[derive(Debug, Error)]
pub enum FetchError {
    /// URL failed validation before any request was made
    #[error("Invalid feed URL: {0}")]
    InvalidUrl(#[from] UrlValidationError),
    /// A redirect hop pointed at a URL that fails validation
    #[error("Redirect to disallowed URL {url}: {reason}")]
    UnsafeRedirect { url: String, reason: String },
    /// Network-level error (DNS, connection, TLS, etc.)
    #[error("Request failed: {0}")]
    Network(#[from] reqwest::Error),
    /// HTTP response with non-2xx status code
    #[error("HTTP error: status {0}")]
    HttpStatus(u16),
    /// Response body exceeded the configured size limit
    #[error("Response larger than {0} bytes")]
    ResponseTooLarge(usize),
    /// Received fewer bytes than Content-Length announced
    #[error("Incomplete response: expected {expected} bytes, received {received}")]
    IncompleteResponse { expected: u64, received: usize },
    /// Request plus body read exceeded the fetch timeout
    #[error("Request timed out after {0}s")]
    Timeout(u64),
    /// Body could not be parsed as RSS or Atom
    #[error(transparent)]
    InvalidFeed(#[from] ParseError),
}

impl FetchError {
    /// Taxonomy code recorded on the feed and in run reports
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl(_) | Self::UnsafeRedirect { .. } => ErrorCode::InvalidUrl,
            Self::Network(e) if e.is_timeout() => ErrorCode::Timeout,
            Self::Network(_)
            | Self::HttpStatus(_)
            | Self::ResponseTooLarge(_)
            | Self::IncompleteResponse { .. } => ErrorCode::FetchFailed,
            Self::Timeout(_) => ErrorCode::Timeout,
            Self::InvalidFeed(_) => ErrorCode::InvalidFeed,
        }
    }
}

/// HTTP client for feed retrieval.
///
/// One instance is built per run and shared by every feed fetch; cloning is
/// cheap because `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct FeedFetcher {
    client: reqwest::Client,
    timeout: Duration,
    max_bytes: usize,
    max_items: usize,
    allow_private_hosts: bool,
}

impl FeedFetcher {
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Self::from_builder(reqwest::Client::builder(), config)
    }

    fn from_builder(
        builder: reqwest::ClientBuilder,
        config: &Config,
    ) -> Result<Self, FetchError> {
        let client = builder
            .user_agent(config.user_agent.as_str())
            .redirect(redirect_policy(config.allow_private_hosts))
            .build()?;

        Ok(Self {
            client,
            timeout: Duration::from_secs(config.fetch_timeout_secs),
            max_bytes: config.max_feed_bytes,
            max_items: config.max_items_per_fetch,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    /// Validate, download and parse one feed.
    ///
    /// No retries: a failed feed is picked up again by a later scheduled run.
    pub async fn fetch(&self, url: &str) -> Result<ParsedFeed, FetchError> {
        let url = validate_feed_url(url, self.allow_private_hosts)?;

        let bytes = tokio::time::timeout(self.timeout, self.download(url))
            .await
            .map_err(|_| FetchError::Timeout(self.timeout.as_secs()))??;

        let feed = parse_feed(&bytes, self.max_items)?;
        if feed.dropped > 0 {
            tracing::debug!(
                kept = feed.items.len(),
                dropped = feed.dropped,
                "Feed entries beyond per-fetch cap ignored"
            );
        }
        Ok(feed)
    }

    async fn download(&self, url: Url) -> Result<Vec<u8>, FetchError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        read_limited_bytes(response, self.max_bytes).await
    }
}

const MAX_REDIRECTS: usize = 3;

#[derive(Debug, Error)]
enum RedirectError {
    #[error("Too many redirects (max {MAX_REDIRECTS})")]
    TooMany,
    #[error("Redirect loop detected")]
    Loop,
    #[error("Redirect to {url} rejected: {reason}")]
    Rejected {
        url: String,
        reason: UrlValidationError,
    },
}

/// Every hop gets the same URL checks as the feed URL itself.
fn check_redirect(
    next: &Url,
    previous: &[Url],
    allow_private_hosts: bool,
) -> Result<(), RedirectError> {
    if previous.len() >= MAX_REDIRECTS {
        return Err(RedirectError::TooMany);
    }
    if previous.iter().any(|prev| prev == next) {
        return Err(RedirectError::Loop);
    }
    validate_feed_url(next.as_str(), allow_private_hosts).map_err(|reason| {
        RedirectError::Rejected {
            url: next.to_string(),
            reason,
        }
    })?;
    Ok(())
}

fn redirect_policy(allow_private_hosts: bool) -> Policy {
    Policy::custom(move |attempt| {
        match check_redirect(attempt.url(), attempt.previous(), allow_private_hosts) {
            Ok(()) => {
                tracing::debug!(
                    from = %attempt.previous().last().map(|u| u.as_str()).unwrap_or("initial"),
                    to = %attempt.url(),
                    hop = attempt.previous().len(),
                    "Following redirect"
                );
                attempt.follow()
            }
            Err(e) => attempt.error(e),
        }
    })
}

/// A redirect rejected by URL validation is an invalid URL, not a network failure.
fn classify_send_error(err: reqwest::Error) -> FetchError {
    let mut source = std::error::Error::source(&err);
    while let Some(inner) = source {
        if let Some(RedirectError::Rejected { url, reason }) = inner.downcast_ref::<RedirectError>()
        {
            return FetchError::UnsafeRedirect {
                url: url.clone(),
                reason: reason.to_string(),
            };
        }
        source = inner.source();
    }
    FetchError::Network(err)
}

async fn read_limited_bytes(
    response: reqwest::Response,
    limit: usize,
) -> Result<Vec<u8>, FetchError> {
    let expected_length = response.content_length();

    // Fast path: check Content-Length header
    if let Some(len) = expected_length {
        if len > limit as u64 {
            return Err(FetchError::ResponseTooLarge(limit));
        }
    }

    let mut bytes = Vec::new();
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        if bytes.len().saturating_add(chunk.len()) > limit {
            return Err(FetchError::ResponseTooLarge(limit));
        }
        bytes.extend_from_slice(&chunk);
    }

    if let Some(expected) = expected_length {
        if (bytes.len() as u64) < expected {
            return Err(FetchError::IncompleteResponse {
                expected,
                received: bytes.len(),
            });
        }
    }

    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const VALID_RSS: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
    <title>Mock Feed</title>
    <item><guid>1</guid><title>Test</title></item>
</channel></rss>"#;

    fn fetcher(timeout_secs: u64, max_bytes: usize) -> FeedFetcher {
        FeedFetcher::from_config(&Config {
            fetch_timeout_secs: timeout_secs,
            max_feed_bytes: max_bytes,
            allow_private_hosts: true,
            ..Config::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success_sends_user_agent() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .and(header("user-agent", Config::default().user_agent.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .insert_header("Content-Type", "application/xml"),
            )
            .mount(&mock_server)
            .await;

        let feed = fetcher(5, 1024 * 1024)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap();
        assert_eq!(feed.title, "Mock Feed");
        assert_eq!(feed.items.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_404_is_fetch_failed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let err = fetcher(5, 1024)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::HttpStatus(404)));
        assert_eq!(err.code(), ErrorCode::FetchFailed);
    }

    #[tokio::test]
    async fn test_fetch_non_feed_body_is_invalid_feed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html><body>hi</body></html>"))
            .mount(&mock_server)
            .await;

        let err = fetcher(5, 1024 * 1024)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidFeed);
    }

    #[tokio::test]
    async fn test_fetch_oversized_body_rejected() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(4096)))
            .mount(&mock_server)
            .await;

        let err = fetcher(5, 1024)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ResponseTooLarge(1024)));
        assert_eq!(err.code(), ErrorCode::FetchFailed);
    }

    #[tokio::test]
    async fn test_fetch_slow_server_times_out() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(VALID_RSS)
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&mock_server)
            .await;

        let err = fetcher(1, 1024 * 1024)
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Timeout(1)));
        assert_eq!(err.code(), ErrorCode::Timeout);
    }

    #[tokio::test]
    async fn test_private_host_rejected_without_opt_in() {
        let mock_server = MockServer::start().await;
        let strict = FeedFetcher::from_config(&Config::default()).unwrap();

        let err = strict
            .fetch(&format!("{}/feed", mock_server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::InvalidUrl(_)));
        assert_eq!(err.code(), ErrorCode::InvalidUrl);
    }

    #[tokio::test]
    async fn test_bad_scheme_is_invalid_url() {
        let err = fetcher(5, 1024).fetch("ftp://example.com/feed").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::InvalidUrl);
    }

    // The mock server acts as a plain HTTP proxy, so a strict fetcher can
    // request public-looking hosts and still reach it.
    fn strict_fetcher_through(proxy: &MockServer) -> FeedFetcher {
        let builder =
            reqwest::Client::builder().proxy(reqwest::Proxy::http(proxy.uri()).unwrap());
        FeedFetcher::from_builder(builder, &Config::default()).unwrap()
    }

    fn redirect_to(location: &str) -> ResponseTemplate {
        ResponseTemplate::new(302).insert_header("Location", location)
    }

    #[tokio::test]
    async fn test_redirect_to_loopback_rejected_without_opt_in() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(redirect_to("http://127.0.0.1:9/internal"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/internal"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(0)
            .mount(&mock_server)
            .await;

        let err = strict_fetcher_through(&mock_server)
            .fetch("http://feeds.example.com/feed")
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::UnsafeRedirect { .. }), "{err:?}");
        assert_eq!(err.code(), ErrorCode::InvalidUrl);
        assert!(err.to_string().contains("127.0.0.1"));
    }

    #[tokio::test]
    async fn test_redirect_to_public_host_followed() {
        let mock_server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/feed"))
            .respond_with(redirect_to("http://cdn.example.org/moved"))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/moved"))
            .respond_with(ResponseTemplate::new(200).set_body_string(VALID_RSS))
            .expect(1)
            .mount(&mock_server)
            .await;

        let feed = strict_fetcher_through(&mock_server)
            .fetch("http://feeds.example.com/feed")
            .await
            .unwrap();
        assert_eq!(feed.title, "Mock Feed");
    }

    #[tokio::test]
    async fn test_redirect_loop_is_fetch_failed() {
        let mock_server = MockServer::start().await;
        let uri = mock_server.uri();
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(redirect_to(&format!("{uri}/b")))
            .mount(&mock_server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(redirect_to(&format!("{uri}/a")))
            .mount(&mock_server)
            .await;

        let err = fetcher(5, 1024).fetch(&format!("{uri}/a")).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)), "{err:?}");
        assert_eq!(err.code(), ErrorCode::FetchFailed);
    }

    #[test]
    fn test_check_redirect_rules() {
        let url = |s: &str| Url::parse(s).unwrap();
        let start = url("https://feeds.example.com/rss");

        assert!(check_redirect(&url("https://cdn.example.com/rss"), &[start.clone()], false).is_ok());
        assert!(matches!(
            check_redirect(&url("http://10.0.0.5/rss"), &[start.clone()], false),
            Err(RedirectError::Rejected { .. })
        ));
        assert!(check_redirect(&url("http://10.0.0.5/rss"), &[start.clone()], true).is_ok());
        assert!(matches!(
            check_redirect(&url("ftp://cdn.example.com/rss"), &[start.clone()], true),
            Err(RedirectError::Rejected { .. })
        ));
        assert!(matches!(
            check_redirect(&start, &[start.clone(), url("https://a.example.com/")], false),
            Err(RedirectError::Loop)
        ));

        let hops = vec![
            start.clone(),
            url("https://a.example.com/"),
            url("https://b.example.com/"),
        ];
        assert!(matches!(
            check_redirect(&url("https://c.example.com/"), &hops, false),
            Err(RedirectError::TooMany)
        ));
        assert!(check_redirect(&url("https://c.example.com/"), &hops[..2], false).is_ok());
    }
}
