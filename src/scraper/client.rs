//! Blocking HTTP client with configurable politeness (delay between requests) and retries,
//! plus the [Fetch] seam the rest of the crate downloads through.

use log::{debug, warn};
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (compatible; rrtool/0.1; +https://github.com/rrtool/rrtool)";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DELAY_SECS: u64 = 1;
const MAX_REDIRECTS: usize = 10;

/// Default number of attempts for get_with_retry (initial plus retries).
const DEFAULT_RETRY_COUNT: u32 = 4;
/// Default backoff delays in seconds after each failed attempt (1s, 2s, 4s).
const DEFAULT_BACKOFF_SECS: [u64; 3] = [1, 2, 4];
/// Backoff for HTTP 429 (rate limit): wait longer so the server can recover.
const BACKOFF_429_SECS: [u64; 4] = [30, 60, 90, 120];

/// Cloudflare "origin unreachable": the source site itself is down.
const SOURCE_OUTAGE_STATUS: u16 = 522;

/// Failure of one fetch. Not-found and source-outage are kept apart from other failures.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Could not reach {url}: {source}")]
    Connection {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Not found (HTTP 404): {url}")]
    NotFound { url: String },

    #[error("Royal Road appears to be down (HTTP 522): {url}")]
    ServiceUnavailable { url: String },

    #[error("HTTP {status} when fetching: {url}")]
    HttpStatus { status: u16, url: String },

    #[error("Failed to read response body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Download primitive. Implemented by [PoliteClient]; tests substitute in-memory fakes.
pub trait Fetch {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, FetchError>;

    /// Fetch and decode as UTF-8, replacing invalid sequences.
    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        let bytes = self.fetch(url)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }
}

/// Blocking HTTP client that enforces a delay between requests.
#[derive(Debug)]
pub struct PoliteClient {
    inner: reqwest::blocking::Client,
    delay: Duration,
    last_request: Option<Instant>,
    retry_count: u32,
    backoff_secs: Vec<u64>,
}

impl PoliteClient {
    /// Build a polite client with default User-Agent, timeout, and delay.
    pub fn new() -> Result<Self, reqwest::Error> {
        Self::builder().build()
    }

    /// Builder for custom User-Agent, delay, timeout and retries.
    pub fn builder() -> PoliteClientBuilder {
        PoliteClientBuilder::default()
    }

    /// Perform a GET request with retries for transient failures.
    ///
    /// Retries on connection errors, HTTP 429 and HTTP 5xx other than 522. A timeout is final so
    /// one fetch never outlives the configured timeout. HTTP 404
    /// and 522 are returned immediately as [FetchError::NotFound] and
    /// [FetchError::ServiceUnavailable]; any other non-success status is [FetchError::HttpStatus].
    pub fn get_with_retry(
        &mut self,
        url: &str,
    ) -> Result<reqwest::blocking::Response, FetchError> {
        let max_attempts = self.retry_count.max(1);
        let mut attempt = 0u32;
        loop {
            self.wait_delay();
            debug!("GET {} (attempt {}/{})", url, attempt + 1, max_attempts);
            let outcome = self.inner.get(url).send();
            self.last_request = Some(Instant::now());
            let last_attempt = attempt + 1 >= max_attempts;

            let backoff = match outcome {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return Ok(response);
                    }
                    let code = status.as_u16();
                    if code == 404 {
                        return Err(FetchError::NotFound {
                            url: url.to_string(),
                        });
                    }
                    if code == SOURCE_OUTAGE_STATUS {
                        return Err(FetchError::ServiceUnavailable {
                            url: url.to_string(),
                        });
                    }
                    let retryable = code == 429 || status.is_server_error();
                    if !retryable || last_attempt {
                        return Err(FetchError::HttpStatus {
                            status: code,
                            url: url.to_string(),
                        });
                    }
                    let backoff = if code == 429 {
                        backoff_at(&BACKOFF_429_SECS, attempt)
                    } else {
                        backoff_at(&self.backoff_secs, attempt)
                    };
                    warn!("HTTP {} from {}, retrying in {}s", code, url, backoff);
                    backoff
                }
                Err(e) => {
                    let retryable = e.is_connect() && !e.is_timeout();
                    if !retryable || last_attempt {
                        return Err(FetchError::Connection {
                            url: url.to_string(),
                            source: e,
                        });
                    }
                    let backoff = backoff_at(&self.backoff_secs, attempt);
                    warn!("{} failed ({}), retrying in {}s", url, e, backoff);
                    backoff
                }
            };
            std::thread::sleep(Duration::from_secs(backoff));
            attempt += 1;
        }
    }

    fn wait_delay(&mut self) {
        if let Some(last) = self.last_request {
            let elapsed = last.elapsed();
            if elapsed < self.delay {
                std::thread::sleep(self.delay - elapsed);
            }
        }
    }
}

impl Fetch for PoliteClient {
    fn fetch(&mut self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.get_with_retry(url)?;
        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|source| FetchError::BodyRead {
                url: url.to_string(),
                source,
            })
    }

    fn fetch_text(&mut self, url: &str) -> Result<String, FetchError> {
        let response = self.get_with_retry(url)?;
        response.text().map_err(|source| FetchError::BodyRead {
            url: url.to_string(),
            source,
        })
    }
}

/// Delay for `attempt`; the last entry is reused when the table is shorter.
fn backoff_at(table: &[u64], attempt: u32) -> u64 {
    table
        .get(attempt as usize)
        .or_else(|| table.last())
        .copied()
        .unwrap_or(1)
}

/// Builder for PoliteClient with optional User-Agent, delay, timeout, and retry settings.
#[derive(Debug)]
pub struct PoliteClientBuilder {
    user_agent: Option<String>,
    delay_secs: u64,
    timeout_secs: u64,
    retry_count: u32,
    retry_backoff_secs: Vec<u64>,
}

impl Default for PoliteClientBuilder {
    fn default() -> Self {
        Self {
            user_agent: None,
            delay_secs: DEFAULT_DELAY_SECS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retry_count: DEFAULT_RETRY_COUNT,
            retry_backoff_secs: DEFAULT_BACKOFF_SECS.to_vec(),
        }
    }
}

impl PoliteClientBuilder {
    /// Set a custom User-Agent. If not set, a browser-like default is used.
    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }

    /// Set delay between requests in seconds. Default 1.
    pub fn delay_secs(mut self, secs: u64) -> Self {
        self.delay_secs = secs;
        self
    }

    /// Set request timeout in seconds. Default 30.
    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set number of HTTP attempts for transient failures (default 4).
    pub fn retry_count(mut self, n: u32) -> Self {
        self.retry_count = n.max(1);
        self
    }

    /// Set backoff delays in seconds before each retry (e.g. [1, 2, 4]). If shorter than
    /// retry_count - 1, the last value is reused.
    pub fn retry_backoff_secs(mut self, secs: Vec<u64>) -> Self {
        self.retry_backoff_secs = secs;
        self
    }

    /// Build the blocking client and polite wrapper.
    pub fn build(self) -> Result<PoliteClient, reqwest::Error> {
        let user_agent = self
            .user_agent
            .unwrap_or_else(|| DEFAULT_USER_AGENT.to_string());
        let inner = reqwest::blocking::Client::builder()
            .cookie_store(true)
            .user_agent(user_agent)
            .timeout(Duration::from_secs(self.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()?;
        let backoff_secs = if self.retry_backoff_secs.is_empty() {
            // exponential: 1, 2, 4, ... for (retry_count - 1) steps
            let n = self.retry_count.saturating_sub(1) as usize;
            (0..n).map(|i| 1u64 << i.min(4)).collect::<Vec<_>>()
        } else {
            self.retry_backoff_secs
        };
        Ok(PoliteClient {
            inner,
            delay: Duration::from_secs(self.delay_secs),
            last_request: None,
            retry_count: self.retry_count,
            backoff_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_not_retried() -> Result<(), Box<dyn std::error::Error>> {
        // Accepts the connection in the backlog but never answers.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/fiction/1", listener.local_addr()?);
        let mut client = PoliteClient::builder()
            .timeout_secs(1)
            .delay_secs(0)
            .retry_count(3)
            .retry_backoff_secs(vec![5])
            .build()?;
        let started = Instant::now();
        let result = client.fetch(&url);
        assert!(matches!(result, Err(FetchError::Connection { .. })));
        assert!(started.elapsed() < Duration::from_secs(4));
        drop(listener);
        Ok(())
    }

    #[test]
    fn backoff_reuses_last_entry() {
        assert_eq!(backoff_at(&[1, 2, 4], 0), 1);
        assert_eq!(backoff_at(&[1, 2, 4], 2), 4);
        assert_eq!(backoff_at(&[1, 2, 4], 9), 4);
        assert_eq!(backoff_at(&[], 0), 1);
    }

    #[test]
    fn builder_derives_exponential_backoff_when_empty() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder()
            .retry_count(4)
            .retry_backoff_secs(Vec::new())
            .delay_secs(0)
            .build()?;
        assert_eq!(client.backoff_secs, vec![1, 2, 4]);
        assert_eq!(client.retry_count, 4);
        assert_eq!(client.delay, Duration::from_secs(0));
        Ok(())
    }

    #[test]
    fn retry_count_is_at_least_one() -> Result<(), reqwest::Error> {
        let client = PoliteClient::builder().retry_count(0).build()?;
        assert_eq!(client.retry_count, 1);
        Ok(())
    }

    #[test]
    fn outage_message_names_the_source() {
        let e = FetchError::ServiceUnavailable {
            url: "https://www.royalroad.com/fiction/1".to_string(),
        };
        assert!(e.to_string().starts_with("Royal Road appears to be down (HTTP 522)"));
    }

    struct Canned(&'static [u8]);

    impl Fetch for Canned {
        fn fetch(&mut self, _url: &str) -> Result<Vec<u8>, FetchError> {
            Ok(self.0.to_vec())
        }
    }

    #[test]
    fn fetch_text_is_lossy() -> Result<(), FetchError> {
        let mut f = Canned(b"caf\xc3\xa9 \xff");
        assert_eq!(f.fetch_text("x")?, "caf\u{e9} \u{fffd}");
        Ok(())
    }
}
