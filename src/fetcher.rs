//! Remote resource retrieval with exponential backoff retry logic.
//!
//! This module knows nothing about the site's structure; it turns a URL
//! into bytes, either buffered in memory (pages) or streamed into a
//! [`ByteSink`] (audio and image assets).
//!
//! # Architecture
//!
//! - [`Fetch`]: core trait, one method streaming a body into a sink
//! - [`HttpFetcher`]: a single attempt over `reqwest`
//! - [`RetryFetch`]: decorator adding bounded retries to any [`Fetch`]
//!
//! # Retry Strategy
//!
//! - `max_retries` retries after the first attempt (3 by default)
//! - Exponential backoff starting at `base_delay`, capped at `max_delay`
//! - Random jitter (0-250ms) added to each delay
//! - 404/410 and other 4xx answers are never retried

use crate::config::CrawlConfig;
use crate::error::{FetchError, TransferError};
use bytes::Bytes;
use futures::StreamExt;
use rand::{Rng, rng};
use reqwest::StatusCode;
use std::fmt;
use std::io;
use std::time::{Duration as StdDuration, Instant};
use tokio::time::sleep;
use tracing::{debug, error, instrument, warn};

/// Fallback cap for in-memory page bodies.
pub const DEFAULT_MAX_PAGE_BYTES: usize = 8 * 1024 * 1024;

/// Destination for a streamed response body.
///
/// Implemented by in-memory buffers and by the archive's staged files.
#[allow(async_fn_in_trait)]
pub trait ByteSink {
    /// Drop everything written so far. Called before every attempt.
    async fn restart(&mut self) -> io::Result<()>;

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()>;
}

impl ByteSink for Vec<u8> {
    async fn restart(&mut self) -> io::Result<()> {
        self.clear();
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.extend_from_slice(chunk);
        Ok(())
    }
}

/// In-memory sink that refuses to grow past a limit.
#[derive(Debug)]
pub struct CappedBuffer {
    buf: Vec<u8>,
    max: usize,
    overflowed: bool,
}

impl CappedBuffer {
    pub fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            max,
            overflowed: false,
        }
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }
}

impl ByteSink for CappedBuffer {
    async fn restart(&mut self) -> io::Result<()> {
        self.buf.clear();
        self.overflowed = false;
        Ok(())
    }

    async fn write_chunk(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.buf.len() + chunk.len() > self.max {
            self.overflowed = true;
            return Err(io::Error::other(format!("body exceeds {} bytes", self.max)));
        }
        self.buf.extend_from_slice(chunk);
        Ok(())
    }
}

/// Something that can retrieve a URL.
#[allow(async_fn_in_trait)]
pub trait Fetch {
    /// Stream the body of `url` into `sink`, returning the bytes written.
    async fn fetch_to<S: ByteSink>(&self, url: &str, sink: &mut S) -> Result<u64, TransferError>;

    /// Largest page body [`Fetch::fetch`] will buffer.
    fn page_limit(&self) -> usize {
        DEFAULT_MAX_PAGE_BYTES
    }

    /// Retrieve a whole (page-sized) body into memory.
    async fn fetch(&self, url: &str) -> Result<Bytes, FetchError> {
        let max = self.page_limit();
        let mut buf = CappedBuffer::new(max);
        match self.fetch_to(url, &mut buf).await {
            Ok(_) => Ok(buf.into_bytes()),
            Err(TransferError::Fetch(e)) => Err(e),
            Err(TransferError::Sink(_)) if buf.overflowed() => Err(FetchError::TooLarge {
                url: url.to_string(),
                max,
            }),
            Err(TransferError::Sink(e)) => Err(FetchError::Transient {
                url: url.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

/// Map an HTTP status to the error it represents, if any.
pub fn classify_status(url: &str, status: StatusCode) -> Option<FetchError> {
    if status.is_success() {
        return None;
    }
    let url = url.to_string();
    let code = status.as_u16();
    Some(match status {
        StatusCode::NOT_FOUND | StatusCode::GONE => FetchError::NotFound { url, status: code },
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => FetchError::Transient {
            url,
            reason: format!("HTTP {code}"),
        },
        s if s.is_server_error() => FetchError::Transient {
            url,
            reason: format!("HTTP {code}"),
        },
        _ => FetchError::Rejected { url, status: code },
    })
}

/// One-shot HTTP retrieval. Every network-level failure is reported as
/// [`FetchError::Transient`]; retrying is [`RetryFetch`]'s job.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
    max_page_bytes: usize,
}

impl HttpFetcher {
    pub fn new(config: &CrawlConfig) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .connect_timeout(StdDuration::from_secs(30))
            .timeout(config.request_timeout())
            .build()?;
        Ok(Self {
            client,
            max_page_bytes: config.max_page_bytes,
        })
    }

    fn transient(url: &str, e: &reqwest::Error) -> FetchError {
        let reason = if e.is_timeout() {
            format!("timed out: {e}")
        } else if e.is_connect() {
            format!("connection failed: {e}")
        } else {
            e.to_string()
        };
        FetchError::Transient {
            url: url.to_string(),
            reason,
        }
    }
}

impl Fetch for HttpFetcher {
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch_to<S: ByteSink>(&self, url: &str, sink: &mut S) -> Result<u64, TransferError> {
        let parsed = url::Url::parse(url).map_err(|_| FetchError::InvalidUrl(url.to_string()))?;
        let t0 = Instant::now();

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| Self::transient(url, &e))?;
        if let Some(err) = classify_status(url, response.status()) {
            return Err(err.into());
        }

        let mut body = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = body.next().await {
            let chunk = chunk.map_err(|e| Self::transient(url, &e))?;
            sink.write_chunk(&chunk).await.map_err(TransferError::Sink)?;
            written += chunk.len() as u64;
        }

        debug!(
            bytes = written,
            elapsed_ms = t0.elapsed().as_millis() as u128,
            "Fetched body"
        );
        Ok(written)
    }

    fn page_limit(&self) -> usize {
        self.max_page_bytes
    }
}

/// Wrapper that adds exponential backoff retry logic to any [`Fetch`] implementation.
///
/// The delay between retries follows this formula:
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=jitter)
/// ```
pub struct RetryFetch<T> {
    inner: T,
    max_retries: usize,
    base_delay: StdDuration,
    max_delay: StdDuration,
    /// Upper bound of the random jitter added to each delay.
    jitter: StdDuration,
}

impl<T> RetryFetch<T>
where
    T: Fetch,
{
    /// Create a new retry wrapper around an existing [`Fetch`] implementation.
    ///
    /// # Arguments
    ///
    /// * `inner` - The fetcher performing single attempts
    /// * `max_retries` - Retries after the first attempt (3 by default)
    /// * `base_delay` - Delay before the first retry; doubles with each attempt
    ///
    /// The delay cap starts at 30 seconds and the jitter at 250ms; see
    /// [`RetryFetch::with_max_delay`] and [`RetryFetch::with_jitter`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let fetcher = RetryFetch::new(HttpFetcher::new(&config)?, 3, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: StdDuration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: StdDuration::from_secs(30),
            jitter: StdDuration::from_millis(250),
        }
    }

    pub fn with_max_delay(mut self, max_delay: StdDuration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn with_jitter(mut self, jitter: StdDuration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before retry number `attempt` (1-based), without jitter.
    fn backoff(&self, attempt: usize) -> StdDuration {
        let shift = (attempt.saturating_sub(1)).min(31) as u32;
        let delay = self.base_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Fetch for RetryFetch<T>
where
    T: Fetch,
{
    #[instrument(level = "debug", skip_all, fields(%url))]
    async fn fetch_to<S: ByteSink>(&self, url: &str, sink: &mut S) -> Result<u64, TransferError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            sink.restart().await.map_err(TransferError::Sink)?;
            let attempt_t0 = Instant::now();
            match self.inner.fetch_to(url, sink).await {
                Ok(written) => return Ok(written),
                Err(TransferError::Fetch(e)) if e.is_retryable() => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis() as u128,
                            error = %e,
                            "fetch exhausted retries"
                        );
                        let reason = match e {
                            FetchError::Transient { reason, .. } => reason,
                            other => other.to_string(),
                        };
                        return Err(FetchError::Exhausted {
                            url: url.to_string(),
                            attempts: attempt,
                            reason,
                        }
                        .into());
                    }

                    let jitter_ms: u64 = rng().random_range(0..=self.jitter.as_millis() as u64);
                    let delay = self.backoff(attempt) + StdDuration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u128,
                        elapsed_ms_total = total_dt.as_millis() as u128,
                        ?delay,
                        error = %e,
                        "fetch attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn page_limit(&self) -> usize {
        self.inner.page_limit()
    }
}

/// The production fetcher: HTTP with the configured retry policy.
pub type Fetcher = RetryFetch<HttpFetcher>;

/// Build the production fetcher from configuration.
///
/// # Arguments
///
/// * `config` - Supplies the user agent, timeouts, page cap and retry policy
///
/// # Errors
///
/// Returns the `reqwest` error if the HTTP client cannot be constructed
/// (e.g. the TLS backend fails to initialise).
pub fn build(config: &CrawlConfig) -> Result<Fetcher, reqwest::Error> {
    let http = HttpFetcher::new(config)?;
    Ok(RetryFetch::new(http, config.max_retries, config.base_delay()).with_max_delay(config.max_delay()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `failures` times (after writing some junk), then serves `body`.
    struct Flaky {
        failures: usize,
        calls: AtomicUsize,
        body: &'static [u8],
        error: fn(&str) -> FetchError,
    }

    impl Flaky {
        fn new(failures: usize, error: fn(&str) -> FetchError) -> Self {
            Self {
                failures,
                calls: AtomicUsize::new(0),
                body: b"mix bytes",
                error,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    fn timeout(url: &str) -> FetchError {
        FetchError::Transient {
            url: url.to_string(),
            reason: "timed out".to_string(),
        }
    }

    fn gone(url: &str) -> FetchError {
        FetchError::NotFound {
            url: url.to_string(),
            status: 410,
        }
    }

    impl Fetch for Flaky {
        async fn fetch_to<S: ByteSink>(&self, url: &str, sink: &mut S) -> Result<u64, TransferError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures {
                sink.write_chunk(b"partial junk").await.map_err(TransferError::Sink)?;
                return Err((self.error)(url).into());
            }
            sink.write_chunk(self.body).await.map_err(TransferError::Sink)?;
            Ok(self.body.len() as u64)
        }
    }

    fn quick<T: Fetch>(inner: T, retries: usize) -> RetryFetch<T> {
        RetryFetch::new(inner, retries, StdDuration::from_millis(1)).with_jitter(StdDuration::ZERO)
    }

    #[tokio::test]
    async fn test_retry_recovers_and_discards_partial_body() {
        let fetcher = quick(Flaky::new(2, timeout), 3);
        let mut sink = Vec::new();

        let written = fetcher.fetch_to("http://x/a.mp3", &mut sink).await.unwrap();

        assert_eq!(written, 9);
        assert_eq!(sink, b"mix bytes");
        assert_eq!(fetcher.inner.calls(), 3);
    }

    #[tokio::test]
    async fn test_retry_exhaustion() {
        let fetcher = quick(Flaky::new(usize::MAX, timeout), 3);
        let mut sink = Vec::new();

        let err = fetcher.fetch_to("http://x/a.mp3", &mut sink).await.unwrap_err();

        match err {
            TransferError::Fetch(FetchError::Exhausted { attempts, reason, .. }) => {
                assert_eq!(attempts, 4);
                assert_eq!(reason, "timed out");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(fetcher.inner.calls(), 4);
    }

    #[tokio::test]
    async fn test_not_found_is_not_retried() {
        let fetcher = quick(Flaky::new(usize::MAX, gone), 3);

        let err = fetcher.fetch("http://x/missing/").await.unwrap_err();

        assert!(matches!(err, FetchError::NotFound { status: 410, .. }));
        assert_eq!(fetcher.inner.calls(), 1);
    }

    #[tokio::test]
    async fn test_page_over_limit_is_too_large() {
        struct Big;
        impl Fetch for Big {
            async fn fetch_to<S: ByteSink>(&self, _url: &str, sink: &mut S) -> Result<u64, TransferError> {
                sink.write_chunk(&[0u8; 64]).await.map_err(TransferError::Sink)?;
                Ok(64)
            }
            fn page_limit(&self) -> usize {
                16
            }
        }

        let err = quick(Big, 3).fetch("http://x/").await.unwrap_err();
        assert!(matches!(err, FetchError::TooLarge { max: 16, .. }));
    }

    #[test]
    fn test_classify_status() {
        let url = "http://x/";
        assert!(classify_status(url, StatusCode::OK).is_none());
        assert!(matches!(
            classify_status(url, StatusCode::NOT_FOUND),
            Some(FetchError::NotFound { status: 404, .. })
        ));
        assert!(matches!(
            classify_status(url, StatusCode::GONE),
            Some(FetchError::NotFound { status: 410, .. })
        ));
        assert!(classify_status(url, StatusCode::BAD_GATEWAY).unwrap().is_retryable());
        assert!(classify_status(url, StatusCode::TOO_MANY_REQUESTS).unwrap().is_retryable());
        assert!(matches!(
            classify_status(url, StatusCode::FORBIDDEN),
            Some(FetchError::Rejected { status: 403, .. })
        ));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let fetcher = RetryFetch::new(Flaky::new(0, timeout), 10, StdDuration::from_secs(1))
            .with_max_delay(StdDuration::from_secs(5));
        assert_eq!(fetcher.backoff(1), StdDuration::from_secs(1));
        assert_eq!(fetcher.backoff(2), StdDuration::from_secs(2));
        assert_eq!(fetcher.backoff(3), StdDuration::from_secs(4));
        assert_eq!(fetcher.backoff(4), StdDuration::from_secs(5));
        assert_eq!(fetcher.backoff(40), StdDuration::from_secs(5));
    }

    #[tokio::test]
    async fn test_capped_buffer_restart_clears_overflow() {
        let mut buf = CappedBuffer::new(4);
        assert!(buf.write_chunk(b"12345").await.is_err());
        assert!(buf.overflowed());
        buf.restart().await.unwrap();
        assert!(!buf.overflowed());
        buf.write_chunk(b"1234").await.unwrap();
        assert_eq!(buf.into_bytes(), Bytes::from_static(b"1234"));
    }
}
