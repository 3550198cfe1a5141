//! Error taxonomy for the crawl pipeline.
//!
//! Each component owns its own error enum. The [`crate::crawler`] decides
//! which of them are per-mix (logged and tallied) and which abort the run
//! (wrapped in [`CrawlError`]).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to retrieve a remote resource.
#[derive(Error, Debug)]
pub enum FetchError {
    /// The server answered 404 Not Found or 410 Gone. Never retried.
    #[error("resource not found ({status}): {url}")]
    NotFound { url: String, status: u16 },

    /// Any other 4xx answer. Retrying cannot change the outcome.
    #[error("request rejected ({status}): {url}")]
    Rejected { url: String, status: u16 },

    /// A retryable failure on a single attempt: connection error, timeout,
    /// 5xx or 429. [`crate::fetcher::RetryFetch`] converts these into
    /// [`FetchError::Exhausted`] once the retry budget is spent.
    #[error("transient failure for {url}: {reason}")]
    Transient { url: String, reason: String },

    /// Every attempt failed with a retryable error.
    #[error("gave up on {url} after {attempts} attempts: {reason}")]
    Exhausted {
        url: String,
        attempts: usize,
        reason: String,
    },

    #[error("response for {url} exceeds {max} bytes")]
    TooLarge { url: String, max: usize },

    #[error("invalid url `{0}`")]
    InvalidUrl(String),
}

impl FetchError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient { .. })
    }

    /// Short machine-friendly label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::NotFound { .. } => "not_found",
            FetchError::Rejected { .. } => "rejected",
            FetchError::Transient { .. } => "transient",
            FetchError::Exhausted { .. } => "exhausted",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::InvalidUrl(_) => "invalid_url",
        }
    }
}

/// Failure while streaming a resource into a sink.
///
/// Keeps network failures apart from local write failures, which the
/// crawler treats very differently.
#[derive(Error, Debug)]
pub enum TransferError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("failed writing downloaded bytes: {0}")]
    Sink(#[source] io::Error),
}

/// Failure to extract data from site markup.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("catalog page has no mix listing (`#grid_rel` missing)")]
    MalformedCatalog,

    #[error("mix {id} has no audio download link")]
    MissingAudioLink { id: String },

    #[error("mix {id} has no cover image")]
    MissingImageLink { id: String },

    #[error("detail page for mix {expected} produced record for {found}")]
    IdMismatch { expected: String, found: String },
}

impl ParseError {
    pub fn kind(&self) -> &'static str {
        match self {
            ParseError::MalformedCatalog => "malformed_catalog",
            ParseError::MissingAudioLink { .. } => "missing_audio_link",
            ParseError::MissingImageLink { .. } => "missing_image_link",
            ParseError::IdMismatch { .. } => "id_mismatch",
        }
    }
}

/// Unrecoverable filesystem failure inside the archive.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("archive I/O failure at {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Errors that end a whole run.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("catalog fetch failed: {0}")]
    CatalogFetch(#[from] FetchError),

    #[error("catalog could not be parsed: {0}")]
    Catalog(#[from] ParseError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Bad configuration file or values.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}
