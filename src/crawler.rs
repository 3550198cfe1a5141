//! Crawl orchestration.
//!
//! One run goes through these states:
//!
//! ```text
//! Enumerating -> for each mix: (Skipping | Fetching -> Committing) -> Done
//! ```
//!
//! 1. **Enumerating**: fetch and parse the catalog page. Failure ends the run.
//! 2. **Per mix** (up to `concurrency` at a time):
//!    - skip without network activity if the archive already has it
//!    - fetch + parse the detail page
//!    - stream audio (required) and cover image (optional) into a staged entry
//!    - commit the entry with a single rename
//! 3. **Done**: report a [`RunSummary`].
//!
//! Per-mix problems are logged and counted; only catalog failures and
//! archive I/O failures abort the run.

use crate::archive::{ArchiveStore, AssetKind, StagedEntry};
use crate::config::CrawlConfig;
use crate::error::{ConfigError, CrawlError, ParseError, StoreError, TransferError};
use crate::fetcher::Fetch;
use crate::models::{MixOutcome, MixRecord, MixSummary, RunSummary};
use crate::scrapers::{catalog, mix_page};
use futures::stream::{self, StreamExt};
use std::pin::pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use url::Url;

/// Drives one crawl over the site into the archive.
#[derive(Debug)]
pub struct Crawler<F> {
    fetcher: F,
    store: ArchiveStore,
    base_url: Url,
    concurrency: usize,
}

impl<F> Crawler<F>
where
    F: Fetch,
{
    pub fn new(fetcher: F, store: ArchiveStore, config: &CrawlConfig) -> Result<Self, ConfigError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| ConfigError::Invalid(format!("base_url `{}`: {e}", config.base_url)))?;
        Ok(Self {
            fetcher,
            store,
            base_url,
            concurrency: config.concurrency.max(1),
        })
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    /// Fetch and parse the catalog, in page order.
    #[instrument(level = "info", skip_all, fields(url = %self.base_url))]
    pub async fn enumerate(&self) -> Result<Vec<MixSummary>, CrawlError> {
        let page = self.fetcher.fetch(self.base_url.as_str()).await.map_err(|e| {
            error!(kind = e.kind(), error = %e, "Catalog fetch failed");
            e
        })?;
        let mixes: Vec<MixSummary> = catalog::parse_catalog(&page, &self.base_url)?.collect();
        info!(count = mixes.len(), "Enumerated catalog");
        Ok(mixes)
    }

    /// Run one full crawl.
    ///
    /// Cancelling `cancel` stops new mixes from starting; mixes already in
    /// flight run to completion.
    ///
    /// # Returns
    ///
    /// Per-outcome counts, with `cancelled` set when the token stopped the
    /// run before every mix was visited.
    ///
    /// # Errors
    ///
    /// - [`CrawlError::CatalogFetch`] / [`CrawlError::Catalog`]: the catalog
    ///   could not be fetched or parsed
    /// - [`CrawlError::Store`]: an archive write failed; the run stops
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self, cancel: &CancellationToken) -> Result<RunSummary, CrawlError> {
        let mixes = self.enumerate().await?;
        let total = mixes.len();
        let mut summary = RunSummary::default();

        info!(total, concurrency = self.concurrency, "Processing mixes");
        let mut results = pin!(
            stream::iter(mixes.into_iter().enumerate())
                .take_until(cancel.cancelled())
                .map(|(index, mix)| self.process(index, total, mix))
                .buffer_unordered(self.concurrency)
        );

        while let Some(result) = results.next().await {
            match result {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    error!(error = %e, "Archive failure; aborting run");
                    return Err(e.into());
                }
            }
        }

        summary.cancelled = cancel.is_cancelled() && summary.total() < total;
        if summary.cancelled {
            warn!(
                visited = summary.total(),
                total, "Run cancelled before every mix was visited"
            );
        }
        info!(
            archived = summary.archived,
            skipped_present = summary.skipped_present,
            skipped_unarchivable = summary.skipped_unarchivable,
            failed = summary.failed,
            "Crawl finished"
        );
        Ok(summary)
    }

    /// Handle one mix. Only archive I/O failures escape as errors.
    #[instrument(level = "info", skip_all, fields(mix_id = %mix.id, index = index))]
    async fn process(
        &self,
        index: usize,
        total: usize,
        mix: MixSummary,
    ) -> Result<MixOutcome, StoreError> {
        if self.store.has_complete(&mix.id).await {
            debug!("Already archived; skipping");
            return Ok(MixOutcome::AlreadyPresent);
        }

        let page = match self.fetcher.fetch(&mix.detail_ref).await {
            Ok(page) => page,
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Detail page fetch failed");
                return Ok(MixOutcome::Failed);
            }
        };

        let mut record = match mix_page::parse_mix(&mix.id, &page, &self.base_url) {
            Ok(record) => record,
            Err(e @ ParseError::MissingAudioLink { .. }) => {
                warn!(kind = e.kind(), "No audio link; mix is unarchivable");
                return Ok(MixOutcome::Unarchivable);
            }
            Err(e) => {
                warn!(kind = e.kind(), error = %e, "Detail page could not be parsed");
                return Ok(MixOutcome::Failed);
            }
        };
        if record.id != mix.id {
            warn!(record_id = %record.id, "Record id does not match catalog id");
            return Ok(MixOutcome::Failed);
        }
        if record.title == record.id
            && let Some(title) = mix.display_title()
        {
            record.title = title;
        }

        let outcome = self.archive(&record).await?;
        info!(index, total, %outcome, title = %record.title, "Mix done");
        Ok(outcome)
    }

    /// Download the assets of `record` into a staged entry and commit it.
    async fn archive(&self, record: &MixRecord) -> Result<MixOutcome, StoreError> {
        let staged = self.store.stage(record).await?;

        let mut audio = staged.create(AssetKind::Audio).await?;
        match self.fetcher.fetch_to(&record.audio_url, &mut audio).await {
            Ok(0) => {
                warn!(url = %record.audio_url, "Audio download was empty");
                return Ok(MixOutcome::Failed);
            }
            Ok(bytes) => debug!(bytes, "Downloaded audio"),
            Err(TransferError::Sink(e)) => return Err(StoreError::io(audio.path(), e)),
            Err(TransferError::Fetch(e)) => {
                warn!(kind = e.kind(), error = %e, "Audio download failed");
                return Ok(MixOutcome::Failed);
            }
        }
        audio.finish().await?;

        if let Some(url) = &record.image_url {
            self.fetch_cover(&staged, url).await?;
        }
        if let Some(text) = &record.tracklist {
            staged.write_tracklist(text).await?;
        }

        self.store.commit_staged(staged).await?;
        Ok(MixOutcome::Archived)
    }

    /// Best-effort cover download; a failed image is left out of the entry.
    async fn fetch_cover(&self, staged: &StagedEntry, url: &str) -> Result<(), StoreError> {
        let mut image = staged.create(AssetKind::Image).await?;
        match self.fetcher.fetch_to(url, &mut image).await {
            Ok(bytes) if bytes > 0 => {
                image.finish().await?;
                debug!(bytes, "Downloaded cover image");
                return Ok(());
            }
            Ok(_) => warn!(%url, "Cover image was empty; archiving without it"),
            Err(TransferError::Sink(e)) => return Err(StoreError::io(image.path(), e)),
            Err(TransferError::Fetch(e)) => {
                warn!(kind = e.kind(), error = %e, "Cover image download failed; archiving without it")
            }
        }
        drop(image);
        staged.discard(AssetKind::Image).await
    }
}
