//! # Pinchy Archive
//!
//! Mirrors every mix published on pinchyandfriends.com into a local
//! archive: one directory per mix holding the audio, the cover art and the
//! tracklist when the site has one.
//!
//! ## Usage
//!
//! ```sh
//! pinchy_archive -a ~/media/audio/pinchy
//! pinchy_archive -a ~/media/audio/pinchy --list
//! ```
//!
//! See the library documentation for the pipeline itself.

use clap::Parser;
use futures::stream::{self, Stream, StreamExt};
use std::collections::HashSet;
use std::error::Error;
use std::pin::pin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

use pinchy_archive::archive::ArchiveStore;
use pinchy_archive::cli::Cli;
use pinchy_archive::crawler::Crawler;
use pinchy_archive::fetcher::{self, Fetch};
use pinchy_archive::utils::format_mix_table;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("pinchy_archive starting up");

    // Parse CLI
    let args = Cli::parse();
    let config = args.resolve_config()?;
    debug!(?config, "Resolved configuration");

    let store = ArchiveStore::open(&config.archive_root).await.map_err(|e| {
        error!(
            path = %config.archive_root.display(),
            error = %e,
            "Archive directory is not usable (fix perms or choose a different path)"
        );
        e
    })?;
    let fetcher = fetcher::build(&config)?;
    let crawler = Crawler::new(fetcher, store, &config)?;

    if args.list {
        print_catalog(&crawler).await?;
        return Ok(());
    }

    // ---- Cancellation on Ctrl-C ----
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        let interrupts = pin!(stream::unfold((), |()| async {
            tokio::signal::ctrl_c().await.ok().map(|()| ((), ()))
        }));
        if watch_interrupts(interrupts, &on_signal).await {
            std::process::exit(130);
        }
    });

    let summary = crawler.run(&cancel).await?;

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        archived = summary.archived,
        skipped_present = summary.skipped_present,
        skipped_unarchivable = summary.skipped_unarchivable,
        failed = summary.failed,
        cancelled = summary.cancelled,
        "Execution complete"
    );

    Ok(())
}

/// Print the remote catalog with the local archive status of each mix.
async fn print_catalog<F: Fetch>(crawler: &Crawler<F>) -> Result<(), Box<dyn Error>> {
    let mixes = crawler.enumerate().await?;
    let archived: HashSet<String> = crawler.store().list_ids().await?.into_iter().collect();
    let missing = mixes.iter().filter(|m| !archived.contains(&m.id)).count();

    println!("{}", format_mix_table(&mixes, &archived));
    info!(
        remote = mixes.len(),
        archived = archived.len(),
        missing,
        root = %crawler.store().root().display(),
        "Listed catalog"
    );
    Ok(())
}

/// Cancel `cancel` on the first interrupt.
///
/// # Returns
///
/// `true` once a second interrupt arrives and the process should exit
/// without waiting for in-flight mixes; `false` if the signal source ends
/// first.
async fn watch_interrupts<S>(mut interrupts: S, cancel: &CancellationToken) -> bool
where
    S: Stream<Item = ()> + Unpin,
{
    if interrupts.next().await.is_none() {
        return false;
    }
    warn!("Interrupt received; letting in-flight mixes finish (interrupt again to quit now)");
    cancel.cancel();

    if interrupts.next().await.is_none() {
        return false;
    }
    error!("Second interrupt; exiting without waiting for in-flight mixes");
    true
}
