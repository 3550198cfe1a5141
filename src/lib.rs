//! # Pinchy Archive
//!
//! Mirrors every mix published on pinchyandfriends.com into a local
//! archive: one directory per mix holding the audio, the cover art and the
//! tracklist when the site has one.
//!
//! ## Architecture
//!
//! The crate follows a pipeline architecture:
//! 1. **Enumerating**: Parse the catalog page into mix summaries ([`scrapers::catalog`])
//! 2. **Fetching**: Parse each mix's detail page ([`scrapers::mix_page`]) and
//!    stream its assets ([`fetcher`]), a few mixes at a time
//! 3. **Committing**: Move each fully written entry into the archive with
//!    one rename ([`archive`])
//!
//! [`crawler::Crawler`] drives the pipeline. Re-running is cheap: mixes
//! already archived are skipped without any network traffic.

pub mod archive;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod fetcher;
pub mod models;
pub mod scrapers;
pub mod utils;
