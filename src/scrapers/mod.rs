//! Parsers for the site's markup.
//!
//! Everything that depends on the HTML structure of the source site lives
//! here, so a site redesign only touches these two modules.
//!
//! | Page | Module | Produces |
//! |------|--------|----------|
//! | Home page grid | [`catalog`] | [`crate::models::MixSummary`] per tile |
//! | Mix detail page | [`mix_page`] | [`crate::models::MixRecord`] |
//!
//! Both parsers take raw bytes plus the site's base URL (for resolving
//! relative links) and never touch the network.

pub mod catalog;
pub mod mix_page;
