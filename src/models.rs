//! Data models for catalog entries, mix records, and run outcomes.
//!
//! - [`MixSummary`]: one tile from the catalog page
//! - [`MixRecord`]: everything needed to archive one mix
//! - [`MixOutcome`] / [`RunSummary`]: what happened during a crawl

use std::fmt;

/// A mix as listed on the catalog page.
///
/// Lives only while the catalog is being enumerated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixSummary {
    /// Stable catalog key taken from the detail link (`/5170/slug/` -> `5170`).
    pub id: String,
    /// Absolute URL of the mix's detail page.
    pub detail_ref: String,
    /// Mix name from the tile's `data-name1` attribute.
    pub name: Option<String>,
    /// Artist from the tile's `data-name2` attribute.
    pub artist: Option<String>,
}

impl MixSummary {
    /// Human label built from catalog attributes, if the tile had any.
    pub fn display_title(&self) -> Option<String> {
        match (self.artist.as_deref(), self.name.as_deref()) {
            (Some(artist), Some(name)) => Some(format!("{artist} - {name}")),
            (None, Some(only)) | (Some(only), None) => Some(only.to_string()),
            (None, None) => None,
        }
    }
}

/// A fully parsed mix, ready to be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixRecord {
    /// Must equal the id of the [`MixSummary`] it came from.
    pub id: String,
    pub title: String,
    pub audio_url: String,
    /// `None` when the detail page had no cover image.
    pub image_url: Option<String>,
    pub tracklist: Option<String>,
}

/// Result of processing one mix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MixOutcome {
    /// Assets fetched and committed.
    Archived,
    /// A complete entry already existed; nothing was fetched.
    AlreadyPresent,
    /// The detail page had no audio link.
    Unarchivable,
    /// A fetch or parse failure; logged and skipped.
    Failed,
}

impl fmt::Display for MixOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MixOutcome::Archived => "archived",
            MixOutcome::AlreadyPresent => "already_present",
            MixOutcome::Unarchivable => "unarchivable",
            MixOutcome::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Tally of a whole crawl, reported at the end of every run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub archived: usize,
    pub skipped_present: usize,
    pub skipped_unarchivable: usize,
    pub failed: usize,
    /// Set when cancellation stopped the run before every mix was visited.
    pub cancelled: bool,
}

impl RunSummary {
    pub fn record(&mut self, outcome: MixOutcome) {
        match outcome {
            MixOutcome::Archived => self.archived += 1,
            MixOutcome::AlreadyPresent => self.skipped_present += 1,
            MixOutcome::Unarchivable => self.skipped_unarchivable += 1,
            MixOutcome::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.archived + self.skipped_present + self.skipped_unarchivable + self.failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(name: Option<&str>, artist: Option<&str>) -> MixSummary {
        MixSummary {
            id: "5170".to_string(),
            detail_ref: "http://pinchyandfriends.com/5170/axe-to-grind/".to_string(),
            name: name.map(str::to_string),
            artist: artist.map(str::to_string),
        }
    }

    #[test]
    fn test_display_title_combinations() {
        assert_eq!(
            summary(Some("Axe to Grind"), Some("Lovefingers")).display_title(),
            Some("Lovefingers - Axe to Grind".to_string())
        );
        assert_eq!(
            summary(Some("Axe to Grind"), None).display_title(),
            Some("Axe to Grind".to_string())
        );
        assert_eq!(summary(None, None).display_title(), None);
    }

    #[test]
    fn test_run_summary_tallies() {
        let mut run = RunSummary::default();
        for outcome in [
            MixOutcome::Archived,
            MixOutcome::Archived,
            MixOutcome::AlreadyPresent,
            MixOutcome::Unarchivable,
            MixOutcome::Failed,
        ] {
            run.record(outcome);
        }
        assert_eq!(run.archived, 2);
        assert_eq!(run.skipped_present, 1);
        assert_eq!(run.skipped_unarchivable, 1);
        assert_eq!(run.failed, 1);
        assert_eq!(run.total(), 5);
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(MixOutcome::AlreadyPresent.to_string(), "already_present");
    }
}
