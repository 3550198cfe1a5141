//! Catalog page parser.
//!
//! The site's home page lists every mix as a tile inside `#grid_rel`:
//!
//! ```html
//! <div id="grid_rel">
//!   <div class="grid_img hand" data-name1="Axe to Grind" data-name2="Lovefingers"
//!        onclick="window.location = '/5170/axe-to-grind/';">
//!     <img src="/thumbs/440x440/files/zc/lovefingers_97960.jpg">
//!   </div>
//! </div>
//! ```
//!
//! The first path segment of the `onclick` target is the mix id.

use crate::error::ParseError;
use crate::models::MixSummary;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{info, instrument, warn};
use url::Url;

static GRID: Lazy<Selector> = Lazy::new(|| Selector::parse("#grid_rel").expect("static selector"));
static TILE: Lazy<Selector> =
    Lazy::new(|| Selector::parse("#grid_rel > div").expect("static selector"));
static TILE_LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").expect("static selector"));
static ONCLICK_TARGET: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"location(?:\.href)?\s*=\s*['"]([^'"]+)['"]"#).expect("static regex")
});

/// Mix summaries in page order, de-duplicated by id.
///
/// Consuming and non-restartable: parse the page again to start over.
#[derive(Debug)]
pub struct Catalog {
    entries: std::vec::IntoIter<MixSummary>,
}

impl Iterator for Catalog {
    type Item = MixSummary;

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

impl ExactSizeIterator for Catalog {}

/// Parse the catalog page into mix summaries.
///
/// # Errors
///
/// [`ParseError::MalformedCatalog`] when the page has no `#grid_rel`
/// container. An empty container is an empty catalog, not an error.
#[instrument(level = "info", skip_all, fields(bytes = page.len()))]
pub fn parse_catalog(page: &[u8], base: &Url) -> Result<Catalog, ParseError> {
    let html = String::from_utf8_lossy(page);
    let document = Html::parse_document(&html);

    if document.select(&GRID).next().is_none() {
        warn!("Catalog page has no #grid_rel container");
        return Err(ParseError::MalformedCatalog);
    }

    let mut tiles = 0usize;
    let entries: Vec<MixSummary> = document
        .select(&TILE)
        .inspect(|_| tiles += 1)
        .filter_map(|tile| summary_from_tile(tile, base))
        .unique_by(|mix| mix.id.clone())
        .collect();

    info!(tiles, mixes = entries.len(), "Parsed catalog");
    Ok(Catalog {
        entries: entries.into_iter(),
    })
}

fn summary_from_tile(tile: ElementRef<'_>, base: &Url) -> Option<MixSummary> {
    let element = tile.value();
    let target = element
        .attr("onclick")
        .and_then(|onclick| ONCLICK_TARGET.captures(onclick))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .or_else(|| {
            tile.select(&TILE_LINK)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(str::to_string)
        });

    let Some(target) = target else {
        warn!(html = %crate::utils::truncate_for_log(&tile.html(), 200), "Tile without a detail link");
        return None;
    };

    let detail = match base.join(target.trim()) {
        Ok(url) => url,
        Err(e) => {
            warn!(%target, error = %e, "Unresolvable detail link");
            return None;
        }
    };
    let Some(id) = id_from_link(&detail, base) else {
        warn!(%detail, "Detail link has no mix id");
        return None;
    };

    let attr = |name: &str| {
        element
            .attr(name)
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    };

    Some(MixSummary {
        id,
        detail_ref: detail.to_string(),
        name: attr("data-name1"),
        artist: attr("data-name2"),
    })
}

/// Mix id of a resolved detail link: its first path segment below the
/// directory of `base` (or below the site root when the link leaves it).
/// Segments starting with `.` are never ids.
pub(crate) fn id_from_link(detail: &Url, base: &Url) -> Option<String> {
    let base_dir = base.path().rfind('/').map_or("/", |i| &base.path()[..=i]);
    let path = detail.path();
    let relative = match path.strip_prefix(base_dir) {
        Some(rest) if detail.host_str() == base.host_str() => rest,
        _ => path,
    };
    relative
        .split('/')
        .find(|segment| !segment.is_empty())
        .filter(|segment| !segment.starts_with('.'))
        .map(str::to_string)
}
