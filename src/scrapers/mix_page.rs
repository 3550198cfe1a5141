//! Mix detail page parser.
//!
//! A detail page carries the download link in `#download`, the cover art
//! and the tracklist inside `#grid`:
//!
//! ```html
//! <div id="download"><a href="http://pinchyandfriends.com/files/mixes/axe.mp3">download</a></div>
//! <div id="grid">
//!   <h1>Lovefingers - Axe to Grind</h1>
//!   <img src="/files/zc/lovefingers_97960.jpg">
//!   <p>1. First Track<br>2. Second Track</p>
//! </div>
//! ```

use super::catalog::id_from_link;
use crate::error::ParseError;
use crate::models::MixRecord;
use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use tracing::{debug, instrument};
use url::Url;

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector")
}

static DOWNLOAD_LINK: Lazy<Selector> = Lazy::new(|| selector("#download a[href]"));
static COVER_IMAGE: Lazy<Selector> = Lazy::new(|| selector("#grid img[src]"));
static TRACKLIST: Lazy<Selector> = Lazy::new(|| selector("#grid p"));
static HEADING: Lazy<Selector> = Lazy::new(|| selector("#grid h1"));
static OG_TITLE: Lazy<Selector> = Lazy::new(|| selector(r#"meta[property="og:title"]"#));
static PAGE_TITLE: Lazy<Selector> = Lazy::new(|| selector("title"));
static CANONICAL: Lazy<Selector> = Lazy::new(|| selector(r#"link[rel="canonical"][href]"#));

/// Parse one mix's detail page.
///
/// # Errors
///
/// - [`ParseError::MissingAudioLink`]: no usable `#download a[href]`
/// - [`ParseError::IdMismatch`]: the page's canonical link names another mix
///
/// A missing cover image or tracklist is not an error; the record carries
/// `None` instead.
#[instrument(level = "debug", skip(page, base), fields(bytes = page.len()))]
pub fn parse_mix(id: &str, page: &[u8], base: &Url) -> Result<MixRecord, ParseError> {
    let html = String::from_utf8_lossy(page);
    let document = Html::parse_document(&html);

    check_canonical(&document, id, base)?;

    let audio_url = document
        .select(&DOWNLOAD_LINK)
        .filter_map(|a| a.value().attr("href"))
        .find_map(|href| resolve(base, href))
        .ok_or_else(|| ParseError::MissingAudioLink { id: id.to_string() })?;

    let image_url = match cover_image(&document, id, base) {
        Ok(url) => Some(url),
        Err(e) => {
            debug!(kind = e.kind(), "Archiving without cover image");
            None
        }
    };

    let record = MixRecord {
        id: id.to_string(),
        title: title(&document).unwrap_or_else(|| id.to_string()),
        audio_url,
        image_url,
        tracklist: tracklist(&document),
    };
    debug!(?record, "Parsed mix page");
    Ok(record)
}

fn cover_image(document: &Html, id: &str, base: &Url) -> Result<String, ParseError> {
    document
        .select(&COVER_IMAGE)
        .filter_map(|img| img.value().attr("src"))
        .find_map(|src| resolve(base, src))
        .ok_or_else(|| ParseError::MissingImageLink { id: id.to_string() })
}

/// Tracklist text, one line per text node, blank lines dropped.
fn tracklist(document: &Html) -> Option<String> {
    let block = document.select(&TRACKLIST).next()?;
    let lines: Vec<&str> = block
        .text()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        None
    } else {
        Some(lines.join("\n"))
    }
}

fn title(document: &Html) -> Option<String> {
    let text_of = |sel: &Selector| {
        document
            .select(sel)
            .next()
            .map(|el| el.text().collect::<Vec<_>>().join(" "))
    };
    let og = || {
        document
            .select(&OG_TITLE)
            .next()
            .and_then(|meta| meta.value().attr("content"))
            .map(str::to_string)
    };

    [text_of(&HEADING), og(), text_of(&PAGE_TITLE)]
        .into_iter()
        .flatten()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .find(|t| !t.is_empty())
}

/// Reject pages whose canonical URL points at a different mix.
fn check_canonical(document: &Html, id: &str, base: &Url) -> Result<(), ParseError> {
    let found = document
        .select(&CANONICAL)
        .filter_map(|link| link.value().attr("href"))
        .filter_map(|href| base.join(href).ok())
        .find_map(|url| id_from_link(&url, base));

    match found {
        Some(found) if found != id => Err(ParseError::IdMismatch {
            expected: id.to_string(),
            found,
        }),
        _ => Ok(()),
    }
}

fn resolve(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|url| url.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Url {
        Url::parse("http://pinchyandfriends.com").unwrap()
    }

    const FULL_PAGE: &str = r#"<html><head><title>Pinchy &amp; Friends</title></head><body>
        <div id="download"><a href="http://pinchyandfriends.com/files/mixes/axe.mp3">download</a></div>
        <div id="grid">
          <h1>Lovefingers -
              Axe to Grind</h1>
          <img src="/files/zc/lovefingers_97960.jpg">
          <p>1. First Track<br>
             2. Second Track</p>
        </div></body></html>"#;

    #[test]
    fn test_full_page() {
        let record = parse_mix("5170", FULL_PAGE.as_bytes(), &base()).unwrap();

        assert_eq!(record.id, "5170");
        assert_eq!(record.title, "Lovefingers - Axe to Grind");
        assert_eq!(
            record.audio_url,
            "http://pinchyandfriends.com/files/mixes/axe.mp3"
        );
        assert_eq!(
            record.image_url.as_deref(),
            Some("http://pinchyandfriends.com/files/zc/lovefingers_97960.jpg")
        );
        assert_eq!(
            record.tracklist.as_deref(),
            Some("1. First Track\n2. Second Track")
        );
    }

    #[test]
    fn test_missing_audio_link() {
        let html = r#"<div id="grid"><img src="/a.jpg"></div>"#;
        let err = parse_mix("9", html.as_bytes(), &base()).unwrap_err();
        assert_eq!(err, ParseError::MissingAudioLink { id: "9".into() });
    }

    #[test]
    fn test_missing_image_degrades_to_none() {
        let html = r#"<div id="download"><a href="/m.mp3">dl</a></div><div id="grid"><p>  </p></div>"#;
        let record = parse_mix("9", html.as_bytes(), &base()).unwrap();

        assert_eq!(record.audio_url, "http://pinchyandfriends.com/m.mp3");
        assert_eq!(record.image_url, None);
        assert_eq!(record.tracklist, None);
    }

    #[test]
    fn test_title_fallbacks() {
        let og = r#"<head><meta property="og:title" content="OG Title"><title>Page</title></head>
            <div id="download"><a href="/m.mp3">dl</a></div>"#;
        assert_eq!(parse_mix("1", og.as_bytes(), &base()).unwrap().title, "OG Title");

        let bare = r#"<div id="download"><a href="/m.mp3">dl</a></div>"#;
        assert_eq!(parse_mix("1", bare.as_bytes(), &base()).unwrap().title, "1");
    }

    #[test]
    fn test_canonical_for_other_mix_is_rejected() {
        let html = r#"<head><link rel="canonical" href="/4000/other/"></head>
            <div id="download"><a href="/m.mp3">dl</a></div>"#;
        let err = parse_mix("5170", html.as_bytes(), &base()).unwrap_err();
        assert_eq!(
            err,
            ParseError::IdMismatch {
                expected: "5170".into(),
                found: "4000".into()
            }
        );

        let same = html.replace("/4000/other/", "/5170/axe-to-grind/");
        assert!(parse_mix("5170", same.as_bytes(), &base()).is_ok());
    }

    #[test]
    fn test_javascript_download_link_is_ignored() {
        let html = r##"<div id="download"><a href="#">soon</a></div>"##;
        assert!(matches!(
            parse_mix("3", html.as_bytes(), &base()),
            Err(ParseError::MissingAudioLink { .. })
        ));
    }
}
