use std::collections::HashSet;

use lazy_static::lazy_static;
use regex::Regex;

use crate::url::PageUrl;

/// Longest tag the scanner will consider. Anything still open after this many
/// bytes is treated as markup noise and skipped.
const TAG_WINDOW: usize = 666;

lazy_static! {
    // A well-formed XML tag: quoted runs or single non-delimiter characters,
    // up to the first unquoted `>`. Anchored so it only ever matches a prefix.
    static ref TAG_REGEX: Regex =
        Regex::new(r#"^<("[^"]*"|'[^']*'|[^'">])*>"#).unwrap();
}

/// Scans a page body for `<a href=…>` tags and yields the normalized URLs,
/// deduplicated per page, in discovery order. Foreign-domain filtering and
/// the global dedup sets are the caller's concern.
pub fn extract_links(body: &str, base: &PageUrl) -> Vec<PageUrl> {
    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for (at, _) in body.match_indices('<') {
        let window = &body[at..window_end(body, at)];
        let end = match TAG_REGEX.shortest_match(window) {
            Some(end) => end,
            None => continue,
        };
        let href = match href_in_tag(&window[..end]) {
            Some(href) => href,
            None => continue,
        };
        let url = match PageUrl::resolve(href, base) {
            Some(url) => url,
            None => continue,
        };
        if seen.insert(url.canonical()) {
            links.push(url);
        }
    }
    links
}

fn window_end(body: &str, start: usize) -> usize {
    let mut end = (start + TAG_WINDOW).min(body.len());
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    end
}

/// Pulls the href value out of a matched tag: the tag must open an anchor,
/// carry an ` href` attribute, and quote the value with `"`, `'`, or the
/// escaped `\"` form.
fn href_in_tag(tag: &str) -> Option<&str> {
    let bytes = tag.as_bytes();

    let mut i = 1;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if i >= bytes.len() || !(bytes[i] == b'a' || bytes[i] == b'A') {
        return None;
    }

    let lower = tag.to_ascii_lowercase();
    let mut i = lower[i..].find(" href")? + i + " href".len();
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }
    if i >= bytes.len() || bytes[i] != b'=' {
        return None;
    }
    i += 1;
    while i < bytes.len() && bytes[i] == b' ' {
        i += 1;
    }

    let (open_len, close) = match bytes.get(i) {
        Some(b'"') => (1, "\""),
        Some(b'\'') => (1, "'"),
        Some(b'\\') if bytes.get(i + 1) == Some(&b'"') => (2, "\\\""),
        _ => return None,
    };
    let start = i + open_len;
    let end = tag[start..].find(close)? + start;
    Some(&tag[start..end])
}
