use std::fmt;

/// File-type suffixes that are never worth fetching.
const IGNORED_EXTENSIONS: &[&str] = &[
    ".dmg", ".gif", ".jpg", ".jpeg", ".pdf", ".png", ".json", ".mov", ".mp3",
    ".m4a", ".tar", ".tgz", ".xls", ".xlsx", ".zip", ".rar",
];

/// Href prefixes that can never resolve to a crawlable page.
const DISCARDED_PREFIXES: &[&str] =
    &["#", "mailto:", "tel:", "file:", "javascript:", "{", "+"];

/// A normalized URL: `http`/`https` scheme, lowercase host, the literal
/// `:port` (or empty), and a path with no trailing slash.
///
/// Two `PageUrl`s are equal iff their canonical strings are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageUrl {
    scheme: String,
    host: String,
    port: String,
    path: String,
}

impl PageUrl {
    /// Parses an absolute http(s) URL, e.g. a seed argument.
    pub fn parse(raw: &str) -> Option<Self> {
        Self::parse_absolute(&raw.replace("&#x2F;", "/"))
    }

    /// Resolves a raw href against a base URL, normalizing on the way.
    /// Returns `None` for hrefs that cannot name a crawlable page: fragments,
    /// `mailto:`/`tel:`/`file:`/`javascript:` links, templating braces,
    /// relative paths without a leading slash, and non-http schemes.
    pub fn resolve(href: &str, base: &PageUrl) -> Option<Self> {
        let href = href.replace("&#x2F;", "/");
        if href.is_empty() {
            return None;
        }
        if DISCARDED_PREFIXES.iter().any(|p| href.starts_with(p)) {
            return None;
        }
        if href.starts_with("http")
            && (href.contains("://") || href.contains(":\\/\\/"))
        {
            return Self::parse_absolute(&href);
        }
        if href.starts_with('/') {
            return Some(PageUrl {
                scheme: base.scheme.clone(),
                host: base.host.clone(),
                port: base.port.clone(),
                path: href.trim_end_matches('/').to_string(),
            });
        }
        None
    }

    // Splits `scheme://host[:port][/path]`. Accepts the JSON-escaped form
    // `:\/\/` as a scheme terminator too; pages embed URLs both ways.
    fn parse_absolute(href: &str) -> Option<Self> {
        let (scheme, rest) = if let Some(at) = href.find("://") {
            (&href[..at], &href[at + 3..])
        } else if let Some(at) = href.find(":\\/\\/") {
            (&href[..at], &href[at + 5..])
        } else {
            return None;
        };
        let scheme = scheme.to_lowercase();
        if scheme != "http" && scheme != "https" {
            return None;
        }

        // The authority ends at the first `/`, or at the first `?` when the
        // URL has a query but no path.
        let cut = match rest.find('/') {
            Some(slash) => slash,
            None => rest.find('?').unwrap_or(rest.len()),
        };
        let (host_port, path) = rest.split_at(cut);
        let (host, port) = match host_port.find(':') {
            Some(colon) => (&host_port[..colon], &host_port[colon..]),
            None => (host_port, ""),
        };
        let host = host.to_lowercase();
        let host = host.trim_end_matches('\\');
        if host.is_empty() {
            return None;
        }

        Some(PageUrl {
            scheme,
            host: host.to_string(),
            port: port.to_string(),
            path: path.trim_end_matches('/').to_string(),
        })
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Host plus the literal port suffix; the key for robots caching and
    /// worker routing.
    pub fn host_key(&self) -> String {
        format!("{}{}", self.host, self.port)
    }

    /// The canonical string; the identity used by all dedup sets.
    pub fn canonical(&self) -> String {
        format!("{}://{}{}{}", self.scheme, self.host, self.port, self.path)
    }

    /// Where this URL's host keeps its robots.txt.
    pub fn robots_url(&self) -> String {
        format!("{}://{}{}/robots.txt", self.scheme, self.host, self.port)
    }

    /// Substring containment, as permissive as it sounds: `example.com`
    /// admits `blog.example.com` but also `example.com.evil.org`.
    pub fn is_in_domain(&self, domain: &str) -> bool {
        self.host.contains(domain)
    }

    /// True when the path names a binary or data file we never fetch.
    pub fn has_ignored_extension(&self) -> bool {
        let path = self.path.to_ascii_lowercase();
        let stem = match path.find('?') {
            Some(q) => &path[..q],
            None => path.as_str(),
        };
        IGNORED_EXTENSIONS.iter().any(|ext| stem.ends_with(ext))
    }
}

impl fmt::Display for PageUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}://{}{}{}",
            self.scheme, self.host, self.port, self.path
        )
    }
}

/// The last two dot-separated labels of a hostname, or the hostname itself
/// when it has fewer than two dots. Fixed for the whole run.
pub fn registrable_domain(host: &str) -> String {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() > 2 {
        labels[labels.len() - 2..].join(".")
    } else {
        host.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> PageUrl {
        PageUrl::parse("https://example.com").unwrap()
    }

    #[test]
    fn parses_absolute_url_with_port_and_path() {
        let url = PageUrl::parse("http://sub.example.com:8080/a/b").unwrap();
        assert_eq!(url.scheme(), "http");
        assert_eq!(url.host(), "sub.example.com");
        assert_eq!(url.host_key(), "sub.example.com:8080");
        assert_eq!(url.canonical(), "http://sub.example.com:8080/a/b");
    }

    #[test]
    fn strips_trailing_slashes_from_path() {
        assert_eq!(
            PageUrl::parse("https://example.com/").unwrap().canonical(),
            "https://example.com"
        );
        assert_eq!(
            PageUrl::parse("https://example.com/docs///")
                .unwrap()
                .canonical(),
            "https://example.com/docs"
        );
    }

    #[test]
    fn lowercases_scheme_and_host_but_not_path() {
        let url = PageUrl::parse("HTTPS://WWW.Example.COM/About").unwrap();
        assert_eq!(url.canonical(), "https://www.example.com/About");
    }

    #[test]
    fn recognizes_escaped_scheme_separator() {
        let url = PageUrl::parse(r"https:\/\/example.com\/about").unwrap();
        assert_eq!(url.canonical(), "https://example.com/about");
    }

    #[test]
    fn splits_on_question_mark_when_no_slash_follows_host() {
        let url = PageUrl::parse("http://example.com?page=2").unwrap();
        assert_eq!(url.host(), "example.com");
        assert_eq!(url.canonical(), "http://example.com?page=2");
    }

    #[test]
    fn discards_unusable_hrefs() {
        for href in [
            "",
            "#top",
            "mailto:x@y",
            "tel:+1555",
            "file:///etc/passwd",
            "javascript:void(0)",
            "{template}",
            "+12345",
            "about.html",
            "ftp://example.com/file",
            "HTTP://example.com/shouty",
        ] {
            assert!(PageUrl::resolve(href, &base()).is_none(), "{href:?}");
        }
    }

    #[test]
    fn replaces_entity_slashes() {
        let url = PageUrl::resolve("&#x2F;docs&#x2F;", &base()).unwrap();
        assert_eq!(url.canonical(), "https://example.com/docs");
    }

    #[test]
    fn resolves_absolute_path_against_base() {
        let base = PageUrl::parse("http://example.com:8080/deep/page").unwrap();
        let url = PageUrl::resolve("/about", &base).unwrap();
        assert_eq!(url.canonical(), "http://example.com:8080/about");
    }

    #[test]
    fn canonical_round_trips() {
        for canonical in [
            "https://example.com",
            "http://sub.example.com:8080/a/b",
            "http://example.com?page=2",
            "https://example.com/x?y=1",
        ] {
            let url = PageUrl::parse(canonical).unwrap();
            assert_eq!(url.canonical(), canonical);
            let reparsed = PageUrl::parse(&url.canonical()).unwrap();
            assert_eq!(reparsed, url);
        }
    }

    #[test]
    fn registrable_domain_takes_last_two_labels() {
        assert_eq!(registrable_domain("www.example.com"), "example.com");
        assert_eq!(registrable_domain("example.com"), "example.com");
        assert_eq!(registrable_domain("localhost"), "localhost");
        assert_eq!(registrable_domain("a.b.example.co.uk"), "co.uk");
        assert_eq!(registrable_domain("127.0.0.1"), "0.1");
    }

    #[test]
    fn in_domain_is_substring_containment() {
        let sub = PageUrl::parse("https://blog.example.com/post").unwrap();
        assert!(sub.is_in_domain("example.com"));

        // The permissive edge the substring test admits.
        let evil = PageUrl::parse("https://example.com.evil.org").unwrap();
        assert!(evil.is_in_domain("example.com"));

        let foreign = PageUrl::parse("https://unrelated.org").unwrap();
        assert!(!foreign.is_in_domain("example.com"));
    }

    #[test]
    fn filters_ignored_extensions() {
        for path in ["/pic.JPG", "/pic.jpg?w=300", "/data.json", "/a.tgz"] {
            let url = PageUrl::resolve(path, &base()).unwrap();
            assert!(url.has_ignored_extension(), "{path}");
        }
        for path in ["/page.html", "/about", "/jpg", "/x.json.html"] {
            let url = PageUrl::resolve(path, &base()).unwrap();
            assert!(!url.has_ignored_extension(), "{path}");
        }
    }
}
