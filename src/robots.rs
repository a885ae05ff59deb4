use std::sync::Arc;

use indexmap::IndexMap;
use reqwest::header::{ACCEPT, LOCATION};
use reqwest::{Client, Response, StatusCode};
use robotstxt::DefaultMatcher;
use tokio::sync::RwLock;

use crate::error::CrawlError;
use crate::report::Sink;
use crate::url::PageUrl;

/// What we know about one host's robots.txt. A host is `Missing` after a
/// non-200 answer or an I/O failure and is then fully permissive.
#[derive(Debug)]
pub(crate) enum RobotsState {
    Missing,
    Present { body: String, delay: u64 },
}

/// Lazily fetches and caches robots.txt per host and answers allow/delay
/// queries. Each host is fetched at most once per run.
pub(crate) struct RobotsManager {
    client: Client,
    user_agent: String,
    default_delay: u64,
    sink: Arc<dyn Sink>,
    cache: RwLock<IndexMap<String, RobotsState>>,
}

impl RobotsManager {
    pub fn new(
        client: Client,
        user_agent: String,
        default_delay: u64,
        sink: Arc<dyn Sink>,
    ) -> Self {
        Self {
            client,
            user_agent,
            default_delay,
            sink,
            cache: RwLock::new(IndexMap::new()),
        }
    }

    /// Whether this host's robots.txt has been acquired already.
    pub async fn is_fetched(&self, host_key: &str) -> bool {
        self.cache.read().await.contains_key(host_key)
    }

    /// Number of hosts for which a robots.txt acquisition completed,
    /// successfully or not.
    pub async fn fetched_count(&self) -> usize {
        self.cache.read().await.len()
    }

    /// Acquires robots.txt for the URL's host unless already cached. Holding
    /// the write lock across the fetch serializes acquisitions, so a host
    /// transitions out of `absent` exactly once.
    pub async fn ensure(&self, url: &PageUrl) -> Result<(), CrawlError> {
        let key = url.host_key();
        let mut cache = self.cache.write().await;
        if cache.contains_key(&key) {
            tracing::debug!("robots.txt cache hit for {key}");
            return Ok(());
        }
        let state = self.acquire(url).await?;
        cache.insert(key, state);
        Ok(())
    }

    /// True when the URL may be fetched for our user agent. Denials are
    /// reported on the sink. Hosts with no usable robots.txt permit
    /// everything.
    pub async fn allowed(&self, url: &PageUrl) -> bool {
        let cache = self.cache.read().await;
        match cache.get(&url.host_key()) {
            None | Some(RobotsState::Missing) => true,
            Some(RobotsState::Present { body, .. }) => {
                let canonical = url.canonical();
                let allowed = DefaultMatcher::default().one_agent_allowed_by_robots(
                    body,
                    &self.user_agent,
                    &canonical,
                );
                if !allowed {
                    self.sink
                        .println(&format!("/robots.txt DISALLOW [{canonical}]"));
                }
                allowed
            }
        }
    }

    /// Crawl delay in seconds for the URL's host.
    pub async fn delay_for(&self, url: &PageUrl) -> u64 {
        match self.cache.read().await.get(&url.host_key()) {
            Some(RobotsState::Present { delay, .. }) => *delay,
            _ => self.default_delay,
        }
    }

    async fn acquire(&self, url: &PageUrl) -> Result<RobotsState, CrawlError> {
        let robots_url = url.robots_url();
        let mut response = self.get(&robots_url).await;

        // A single redirect hop, possibly crossing schemes; the result is
        // authoritative for the original host.
        let redirected = match &response {
            Ok(first)
                if matches!(
                    first.status(),
                    StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
                ) =>
            {
                Some(
                    first
                        .headers()
                        .get(LOCATION)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|raw| PageUrl::resolve(raw, url)),
                )
            }
            _ => None,
        };
        match redirected {
            Some(Some(target)) => {
                tracing::debug!("robots.txt for {robots_url} redirected to {target}");
                response = self.get(&target.canonical()).await;
            }
            Some(None) => {
                self.sink.println(&format!("NO {robots_url}"));
                return Ok(RobotsState::Missing);
            }
            None => {}
        }

        match response {
            Ok(response) if response.status() == StatusCode::SWITCHING_PROTOCOLS => {
                Err(CrawlError::SwitchingProtocols { url: robots_url })
            }
            Ok(response) if response.status() == StatusCode::OK => {
                match response.text().await {
                    Ok(body) => {
                        let delay = scan_crawl_delay(&body, self.default_delay);
                        self.sink.println(&format!(
                            "OK {robots_url} crawl-delay={delay}"
                        ));
                        Ok(RobotsState::Present { body, delay })
                    }
                    Err(error) => {
                        tracing::warn!("failed reading {robots_url}: {error}");
                        self.sink.println(&format!("NO {robots_url}"));
                        Ok(RobotsState::Missing)
                    }
                }
            }
            _ => {
                self.sink.println(&format!("NO {robots_url}"));
                Ok(RobotsState::Missing)
            }
        }
    }

    async fn get(&self, url: &str) -> reqwest::Result<Response> {
        self.client
            .get(url)
            .header(ACCEPT, "text/html,text")
            .send()
            .await
    }
}

/// Extracts the first `crawl-delay:` directive by case-insensitive literal
/// scan: optional spaces, then a decimal integer terminated by whitespace or
/// end of input. Anything else falls back to the default.
fn scan_crawl_delay(body: &str, default: u64) -> u64 {
    let lower = body.to_ascii_lowercase();
    let at = match lower.find("crawl-delay:") {
        Some(at) => at + "crawl-delay:".len(),
        None => return default,
    };
    let rest = body[at..].trim_start_matches(' ');
    let digits_end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    let digits = &rest[..digits_end];
    if digits.is_empty() {
        return default;
    }
    match rest[digits_end..].chars().next() {
        Some(c) if !c.is_whitespace() => return default,
        _ => {}
    }
    digits.parse().unwrap_or(default)
}
