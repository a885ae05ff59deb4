use std::sync::Arc;

use mime::Mime;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::{Client, Response, StatusCode};

use crate::error::CrawlError;
use crate::extract;
use crate::report::Sink;
use crate::url::PageUrl;

/// What one dispatch of the loader produced.
#[derive(Debug)]
pub(crate) enum LoadOutcome {
    /// A 200 text body was read; these are its in-domain links, possibly
    /// none.
    Fetched(Vec<PageUrl>),
    /// The URL was dropped before or after the request; any reporting has
    /// already happened.
    Skipped,
}

/// Fetches one URL, follows at most one explicit redirect hop, and extracts
/// links from text bodies. Robots gating and visited bookkeeping live in the
/// worker; the loader only talks HTTP.
pub(crate) struct PageLoader {
    client: Client,
    domain: String,
    sink: Arc<dyn Sink>,
}

impl PageLoader {
    pub fn new(client: Client, domain: String, sink: Arc<dyn Sink>) -> Self {
        Self {
            client,
            domain,
            sink,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn load(&self, url: &PageUrl) -> Result<LoadOutcome, CrawlError> {
        if url.has_ignored_extension() {
            return Ok(LoadOutcome::Skipped);
        }

        let response = match self.get(&url.canonical()).await {
            Ok(response) => response,
            Err(error) => {
                self.sink.println(&format!("  ERROR {error} [{url}]"));
                return Ok(LoadOutcome::Skipped);
            }
        };

        match response.status() {
            StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND => {
                self.follow_redirect(url, response).await
            }
            StatusCode::SWITCHING_PROTOCOLS => {
                self.sink.println(&format!(
                    "  ERROR 101 Switching Protocols not supported. [{url}]"
                ));
                Err(CrawlError::SwitchingProtocols {
                    url: url.canonical(),
                })
            }
            StatusCode::OK => {
                if !is_text(&response) {
                    return Ok(LoadOutcome::Skipped);
                }
                Ok(self.parse_body(response, url).await)
            }
            status => {
                self.sink
                    .println(&format!("  ERROR {} [{url}]", status.as_u16()));
                Ok(LoadOutcome::Skipped)
            }
        }
    }

    /// One application-level redirect hop. Foreign targets are dropped
    /// silently; a hop that does not land on a 200 text page is a redirect
    /// failure.
    async fn follow_redirect(
        &self,
        url: &PageUrl,
        response: Response,
    ) -> Result<LoadOutcome, CrawlError> {
        let target = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|raw| PageUrl::resolve(raw, url));
        let target = match target {
            Some(target) => target,
            None => {
                self.sink.println(&format!("  REDIRECT FAILED TO {url}"));
                return Ok(LoadOutcome::Skipped);
            }
        };
        if !target.is_in_domain(&self.domain) {
            tracing::debug!("dropping foreign redirect {url} -> {target}");
            return Ok(LoadOutcome::Skipped);
        }

        match self.get(&target.canonical()).await {
            Ok(retry)
                if retry.status() == StatusCode::OK && is_text(&retry) =>
            {
                Ok(self.parse_body(retry, &target).await)
            }
            _ => {
                self.sink.println(&format!("  REDIRECT FAILED TO {target}"));
                Ok(LoadOutcome::Skipped)
            }
        }
    }

    /// Reads a 200 text response and extracts in-domain links, unless the
    /// body declares a non-HTML DOCTYPE.
    async fn parse_body(&self, response: Response, base: &PageUrl) -> LoadOutcome {
        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(error) => {
                self.sink.println(&format!("  ERROR {error} [{base}]"));
                return LoadOutcome::Skipped;
            }
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(error) => {
                self.sink.println(&format!("  ERROR {error} [{base}]"));
                return LoadOutcome::Skipped;
            }
        };
        if has_foreign_doctype(&body) {
            return LoadOutcome::Fetched(Vec::new());
        }

        let links = extract::extract_links(&body, base)
            .into_iter()
            .filter(|link| link.is_in_domain(&self.domain))
            .collect::<Vec<_>>();
        tracing::debug!("extracted {} in-domain links from {base}", links.len());
        LoadOutcome::Fetched(links)
    }

    async fn get(&self, url: &str) -> reqwest::Result<Response> {
        self.client
            .get(url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "text/html,text")
            .send()
            .await
    }
}

fn is_text(response: &Response) -> bool {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|raw| raw.parse::<Mime>().ok())
        .map(|mime| mime.type_() == mime::TEXT)
        .unwrap_or(false)
}

/// True when the body opens with a DOCTYPE whose root element is not `html`.
fn has_foreign_doctype(body: &str) -> bool {
    let prefix = "<!DOCTYPE ";
    if body.len() < prefix.len() || !body.is_char_boundary(prefix.len()) {
        return false;
    }
    if !body[..prefix.len()].eq_ignore_ascii_case(prefix) {
        return false;
    }
    let root: String = body[prefix.len()..]
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '>')
        .collect();
    !root.eq_ignore_ascii_case("html")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::MemorySink;
    use crate::url::registrable_domain;
    use httpmock::{Method::GET, MockServer};

    fn loader(sink: Arc<MemorySink>) -> PageLoader {
        let client = Client::builder()
            .user_agent("rickbot")
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap();
        PageLoader::new(client, registrable_domain("127.0.0.1"), sink)
    }

    fn page(server: &MockServer, path: &str) -> PageUrl {
        PageUrl::parse(&server.url(path)).unwrap()
    }

    fn links(outcome: LoadOutcome) -> Vec<String> {
        match outcome {
            LoadOutcome::Fetched(links) => {
                links.into_iter().map(|u| u.canonical()).collect()
            }
            LoadOutcome::Skipped => panic!("expected a fetched outcome"),
        }
    }

    #[test]
    fn detects_foreign_doctypes() {
        assert!(has_foreign_doctype("<!DOCTYPE svg PUBLIC>"));
        assert!(!has_foreign_doctype("<!DOCTYPE html><html></html>"));
        assert!(!has_foreign_doctype("<!doctype HTML>"));
        assert!(!has_foreign_doctype("<html>no doctype</html>"));
        assert!(!has_foreign_doctype(""));
    }

    #[tokio::test]
    async fn fetches_a_page_and_returns_its_links() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/");
                then.status(200)
                    .header("content-type", "text/html; charset=utf-8")
                    .body(r#"<a href="/about">a</a><a href="https://gone.invalid/">f</a>"#);
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let outcome = loader(sink).load(&page(&server, "/")).await.unwrap();
        // The foreign link never leaves the loader.
        assert_eq!(links(outcome), vec![page(&server, "/about").canonical()]);
    }

    #[tokio::test]
    async fn skips_non_text_responses_silently() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/bin");
                then.status(200)
                    .header("content-type", "application/octet-stream")
                    .body("not html");
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let outcome = loader(sink.clone()).load(&page(&server, "/bin")).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Skipped));
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn reports_http_failures() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/gone");
                then.status(404);
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let url = page(&server, "/gone");
        let outcome = loader(sink.clone()).load(&url).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Skipped));
        assert_eq!(sink.lines(), vec![format!("  ERROR 404 [{url}]")]);
    }

    #[tokio::test]
    async fn follows_one_redirect_on_the_same_host() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/old");
                then.status(301).header("location", "/new");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/new");
                then.status(200)
                    .header("content-type", "text/html")
                    .body(r#"<a href="/next">n</a>"#);
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let outcome = loader(sink).load(&page(&server, "/old")).await.unwrap();
        assert_eq!(links(outcome), vec![page(&server, "/next").canonical()]);
    }

    #[tokio::test]
    async fn drops_foreign_redirects_silently() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/away");
                then.status(302)
                    .header("location", "https://elsewhere.invalid/");
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let outcome = loader(sink.clone()).load(&page(&server, "/away")).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Skipped));
        assert!(sink.lines().is_empty());
    }

    #[tokio::test]
    async fn reports_failed_redirect_targets() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/old");
                then.status(301).header("location", "/broken");
            })
            .await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/broken");
                then.status(500);
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let outcome = loader(sink.clone()).load(&page(&server, "/old")).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Skipped));
        let target = page(&server, "/broken");
        assert_eq!(sink.lines(), vec![format!("  REDIRECT FAILED TO {target}")]);
    }

    #[tokio::test]
    async fn non_html_doctype_yields_no_links() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/feed");
                then.status(200)
                    .header("content-type", "text/xml")
                    .body(r#"<!DOCTYPE rss><a href="/hidden">x</a>"#);
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let outcome = loader(sink).load(&page(&server, "/feed")).await.unwrap();
        assert!(links(outcome).is_empty());
    }

    #[tokio::test]
    async fn switching_protocols_aborts_the_crawl() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(GET).path("/upgrade");
                then.status(101);
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let url = page(&server, "/upgrade");
        let error = loader(sink.clone()).load(&url).await.unwrap_err();
        assert!(matches!(error, CrawlError::SwitchingProtocols { .. }));
        assert!(sink
            .lines()
            .iter()
            .any(|l| l.contains("101 Switching Protocols not supported.")));
    }

    #[tokio::test]
    async fn ignored_extensions_never_hit_the_network() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET).path("/big.zip");
                then.status(200);
            })
            .await;

        let sink = Arc::new(MemorySink::new());
        let outcome = loader(sink).load(&page(&server, "/big.zip")).await.unwrap();
        assert!(matches!(outcome, LoadOutcome::Skipped));
        assert_eq!(mock.hits_async().await, 0);
    }
}
