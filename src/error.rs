use thiserror::Error;

/// Conditions that abort the whole crawl. Everything else is reported on the
/// output sink and the crawl keeps going.
#[derive(Error, Debug)]
pub enum CrawlError {
    /// The seed argument did not parse as an absolute http(s) URL.
    #[error("invalid seed URL: {0}")]
    InvalidSeed(String),

    /// A server answered 101 Switching Protocols, which the crawler cannot
    /// speak.
    #[error("101 Switching Protocols not supported. [{url}]")]
    SwitchingProtocols { url: String },

    /// Link routing found no live worker for an in-domain host.
    #[error("no worker registered for host {host}")]
    WorkerVanished { host: String },
}
