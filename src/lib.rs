//! `rickbot` crawls every subdomain reachable from a seed URL, breadth-first,
//! fetching each page at most once while respecting per-host `robots.txt`
//! rules, crawl delays, and an adaptive back-pressure throttle.

pub mod config;
pub mod crawler;
pub mod error;
pub mod report;
pub mod url;

mod extract;
mod loader;
mod pacer;
mod robots;
mod worker;

pub use config::{CrawlerBuilder, CrawlerConfig};
pub use crawler::{CrawlSummary, Crawler};
pub use error::CrawlError;
pub use report::{MemorySink, Sink, StdoutSink};
pub use url::{registrable_domain, PageUrl};
