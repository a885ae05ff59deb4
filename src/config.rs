use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;

use crate::crawler::Crawler;
use crate::report::{Sink, StdoutSink};

const USER_AGENT: &str = "rickbot";

// Default configuration constants.
const DEFAULT_DELAY_SECS: u64 = 1;
const THROTTLE_FACTOR: f64 = 0.02;
const MAX_CONCURRENT_TASKS: usize = 100;
const WATCHDOG_MULTIPLIER: u64 = 10;
const QUIESCENCE_POLL: Duration = Duration::from_secs(10);
const INBOX_POLL: Duration = Duration::from_millis(100);

/// Configuration parameters for the `Crawler`.
/// Defines pacing, politeness, and concurrency bounds for the crawl.
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    pub(crate) user_agent: String,
    pub(crate) default_delay_secs: u64,
    pub(crate) throttle_factor: f64,
    pub(crate) max_concurrent_tasks: usize,
    pub(crate) watchdog_multiplier: u64,
    pub(crate) quiescence_poll: Duration,
    pub(crate) inbox_poll: Duration,
}

impl Default for CrawlerConfig {
    /// Default configuration for the crawler.
    fn default() -> Self {
        Self {
            user_agent: USER_AGENT.into(),
            default_delay_secs: DEFAULT_DELAY_SECS,
            throttle_factor: THROTTLE_FACTOR,
            max_concurrent_tasks: MAX_CONCURRENT_TASKS,
            watchdog_multiplier: WATCHDOG_MULTIPLIER,
            quiescence_poll: QUIESCENCE_POLL,
            inbox_poll: INBOX_POLL,
        }
    }
}

/// Builder pattern for `Crawler`. Allows for customizable configurations.
pub struct CrawlerBuilder {
    config: CrawlerConfig,
    sink: Option<Arc<dyn Sink>>,
}

impl Default for CrawlerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CrawlerBuilder {
    /// Initializes a new builder with default configuration.
    pub fn new() -> Self {
        CrawlerBuilder {
            config: CrawlerConfig::default(),
            sink: None,
        }
    }

    /// Set a custom user agent, used for request headers and robots.txt rule
    /// matching alike.
    pub fn with_user_agent<S: AsRef<str>>(mut self, user_agent: S) -> Self {
        self.config.user_agent = user_agent.as_ref().into();
        self
    }

    /// Crawl delay applied to hosts whose robots.txt specifies none.
    pub fn with_default_delay_secs(mut self, seconds: u64) -> Self {
        self.config.default_delay_secs = seconds;
        self
    }

    /// Coefficient of the quadratic back-pressure throttle.
    pub fn with_throttle_factor(mut self, factor: f64) -> Self {
        self.config.throttle_factor = factor;
        self
    }

    /// Set a limit for simultaneously dispatched page loads.
    pub fn with_max_concurrent_tasks(mut self, tasks: usize) -> Self {
        self.config.max_concurrent_tasks = tasks;
        self
    }

    /// A fetch still pending after `multiplier × delay` seconds is cancelled
    /// and retried.
    pub fn with_watchdog_multiplier(mut self, multiplier: u64) -> Self {
        self.config.watchdog_multiplier = multiplier;
        self
    }

    /// How often the coordinator checks whether all workers have drained.
    pub fn with_quiescence_poll(mut self, interval: Duration) -> Self {
        self.config.quiescence_poll = interval;
        self
    }

    /// How often an idle worker polls its inbox.
    pub fn with_inbox_poll(mut self, interval: Duration) -> Self {
        self.config.inbox_poll = interval;
        self
    }

    /// Replace the stdout report sink, e.g. to capture the report in tests.
    pub fn with_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Consumes the builder and returns a configured `Crawler` instance.
    pub fn build(self) -> Result<Crawler> {
        let sink = self.sink.unwrap_or_else(|| Arc::new(StdoutSink));
        Crawler::from_config(self.config, sink)
    }
}
