use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use indexmap::IndexMap;
use reqwest::{redirect, Client};
use tokio::sync::mpsc::{self, UnboundedSender};
use tokio::sync::{Mutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};

use crate::config::CrawlerConfig;
use crate::error::CrawlError;
use crate::loader::PageLoader;
use crate::report::Sink;
use crate::robots::RobotsManager;
use crate::url::{registrable_domain, PageUrl};
use crate::worker::{Target, Worker};

/// What a finished run looked like: pages dispatched to the loader and hosts
/// whose robots.txt was acquired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlSummary {
    pub pages: usize,
    pub robots: usize,
}

struct WorkerHandle {
    tx: UnboundedSender<Target>,
    join: JoinHandle<()>,
}

/// Process-wide crawl state: the visited set, the robots cache, the worker
/// registry, and the counters every worker reports against. Owned by the
/// coordinator, shared behind an `Arc`.
pub(crate) struct Shared {
    pub config: CrawlerConfig,
    pub sink: Arc<dyn Sink>,
    pub robots: RobotsManager,
    pub loader: PageLoader,
    pub limiter: Semaphore,
    visited: Mutex<HashSet<String>>,
    workers: Mutex<IndexMap<String, WorkerHandle>>,
    worker_total: AtomicUsize,
    outstanding: AtomicUsize,
    started: Instant,
    fatal: Mutex<Option<CrawlError>>,
    pub fatal_notify: Notify,
}

impl Shared {
    fn new(
        config: CrawlerConfig,
        client: Client,
        domain: String,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let robots = RobotsManager::new(
            client.clone(),
            config.user_agent.clone(),
            config.default_delay_secs,
            sink.clone(),
        );
        let loader = PageLoader::new(client, domain, sink.clone());
        Shared {
            limiter: Semaphore::new(config.max_concurrent_tasks),
            robots,
            loader,
            sink,
            config,
            visited: Mutex::new(HashSet::new()),
            workers: Mutex::new(IndexMap::new()),
            worker_total: AtomicUsize::new(0),
            outstanding: AtomicUsize::new(0),
            started: Instant::now(),
            fatal: Mutex::new(None),
            fatal_notify: Notify::new(),
        }
    }

    /// Hands a target to the worker owning its host, spawning that worker
    /// first when the host is new. Lookup and spawn happen under one lock, so
    /// exactly one worker ever exists per host.
    pub async fn route(self: &Arc<Self>, target: Target) -> Result<(), CrawlError> {
        let key = target.url.host_key();
        let mut workers = self.workers.lock().await;
        if !workers.contains_key(&key) {
            let index = workers.len() + 1;
            let (tx, rx) = mpsc::unbounded_channel();
            let join = Worker::spawn(Arc::clone(self), key.clone(), index, rx);
            workers.insert(key.clone(), WorkerHandle { tx, join });
            self.worker_total.store(index, Ordering::SeqCst);
        }
        let handle = workers
            .get(&key)
            .ok_or_else(|| CrawlError::WorkerVanished { host: key.clone() })?;

        self.outstanding.fetch_add(1, Ordering::SeqCst);
        if handle.tx.send(target).is_err() {
            self.outstanding.fetch_sub(1, Ordering::SeqCst);
            return Err(CrawlError::WorkerVanished { host: key });
        }
        Ok(())
    }

    /// Claims the visited slot for a canonical URL; the first claimer wins.
    pub async fn mark_visited(&self, canonical: &str) -> bool {
        self.visited.lock().await.insert(canonical.to_string())
    }

    /// Releases a visited slot after a cancelled fetch.
    pub async fn unmark_visited(&self, canonical: &str) {
        self.visited.lock().await.remove(canonical);
    }

    pub async fn is_visited(&self, canonical: &str) -> bool {
        self.visited.lock().await.contains(canonical)
    }

    pub async fn visited_count(&self) -> usize {
        self.visited.lock().await.len()
    }

    /// Visited and robots counts in one snapshot, for the report line.
    pub async fn progress(&self) -> (usize, usize) {
        (self.visited_count().await, self.robots.fetched_count().await)
    }

    pub fn worker_total(&self) -> usize {
        self.worker_total.load(Ordering::SeqCst)
    }

    /// Accounts for a target entering some worker's frontier without going
    /// through `route`.
    pub fn add_outstanding(&self) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
    }

    /// Accounts for a target leaving the system.
    pub fn finish_target(&self) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
    }

    fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }

    pub fn global_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub async fn set_fatal(&self, error: CrawlError) {
        let mut fatal = self.fatal.lock().await;
        if fatal.is_none() {
            *fatal = Some(error);
        }
        self.fatal_notify.notify_one();
    }

    async fn take_fatal(&self) -> Option<CrawlError> {
        self.fatal.lock().await.take()
    }

    async fn abort_workers(&self) {
        for handle in self.workers.lock().await.values() {
            handle.join.abort();
        }
    }

    /// Closes every inbox and returns the join handles; drained workers exit
    /// once their channel hangs up.
    async fn close_workers(&self) -> Vec<JoinHandle<()>> {
        let mut workers = self.workers.lock().await;
        workers.drain(..).map(|(_, handle)| handle.join).collect()
    }
}

/// The coordinator: owns the configuration and HTTP client, seeds the first
/// worker, waits for quiescence, and prints the summary.
pub struct Crawler {
    config: CrawlerConfig,
    client: Client,
    sink: Arc<dyn Sink>,
}

impl Crawler {
    /// Initializes the crawler with a given configuration and report sink.
    /// Redirects are handled at the application level, so the client's own
    /// follower is disabled.
    pub(crate) fn from_config(config: CrawlerConfig, sink: Arc<dyn Sink>) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .user_agent(config.user_agent.as_str())
                .redirect(redirect::Policy::none())
                .build()?,
            config,
            sink,
        })
    }

    /// Initializes a new `Crawler` instance with the default configuration.
    pub fn new() -> Result<Self> {
        crate::config::CrawlerBuilder::new().build()
    }

    /// Crawls everything reachable from the seed within its registrable
    /// domain. Returns once every worker has drained, or with the fatal
    /// error that stopped the run.
    #[tracing::instrument(skip(self))]
    pub async fn run(&self, seed: &str) -> Result<CrawlSummary> {
        let seed_url = PageUrl::parse(seed)
            .ok_or_else(|| CrawlError::InvalidSeed(seed.to_string()))?;
        let domain = registrable_domain(seed_url.host());
        tracing::info!("crawling registrable domain {domain} from {seed_url}");

        let shared = Arc::new(Shared::new(
            self.config.clone(),
            self.client.clone(),
            domain,
            self.sink.clone(),
        ));
        shared
            .route(Target {
                url: seed_url,
                needs_robots: true,
            })
            .await?;

        loop {
            tokio::select! {
                _ = sleep(self.config.quiescence_poll) => {}
                _ = shared.fatal_notify.notified() => {}
            }
            if let Some(fatal) = shared.take_fatal().await {
                shared.abort_workers().await;
                return Err(fatal.into());
            }
            if shared.outstanding() == 0 {
                break;
            }
        }

        let handles = shared.close_workers().await;
        join_all(handles).await;

        let pages = shared.visited_count().await;
        let robots = shared.robots.fetched_count().await;
        self.sink
            .println(&format!("{} pages crawled.", pages + robots));
        Ok(CrawlSummary { pages, robots })
    }
}
