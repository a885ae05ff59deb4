use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration, Instant};

use crate::crawler::Shared;
use crate::error::CrawlError;
use crate::loader::LoadOutcome;
use crate::pacer::Pacer;
use crate::url::PageUrl;

/// One entry of a worker's frontier. `needs_robots` is a hint that the
/// host's robots.txt had not been acquired when the link was discovered.
#[derive(Debug)]
pub(crate) struct Target {
    pub url: PageUrl,
    pub needs_robots: bool,
}

/// Breadth-first search over the pages of a single hostname.
///
/// The worker drains its current frontier level, consulting the robots
/// manager and the pacer before every dispatch; links it discovers go to the
/// next level when they stay on its host and through the coordinator to a
/// sibling worker otherwise. When both frontier and inbox are empty it idles
/// until new targets are routed in or the coordinator closes the inbox.
pub(crate) struct Worker {
    host_key: String,
    index: usize,
    shared: Arc<Shared>,
    inbox: mpsc::UnboundedReceiver<Target>,
    current: VecDeque<Target>,
    next: VecDeque<Target>,
    requested: HashSet<String>,
    pacer: Pacer,
    started: Instant,
}

impl Worker {
    pub fn spawn(
        shared: Arc<Shared>,
        host_key: String,
        index: usize,
        inbox: mpsc::UnboundedReceiver<Target>,
    ) -> JoinHandle<()> {
        let throttle_factor = shared.config.throttle_factor;
        let worker = Worker {
            host_key,
            index,
            shared,
            inbox,
            current: VecDeque::new(),
            next: VecDeque::new(),
            requested: HashSet::new(),
            pacer: Pacer::new(throttle_factor),
            started: Instant::now(),
        };
        tokio::spawn(worker.run())
    }

    async fn run(mut self) {
        tracing::debug!("worker {} started for {}", self.index, self.host_key);
        loop {
            while let Some(target) = self.current.pop_front() {
                let result = self.process(target).await;
                self.shared.finish_target();
                if let Err(fatal) = result {
                    self.shared.set_fatal(fatal).await;
                    return;
                }
            }

            // Promote the next BFS level, then fold in whatever siblings
            // routed over in the meantime.
            self.current.append(&mut self.next);
            let mut closed = false;
            loop {
                match self.inbox.try_recv() {
                    Ok(target) => self.current.push_back(target),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        closed = true;
                        break;
                    }
                }
            }
            if self.current.is_empty() {
                if closed {
                    tracing::debug!("worker {} drained", self.index);
                    return;
                }
                sleep(self.shared.config.inbox_poll).await;
            }
        }
    }

    async fn process(&mut self, target: Target) -> Result<(), CrawlError> {
        let url = &target.url;

        if target.needs_robots {
            self.shared.robots.ensure(url).await?;
        }
        if !self.shared.robots.allowed(url).await {
            return Ok(());
        }

        let canonical = url.canonical();
        self.requested.insert(canonical.clone());
        if !self.shared.mark_visited(&canonical).await {
            tracing::debug!("lost the visited race for {canonical}");
            return Ok(());
        }

        let delay = self.shared.robots.delay_for(url).await;
        self.pacer.pace(delay, self.shared.worker_total()).await;

        let deadline =
            Duration::from_secs(self.shared.config.watchdog_multiplier * delay.max(1));
        let shared = Arc::clone(&self.shared);
        let permit = shared.limiter.acquire().await;
        let outcome = timeout(deadline, shared.loader.load(url)).await;
        // Explicitly dropping the permit to free up the concurrency slot.
        drop(permit);
        match outcome {
            Ok(Ok(LoadOutcome::Fetched(links))) => {
                self.report_success(url).await;
                self.classify(links).await?;
            }
            Ok(Ok(LoadOutcome::Skipped)) => {}
            Ok(Err(fatal)) => return Err(fatal),
            Err(_elapsed) => {
                // The dropped future cancels the request. The target goes
                // back to the head of the next level and gives up its
                // visited slot, since no terminal line was emitted for it.
                self.shared.unmark_visited(&canonical).await;
                self.shared.add_outstanding();
                self.next.push_front(target);
                self.shared
                    .sink
                    .println(&format!("RECRAWLING {} PENDING TARGETS!", self.next.len()));
            }
        }
        Ok(())
    }

    /// Sends each discovered link to its place: own host to the next level,
    /// sibling subdomains through the coordinator, anything already seen
    /// nowhere.
    async fn classify(&mut self, links: Vec<PageUrl>) -> Result<(), CrawlError> {
        for link in links {
            if link.has_ignored_extension() {
                continue;
            }
            let canonical = link.canonical();
            if self.requested.contains(&canonical)
                || self.shared.is_visited(&canonical).await
            {
                continue;
            }
            let needs_robots = !self.shared.robots.is_fetched(&link.host_key()).await;
            let target = Target {
                url: link,
                needs_robots,
            };
            if target.url.host_key() == self.host_key {
                self.shared.add_outstanding();
                self.next.push_back(target);
            } else {
                self.shared.route(target).await?;
            }
        }
        Ok(())
    }

    async fn report_success(&self, url: &PageUrl) {
        let (visited, robots) = self.shared.progress().await;
        let local_rate = rate(self.requested.len(), self.started.elapsed().as_secs_f64());
        let global_rate = rate(visited, self.shared.global_elapsed().as_secs_f64());
        self.shared.sink.println(&format!(
            "• {:.1}/{:.1} Crawler[{}/{}] {} [{}/{}]",
            local_rate,
            global_rate,
            self.index,
            self.shared.worker_total(),
            url,
            self.requested.len(),
            visited + robots,
        ));
    }
}

fn rate(count: usize, secs: f64) -> f64 {
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}
