use tokio::time::{sleep, Duration, Instant};

/// Per-worker request pacing: the per-host crawl-delay window plus the global
/// quadratic back-pressure throttle.
///
/// The throttle grows with the square of the active worker count so that
/// per-subdomain parallelism does not multiply into per-host flooding; the
/// coefficient is tunable through the builder.
pub(crate) struct Pacer {
    throttle_factor: f64,
    last_fetch: Option<Instant>,
}

impl Pacer {
    pub fn new(throttle_factor: f64) -> Self {
        Self {
            throttle_factor,
            last_fetch: None,
        }
    }

    /// Whole seconds of global back-pressure for `workers` active workers.
    pub fn throttle_secs(&self, workers: usize) -> u64 {
        let workers = workers as f64;
        (self.throttle_factor * workers * workers).floor() as u64
    }

    /// Sleeps until the next fetch is permitted, then records the dispatch
    /// time.
    pub async fn pace(&mut self, delay_secs: u64, workers: usize) {
        let throttle = self.throttle_secs(workers);
        if throttle > 0 {
            tracing::debug!("throttling {throttle}s with {workers} workers active");
            sleep(Duration::from_secs(throttle)).await;
        }
        if let Some(last) = self.last_fetch {
            let window = Duration::from_secs(delay_secs);
            let elapsed = last.elapsed();
            if elapsed < window {
                tracing::debug!(
                    "sleeping {:?} to honor the crawl delay",
                    window - elapsed
                );
                sleep(window - elapsed).await;
            }
        }
        self.last_fetch = Some(Instant::now());
    }
}
