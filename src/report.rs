use std::sync::Mutex;

/// Line-oriented sink for the crawl report.
///
/// The report lines (`OK`/`NO` robots lines, per-page fetch lines, the final
/// summary) go through this trait; diagnostic output goes through `tracing`
/// instead and never mixes with the report.
pub trait Sink: Send + Sync {
    fn println(&self, line: &str);
}

/// Sink writing to stdout, used by the `crawl` binary.
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn println(&self, line: &str) {
        println!("{line}");
    }
}

/// Sink capturing lines in memory, for tests.
#[derive(Default)]
pub struct MemorySink {
    lines: Mutex<Vec<String>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything printed so far, in order.
    pub fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("sink lock poisoned").clone()
    }
}

impl Sink for MemorySink {
    fn println(&self, line: &str) {
        self.lines
            .lock()
            .expect("sink lock poisoned")
            .push(line.to_string());
    }
}
