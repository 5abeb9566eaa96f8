use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Counters for one `wait` invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitStats {
    pub job_id: String,
    /// Long-poll queries issued
    pub polls: u32,
    /// Queries that ended in a request-level timeout
    pub request_timeouts: u32,
    pub elapsed_ms: u64,
    /// "decrypted", "failed", "deadline_exceeded", "output_retrieval_failed" or "aborted"
    pub outcome: String,
}

impl WaitStats {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            ..Self::default()
        }
    }

    pub fn record_poll(&mut self, request_timeout: bool) {
        self.polls += 1;
        if request_timeout {
            self.request_timeouts += 1;
        }
    }

    pub fn finish(&mut self, elapsed: Duration, outcome: &str) {
        self.elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.outcome = outcome.to_string();
    }

    pub fn export_to_json<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json_string = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json_string.as_bytes())?;

        Ok(())
    }
}
