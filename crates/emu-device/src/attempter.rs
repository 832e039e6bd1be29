//! Step retry bookkeeping for readiness polling.

use std::time::Duration;

use tracing::info;

use crate::stopwatch::Stopwatch;

/// Runs readiness probes and tracks how many times they have been tried.
///
/// `total_attempts` counts every probe of the whole sequence and bounds the
/// overall wait. `step_attempts` counts consecutive failures of the current
/// check and is reset when that check succeeds.
#[derive(Debug)]
pub struct Attempter {
    sleep_interval: Duration,
    total_attempts: u32,
    step_attempts: u32,
    timings: Stopwatch,
}

impl Attempter {
    pub fn new(sleep_interval: Duration) -> Self {
        Self {
            sleep_interval,
            total_attempts: 0,
            step_attempts: 0,
            timings: Stopwatch::new(),
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.total_attempts
    }

    pub fn step_attempts(&self) -> u32 {
        self.step_attempts
    }

    pub fn timings(&self) -> &Stopwatch {
        &self.timings
    }

    /// Run one probe.
    ///
    /// Probe time is charged to `tag`, the sleep after a failed probe to
    /// `<tag>_FAIL_SLEEP`.
    pub async fn attempt_step<F, Fut>(&mut self, label: &str, tag: &str, probe: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = bool>,
    {
        self.total_attempts += 1;
        self.step_attempts += 1;
        info!(
            step = self.step_attempts,
            total = self.total_attempts,
            "{label}"
        );

        let ok = self.timings.time(tag, probe()).await;
        if ok {
            self.step_attempts = 0;
        } else {
            let sleep_tag = format!("{tag}_FAIL_SLEEP");
            self.timings
                .time(&sleep_tag, tokio::time::sleep(self.sleep_interval))
                .await;
        }
        ok
    }
}
