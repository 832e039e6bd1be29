use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::command::CommandChannel;

/// One reading of the device's cumulative uptime counters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoadSample {
    pub timestamp: Instant,
    pub up_time: f64,
    pub idle_time: f64,
}

/// Parse `cat /proc/uptime` output: `<uptime> <idle>` in seconds.
pub fn parse_uptime(out: &str) -> Option<(f64, f64)> {
    let mut fields = out.split_whitespace();
    let up = fields.next()?.parse().ok()?;
    let idle = fields.next()?.parse().ok()?;
    Some((up, idle))
}

/// Highest per-interval load over the trailing `window`.
///
/// Walks the samples backwards from the newest. Each interval's load is
/// `1 - idle_delta / up_delta / cpu_count`, clamped to `[0, 1]`; an interval
/// whose uptime did not advance counts as fully busy. Returns 1.0 when the
/// history does not reach back `window`.
pub fn recent_max_load(samples: &[LoadSample], window: Duration, cpu_count: u32) -> f64 {
    let Some(newest) = samples.last() else {
        return 1.0;
    };
    let cpus = f64::from(cpu_count.max(1));

    let mut max_load: f64 = 0.0;
    for pair in samples.windows(2).rev() {
        let [older, newer] = pair else {
            continue;
        };
        let up_delta = newer.up_time - older.up_time;
        let load = if up_delta <= 0.0 {
            1.0
        } else {
            let idle = (newer.idle_time - older.idle_time) / up_delta / cpus;
            (1.0 - idle).clamp(0.0, 1.0)
        };
        max_load = max_load.max(load);
        if newest.timestamp.duration_since(older.timestamp) >= window {
            return max_load;
        }
    }
    1.0
}

/// Tracks how busy the device has been recently.
pub struct IdleStatus<'a> {
    channel: &'a dyn CommandChannel,
    samples: Vec<LoadSample>,
    cpu_count: u32,
}

impl<'a> IdleStatus<'a> {
    /// Start tracking; the first sample is taken immediately.
    pub async fn new(channel: &'a dyn CommandChannel) -> Self {
        let mut status = Self {
            channel,
            samples: Vec::new(),
            cpu_count: 1,
        };
        status.sample().await;
        status
    }

    pub fn samples(&self) -> &[LoadSample] {
        &self.samples
    }

    async fn sample(&mut self) {
        match self.channel.shell(&["cat", "/proc/uptime"]).await {
            Ok(out) => match parse_uptime(&out) {
                Some((up_time, idle_time)) => self.samples.push(LoadSample {
                    timestamp: Instant::now(),
                    up_time,
                    idle_time,
                }),
                None => warn!(output = %out, "unparseable uptime"),
            },
            Err(e) => warn!(error = %e, "failed to read device uptime"),
        }
    }

    /// Take a new sample and report the maximum load over `window`.
    pub async fn recent_max_load(&mut self, window: Duration) -> f64 {
        self.sample().await;
        let load = recent_max_load(&self.samples, window, self.cpu_count);
        if load >= 1.0 && self.samples.len() < 2 {
            info!("not enough idle data, assuming busy");
        }
        load
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::command::CommandError;

    fn sample(base: Instant, secs: u64, up: f64, idle: f64) -> LoadSample {
        LoadSample {
            timestamp: base + Duration::from_secs(secs),
            up_time: up,
            idle_time: idle,
        }
    }

    #[test]
    fn insufficient_history_is_busy() {
        let base = Instant::now();
        assert_eq!(recent_max_load(&[], Duration::from_secs(15), 1), 1.0);
        assert_eq!(
            recent_max_load(&[sample(base, 0, 10.0, 9.0)], Duration::from_secs(15), 1),
            1.0
        );
        let two = [sample(base, 0, 10.0, 9.0), sample(base, 5, 15.0, 14.0)];
        assert_eq!(recent_max_load(&two, Duration::from_secs(15), 1), 1.0);
    }

    #[test]
    fn reports_max_over_window() {
        let base = Instant::now();
        let samples = [
            sample(base, 0, 100.0, 90.0),
            // 10s with 9s idle: load 0.1
            sample(base, 10, 110.0, 99.0),
            // 10s with 5s idle: load 0.5
            sample(base, 20, 120.0, 104.0),
        ];
        let load = recent_max_load(&samples, Duration::from_secs(10), 1);
        assert!((load - 0.5).abs() < 1e-9, "load was {load}");
        let load = recent_max_load(&samples, Duration::from_secs(20), 1);
        assert!((load - 0.5).abs() < 1e-9, "load was {load}");
    }

    #[test]
    fn values_are_clamped() {
        let base = Instant::now();
        // idle advanced faster than uptime
        let samples = [sample(base, 0, 100.0, 50.0), sample(base, 20, 110.0, 80.0)];
        assert_eq!(recent_max_load(&samples, Duration::from_secs(15), 1), 0.0);
        // uptime went backwards
        let samples = [sample(base, 0, 100.0, 50.0), sample(base, 20, 90.0, 50.0)];
        assert_eq!(recent_max_load(&samples, Duration::from_secs(15), 1), 1.0);
    }

    #[test]
    fn parses_proc_uptime() {
        assert_eq!(parse_uptime("350735.47 234388.90\n"), Some((350735.47, 234388.90)));
        assert_eq!(parse_uptime("garbage"), None);
    }

    struct UptimeChannel {
        readings: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl CommandChannel for UptimeChannel {
        async fn shell(&self, _args: &[&str]) -> Result<String, CommandError> {
            let mut readings = self.readings.lock().unwrap();
            Ok(if readings.is_empty() {
                String::new()
            } else {
                readings.remove(0).to_string()
            })
        }
        async fn push(&self, _local: &std::path::Path, _remote: &str) -> Result<(), CommandError> {
            Ok(())
        }
        async fn transport_listening(&self) -> bool {
            true
        }
        async fn connect_transport(&self) -> bool {
            true
        }
        fn relays_running(&self) -> bool {
            true
        }
        async fn set_relays(&self, _running: bool) -> bool {
            true
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_device_goes_quiet() {
        let channel = UptimeChannel {
            readings: Mutex::new(vec!["100.0 90.0", "106.0 95.9", "112.0 101.8", "118.0 107.7"]),
        };
        let mut idle = IdleStatus::new(&channel).await;
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(idle.recent_max_load(Duration::from_secs(15)).await, 1.0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(idle.recent_max_load(Duration::from_secs(15)).await, 1.0);
        tokio::time::sleep(Duration::from_secs(6)).await;
        let load = idle.recent_max_load(Duration::from_secs(15)).await;
        assert!(load < 0.1, "load was {load}");
        assert_eq!(idle.samples().len(), 4);
    }
}
