//! Periodic resource logging during long processing runs.
//!
//! A background task samples system memory every `interval_secs` and logs
//! it alongside the pipeline counters. Usage at or above the warn
//! threshold logs a warning; at or above the critical threshold, an error.
//! The monitor only reads the shared [`PipelineCounters`].

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::MonitorConfig;
use crate::orchestrator::PipelineCounters;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MemorySample {
    pub total_kb: u64,
    pub available_kb: u64,
}

impl MemorySample {
    pub fn used_percent(&self) -> f64 {
        if self.total_kb == 0 {
            return 0.0;
        }
        let used = self.total_kb.saturating_sub(self.available_kb);
        used as f64 * 100.0 / self.total_kb as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pressure {
    Normal,
    Warning,
    Critical,
}

pub fn classify(used_percent: f64, config: &MonitorConfig) -> Pressure {
    if used_percent >= config.critical_percent {
        Pressure::Critical
    } else if used_percent >= config.warn_percent {
        Pressure::Warning
    } else {
        Pressure::Normal
    }
}

/// Parse `/proc/meminfo` text. `None` if the required keys are absent.
pub fn parse_meminfo(text: &str) -> Option<MemorySample> {
    let mut total = None;
    let mut available = None;
    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let key = parts.next();
        let value = parts.next().and_then(|v| v.parse::<u64>().ok());
        match key {
            Some("MemTotal:") => total = value,
            Some("MemAvailable:") => available = value,
            _ => {}
        }
    }
    Some(MemorySample {
        total_kb: total?,
        available_kb: available?,
    })
}

/// Current memory usage. Only available on Linux.
pub fn sample_memory() -> Option<MemorySample> {
    std::fs::read_to_string("/proc/meminfo")
        .ok()
        .and_then(|text| parse_meminfo(&text))
}

/// Running monitor task. Dropping the handle leaves the task running
/// until the runtime shuts down; call [`MonitorHandle::stop`] to end it.
pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    pub async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.task.await {
            warn!("resource monitor task ended abnormally: {}", e);
        }
    }
}

pub struct ResourceMonitor;

impl ResourceMonitor {
    pub fn spawn(config: MonitorConfig, counters: Arc<PipelineCounters>) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = interval(Duration::from_secs(config.interval_secs.max(1)));
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(interval_secs = config.interval_secs, "resource monitor started");

            loop {
                tokio::select! {
                    changed = stop_rx.changed() => {
                        if changed.is_err() || *stop_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => log_sample(&config, &counters),
                }
            }

            debug!("resource monitor stopped");
        });

        MonitorHandle { stop_tx, task }
    }
}

fn log_sample(config: &MonitorConfig, counters: &PipelineCounters) {
    let c = counters.snapshot();
    let Some(mem) = sample_memory() else {
        info!(
            processed = c.processed,
            skipped = c.skipped,
            failed = c.failed,
            chunks = c.chunks_stored,
            "pipeline status (memory usage unavailable)"
        );
        return;
    };

    let used = mem.used_percent();
    let used_display = format!("{:.1}%", used);
    match classify(used, config) {
        Pressure::Critical => error!(
            memory_used = %used_display,
            processed = c.processed,
            failed = c.failed,
            "memory usage critical"
        ),
        Pressure::Warning => warn!(
            memory_used = %used_display,
            processed = c.processed,
            failed = c.failed,
            "memory usage high"
        ),
        Pressure::Normal => info!(
            memory_used = %used_display,
            available_mb = mem.available_kb / 1024,
            processed = c.processed,
            skipped = c.skipped,
            failed = c.failed,
            chunks = c.chunks_stored,
            "pipeline status"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_meminfo() {
        let text = "MemTotal:        1000 kB\nMemFree:  10 kB\nMemAvailable:     250 kB\n";
        let sample = parse_meminfo(text).unwrap();
        assert_eq!(sample.total_kb, 1000);
        assert_eq!(sample.available_kb, 250);
        assert!((sample.used_percent() - 75.0).abs() < 1e-9);
        assert!(parse_meminfo("MemTotal: 5 kB\n").is_none());
    }

    #[test]
    fn test_thresholds() {
        let cfg = MonitorConfig::default();
        assert_eq!(classify(50.0, &cfg), Pressure::Normal);
        assert_eq!(classify(90.0, &cfg), Pressure::Warning);
        assert_eq!(classify(95.0, &cfg), Pressure::Critical);
    }

    #[tokio::test]
    async fn test_monitor_stops_promptly() {
        let cfg = MonitorConfig {
            interval_secs: 3600,
            ..Default::default()
        };
        let handle = ResourceMonitor::spawn(cfg, Arc::new(PipelineCounters::default()));
        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .unwrap();
    }
}
