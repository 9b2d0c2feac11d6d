//! Processing progress reporting.
//!
//! Reports what `docbridge process` is doing so users see which folder is
//! being scanned, how many files are left, and how each file ended.
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use std::io::Write;
use std::sync::Arc;

/// A single progress event from the processing pipeline.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressEvent {
    /// Walking a watched folder; file count not known yet.
    Scanning { folder: String },
    /// File `n` of `total` in the current folder finished with `outcome`.
    File {
        folder: String,
        n: u64,
        total: u64,
        outcome: FileOutcome,
    },
    /// All folders done.
    Finished {
        processed: u64,
        skipped: u64,
        failed: u64,
    },
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FileOutcome {
    Processed,
    Skipped,
    Failed,
}

impl FileOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileOutcome::Processed => "processed",
            FileOutcome::Skipped => "skipped",
            FileOutcome::Failed => "failed",
        }
    }
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Human-friendly progress on stderr: "process /data/docs  12 / 340 files".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: ProgressEvent) {
        let line = match &event {
            ProgressEvent::Scanning { folder } => format!("process {}  scanning...\n", folder),
            ProgressEvent::File {
                folder, n, total, ..
            } => format!(
                "process {}  {} / {} files\n",
                folder,
                format_number(*n),
                format_number(*total)
            ),
            ProgressEvent::Finished {
                processed,
                skipped,
                failed,
            } => format!(
                "process done  {} processed, {} skipped, {} failed\n",
                format_number(*processed),
                format_number(*skipped),
                format_number(*failed)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: ProgressEvent) {
        let obj = match &event {
            ProgressEvent::Scanning { folder } => serde_json::json!({
                "event": "progress",
                "folder": folder,
                "phase": "scanning"
            }),
            ProgressEvent::File {
                folder,
                n,
                total,
                outcome,
            } => serde_json::json!({
                "event": "progress",
                "folder": folder,
                "phase": "processing",
                "n": n,
                "total": total,
                "outcome": outcome.as_str()
            }),
            ProgressEvent::Finished {
                processed,
                skipped,
                failed,
            } => serde_json::json!({
                "event": "finished",
                "processed": processed,
                "skipped": skipped,
                "failed": failed
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: ProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

impl std::str::FromStr for ProgressMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => Err(format!(
                "invalid progress mode '{}' (expected off, human, or json)",
                other
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn progress_mode_parses() {
        assert_eq!("json".parse::<ProgressMode>().unwrap(), ProgressMode::Json);
        assert!("loud".parse::<ProgressMode>().is_err());
    }
}
