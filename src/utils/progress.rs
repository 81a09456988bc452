use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Byte counters for a single copy or archive operation.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub copied: u64,
    pub total: u64,
    pub files: u64,
    started: Instant,
}

impl TransferProgress {
    pub fn new(total: u64) -> Self {
        Self {
            copied: 0,
            total,
            files: 0,
            started: Instant::now(),
        }
    }

    pub fn record_file(&mut self, bytes: u64) {
        self.copied += bytes;
        self.files += 1;
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            (self.copied as f64 / self.total as f64) * 100.0
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Hands out progress bars, or hidden ones when output is suppressed.
#[derive(Debug, Clone, Copy)]
pub struct Progress {
    visible: bool,
}

impl Progress {
    pub fn terminal() -> Self {
        Self { visible: true }
    }

    pub fn hidden() -> Self {
        Self { visible: false }
    }

    pub fn bytes(&self, label: &str, total: u64) -> ProgressBar {
        if !self.visible {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(total);
        if let Ok(style) = ProgressStyle::default_bar()
            .template(
                ":: {msg} [{bar:40.blue/white}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
            )
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(label.to_string());
        pb
    }

    pub fn percent(&self, label: &str) -> ProgressBar {
        if !self.visible {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template(":: {msg} [{bar:40.cyan/white}] {pos}% [{elapsed_precise}]")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(label.to_string());
        pb
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        let mut progress = TransferProgress::new(200);
        assert_eq!(progress.percent(), 0.0);
        progress.record_file(50);
        progress.record_file(50);
        assert_eq!(progress.percent(), 50.0);
        assert_eq!(progress.files, 2);
    }

    #[test]
    fn test_empty_tree_is_complete() {
        assert_eq!(TransferProgress::new(0).percent(), 100.0);
    }
}
