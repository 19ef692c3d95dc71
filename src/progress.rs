use indicatif::{ProgressBar, ProgressStyle};

/// Observability side-channel for long-running stages. Carries no data the pipeline needs.
pub trait Progress: Send + Sync {
    fn report(&self, message: &str, percent: u8);

    fn finish(&self) {}
}

/// Discards every report.
pub struct NoProgress;

impl Progress for NoProgress {
    fn report(&self, _message: &str, _percent: u8) {}
}

/// Terminal progress bar over 0-100%.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    pub fn new() -> Self {
        let bar = ProgressBar::new(100);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=>-");
        bar.set_style(style);
        Self { bar }
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress for BarProgress {
    fn report(&self, message: &str, percent: u8) {
        self.bar.set_position(percent.min(100) as u64);
        self.bar.set_message(message.to_string());
    }

    fn finish(&self) {
        self.bar.finish_with_message("Done");
    }
}
