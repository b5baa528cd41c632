//! Progress bar for a running download

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use mchex_core::{DownloadContext, DownloadError};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] {bytes} ({bytes_per_sec}) {msg}";

/// Terminal progress display driven by polling a [`DownloadContext`]
pub struct DownloadBar {
    bar: ProgressBar,
    sized: bool,
}

impl DownloadBar {
    pub fn new(label: &str) -> Self {
        let bar = ProgressBar::new_spinner();
        if let Ok(spinner) = ProgressStyle::default_spinner().template(SPINNER_TEMPLATE) {
            bar.set_style(spinner);
        }
        bar.set_message(label.to_string());

        Self { bar, sized: false }
    }

    /// Refresh from the context's counters
    pub fn update(&mut self, context: &DownloadContext) {
        if !self.sized && context.progress().is_some() {
            if let Some(total) = context.bytes_expected() {
                self.bar.set_length(total);
                if let Ok(bar) = ProgressStyle::default_bar().template(BAR_TEMPLATE) {
                    self.bar.set_style(bar.progress_chars("█▓▒░  "));
                }
                self.sized = true;
            }
        }
        self.bar.set_position(context.bytes_transferred());
    }

    /// Leave the bar with a final status line
    pub fn finish(mut self, context: &DownloadContext, result: &Result<bool, DownloadError>) {
        self.update(context);

        match result {
            Ok(true) => self.bar.finish_with_message(format!(
                "{} Download complete",
                style("✓").green().bold()
            )),
            Ok(false) => self
                .bar
                .abandon_with_message(format!("{} Cancelled", style("○").dim())),
            Err(e) => self.bar.abandon_with_message(format!(
                "{} Failed: {}",
                style("✗").red().bold(),
                e
            )),
        }
    }
}
