use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

/// Create a spinner on stderr with the given message
pub fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ")
            .template("{spinner:.cyan} {prefix:.bold} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_prefix(message.to_string());
    spinner.enable_steady_tick(Duration::from_millis(100));
    spinner
}
