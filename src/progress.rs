//! Progress reporting: a count spinner per submitted type (the total is unknown up front).

use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

pub fn make_submit_spinner(label: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} {msg} {pos} submitted  it/s: {per_sec}  elapsed: {elapsed_precise}",
    ) {
        pb.set_style(style);
    }
    if !label.is_empty() {
        pb.set_message(label.to_string());
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}
