//! Terminal presentation: transfer progress rendering.

use std::sync::Arc;

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

use crate::client::ProgressFn;

/// A byte-oriented progress bar in the house style.
///
/// Starts hidden; it is revealed once the total size is known.
pub fn transfer_bar() -> ProgressBar {
    let bar = ProgressBar::hidden();
    bar.set_style(
        ProgressStyle::with_template("[{bar:20}] {percent:>3}% | {binary_bytes_per_sec}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

/// Adapt a bar into the byte-count callback the transfer code consumes.
pub fn observer(bar: &ProgressBar) -> ProgressFn {
    let bar = bar.clone();
    Arc::new(move |transferred, total| {
        if let Some(total) = total {
            if bar.length() != Some(total) {
                bar.set_length(total);
                bar.set_draw_target(ProgressDrawTarget::stderr());
            }
        }
        bar.set_position(transferred);
    })
}
