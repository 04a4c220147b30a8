//! Terminal rendering of progress bus events.
//!
//! Every `(task, subject)` pair gets its own line: a byte bar when the size
//! is known, a spinner otherwise.

use std::collections::HashMap;
use std::time::Duration;

use a3s_catalog_core::progress::UNKNOWN_SIZE;
use a3s_catalog_core::{ProgressEvent, ProgressKind, ProgressSubscription};
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::task::JoinHandle;

/// Draws one line per task subject.
pub struct ProgressRenderer {
    multi: MultiProgress,
    bars: HashMap<(String, String), ProgressBar>,
}

impl ProgressRenderer {
    /// Render to stderr.
    pub fn new() -> Self {
        Self::with_draw_target(ProgressDrawTarget::stderr())
    }

    pub fn with_draw_target(target: ProgressDrawTarget) -> Self {
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: HashMap::new(),
        }
    }

    /// Consume events until the bus exits or every publisher is gone.
    pub fn spawn(mut self, mut subscription: ProgressSubscription) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(event) = subscription.recv().await {
                if !self.handle(&event) {
                    break;
                }
            }
            if subscription.dropped() > 0 {
                tracing::debug!(dropped = subscription.dropped(), "Progress display skipped events");
            }
            self.finish();
        })
    }

    /// Apply one event; returns false on exit.
    pub fn handle(&mut self, event: &ProgressEvent) -> bool {
        let key = (event.task_id.clone(), event.subject_id.clone());
        match event.kind {
            ProgressKind::Exit => return false,
            ProgressKind::NewTask => {
                let bar = self.multi.add(new_bar(event));
                if let Some(old) = self.bars.insert(key, bar) {
                    old.finish_and_clear();
                }
            }
            ProgressKind::Progress => {
                // Producers may open a line with its first progress event.
                let bar = self
                    .bars
                    .entry(key)
                    .or_insert_with(|| self.multi.add(new_bar(event)));
                if event.size != UNKNOWN_SIZE {
                    bar.set_length(event.size.max(0) as u64);
                }
                bar.set_position(event.offset.max(0) as u64);
            }
            ProgressKind::Done => {
                if let Some(bar) = self.bars.get(&key) {
                    bar.finish_with_message(style("done").green().to_string());
                }
            }
            ProgressKind::Skipped => {
                let bar = self
                    .bars
                    .entry(key)
                    .or_insert_with(|| self.multi.add(new_bar(event)));
                bar.finish_with_message(style("cached").dim().to_string());
            }
        }
        true
    }

    /// Lines currently tracked.
    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    fn finish(&self) {
        for bar in self.bars.values() {
            if !bar.is_finished() {
                bar.abandon();
            }
        }
    }
}

impl Default for ProgressRenderer {
    fn default() -> Self {
        Self::new()
    }
}

/// Display label for an event: task, plus the subject when present.
pub fn label(event: &ProgressEvent) -> String {
    if event.subject_id.is_empty() {
        event.task_id.clone()
    } else {
        format!("{} {}", event.task_id, event.subject_id)
    }
}

fn new_bar(event: &ProgressEvent) -> ProgressBar {
    let bar = if event.size == UNKNOWN_SIZE {
        let bar = ProgressBar::new_spinner();
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix} {msg:.dim}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        bar
    } else {
        let bar = ProgressBar::new(event.size.max(0) as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "  {prefix} {bar:20.cyan/dim} {bytes}/{total_bytes} {msg:.dim}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("━╸─"),
        );
        bar
    };
    bar.set_prefix(label(event));
    bar
}
