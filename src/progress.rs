use indicatif::{ProgressBar, ProgressStyle};

use crate::chapter::ChapterOutcome;

/// Observer for chapter completion. `completed` only ever grows.
pub trait ProgressSink: Send + Sync {
    fn started(&self, _title: &str, _total: usize) {}
    fn chapter_finished(
        &self,
        completed: usize,
        total: usize,
        chapter: &str,
        outcome: &ChapterOutcome,
    );
    fn finished(&self) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn chapter_finished(&self, _: usize, _: usize, _: &str, _: &ChapterOutcome) {}
}

const BAR_TEMPLATE: &str = "{prefix:>12.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos}/{len} {wide_msg}";

pub struct ChapterBar {
    bar: ProgressBar,
}

impl ChapterBar {
    pub fn new() -> Self {
        let bar = ProgressBar::hidden();
        if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("█▓▒░  "));
        }
        Self { bar }
    }
}

impl Default for ChapterBar {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressSink for ChapterBar {
    fn started(&self, title: &str, total: usize) {
        self.bar.set_draw_target(indicatif::ProgressDrawTarget::stderr());
        self.bar.set_length(total as u64);
        self.bar.set_prefix("Downloading");
        self.bar.set_message(title.to_string());
    }

    fn chapter_finished(
        &self,
        completed: usize,
        _total: usize,
        chapter: &str,
        outcome: &ChapterOutcome,
    ) {
        self.bar.set_position(completed as u64);
        if outcome.is_success() {
            self.bar.set_message(format!("done: {chapter}"));
        } else {
            self.bar.println(format!("chapter {chapter}: {outcome:?}"));
        }
    }

    fn finished(&self) {
        self.bar.finish_and_clear();
    }
}
