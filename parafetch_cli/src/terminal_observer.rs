use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use parafetch_core::progress::{format_bytes, EngineObserver, ProgressSnapshot, SegmentSnapshot};

/// Renders download progress as indicatif terminal bars: one bar per
/// segment, plus a total bar, all under a shared `MultiProgress`.
pub struct TerminalProgressObserver {
    multi: MultiProgress,
    bars: Mutex<HashMap<u32, ProgressBar>>,
    total_bar: Mutex<Option<ProgressBar>>,
}

impl TerminalProgressObserver {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: Mutex::new(HashMap::new()),
            total_bar: Mutex::new(None),
        }
    }

    fn ensure_segment_bars(&self, segments: &[SegmentSnapshot]) {
        let mut bars = self.bars.lock().unwrap();
        for seg in segments {
            bars.entry(seg.ordinal).or_insert_with(|| {
                let style = ProgressStyle::with_template(
                    "[{bar:30.cyan/blue}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) — {msg}",
                )
                .unwrap()
                .progress_chars("=>-");

                let pb = self.multi.add(ProgressBar::new(seg.size.max(1)));
                pb.set_style(style);
                pb.set_message(format!("segment {}", seg.ordinal));
                pb
            });
        }
    }

    fn ensure_total_bar(&self, snapshot: &ProgressSnapshot) {
        let mut total_bar = self.total_bar.lock().unwrap();
        if total_bar.is_none() && snapshot.total > 0 {
            let style = ProgressStyle::with_template(
                "Total [{bar:30.green/white}] {bytes}/{total_bytes} ({binary_bytes_per_sec}) ETA {eta}",
            )
            .unwrap()
            .progress_chars("=>-");

            let pb = self.multi.add(ProgressBar::new(snapshot.total.max(1)));
            pb.set_style(style);
            *total_bar = Some(pb);
        }
    }
}

#[async_trait]
impl EngineObserver for TerminalProgressObserver {
    async fn on_status_changed(&self, text: &str) {
        self.multi.println(text).ok();
    }

    async fn on_progress(&self, snapshot: &ProgressSnapshot) {
        self.ensure_total_bar(snapshot);
        if let Some(pb) = self.total_bar.lock().unwrap().as_ref() {
            pb.set_length(snapshot.total.max(1));
            pb.set_position(snapshot.downloaded);
        }
    }

    async fn on_segment_progress(&self, segments: &[SegmentSnapshot]) {
        self.ensure_segment_bars(segments);
        let bars = self.bars.lock().unwrap();
        for seg in segments {
            if let Some(pb) = bars.get(&seg.ordinal) {
                pb.set_length(seg.size.max(1));
                pb.set_position(seg.downloaded);
            }
        }
    }

    async fn on_paused(&self) {
        self.multi.println("Paused").ok();
    }

    async fn on_finished(&self, success: bool, message: &str) {
        let bars = self.bars.lock().unwrap();
        for pb in bars.values() {
            if success {
                pb.finish_with_message("done");
            } else {
                pb.abandon_with_message(message.to_string());
            }
        }
        if let Some(pb) = self.total_bar.lock().unwrap().as_ref() {
            if success {
                pb.finish_with_message(format!("Complete — {}", format_bytes(pb.position())));
            } else {
                pb.abandon_with_message(message.to_string());
            }
        }
    }
}
