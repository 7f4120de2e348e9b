use async_trait::async_trait;

use super::snapshot::{ProgressSnapshot, SegmentSnapshot};

/// Everything the engine emits to an attached observer (spec.md §4.5). All
/// methods default to a no-op so implementors only override what they use —
/// the CLI's terminal observer only cares about a handful of these.
#[async_trait]
pub trait EngineObserver: Send + Sync + 'static {
    /// Once, before any other event for this download.
    async fn on_id_assigned(&self, _id: &str) {}

    /// Human-readable phase transitions: `"Connecting..."`,
    /// `"Downloading with N connections..."`, `"Paused"`,
    /// `"Merging files..."`, `"Network lost. Retrying..."`,
    /// `"Connection dropped. Retrying..."`, `"Stream stalled. Retrying..."`,
    /// `"Resumed"`.
    async fn on_status_changed(&self, _text: &str) {}

    /// Emitted at ~5 Hz while pumping.
    async fn on_progress(&self, _snapshot: &ProgressSnapshot) {}

    /// Same cadence as `on_progress`.
    async fn on_segment_progress(&self, _segments: &[SegmentSnapshot]) {}

    /// On graceful pause, after state has been persisted.
    async fn on_paused(&self) {}

    /// Terminal; no further events follow for this download.
    async fn on_finished(&self, _success: bool, _message: &str) {}
}
