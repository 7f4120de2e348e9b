use serde::Serialize;

/// Per-segment progress snapshot, matching the `segmentProgress` event shape.
#[derive(Debug, Clone, Serialize)]
pub struct SegmentSnapshot {
    pub ordinal: u32,
    pub downloaded: u64,
    pub size: u64,
    pub start_offset: u64,
    pub total_file_size: u64,
}

/// Aggregate progress snapshot for an entire download, emitted at ~5 Hz
/// while pumping.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressSnapshot {
    pub ratio: f64,
    pub downloaded: u64,
    pub total: u64,
    pub speed: f64,
    pub eta_secs: f64,
}

impl ProgressSnapshot {
    /// `sessionBytes = Σdownloaded − bytesAtSessionStart`, clamped to `≥0`.
    /// `speed` and `eta` use a plain session average, not an exponential
    /// moving average: deliberately simple, matching the formulas this is
    /// derived from rather than a smoothed per-piece rate.
    pub fn compute(
        downloaded: u64,
        total: u64,
        bytes_at_session_start: u64,
        elapsed: std::time::Duration,
    ) -> Self {
        let session_bytes = downloaded.saturating_sub(bytes_at_session_start);
        let elapsed_secs = elapsed.as_secs_f64();

        let speed = if elapsed_secs > 0.1 {
            session_bytes as f64 / elapsed_secs
        } else {
            0.0
        };

        let remaining = total.saturating_sub(downloaded);
        let eta_secs = if speed > 0.0 {
            remaining as f64 / speed
        } else {
            0.0
        };

        let ratio = if total > 0 {
            downloaded as f64 / total as f64
        } else {
            0.0
        };

        Self {
            ratio,
            downloaded,
            total,
            speed,
            eta_secs,
        }
    }
}

/// Human-readable byte formatting, used by observers for display.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = 1024.0 * 1024.0;
    const GB: f64 = 1024.0 * 1024.0 * 1024.0;

    let b = bytes as f64;
    if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}
