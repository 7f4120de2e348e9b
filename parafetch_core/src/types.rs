use std::path::PathBuf;

/// State of a single segment transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    NotStarted,
    Downloading,
    Finished,
    Failed,
}

/// One contiguous, inclusive byte range `[start, end]` of the remote
/// resource, tiled with its siblings to cover `[0, total_size)` exactly.
#[derive(Debug, Clone)]
pub struct Segment {
    pub ordinal: u32,
    pub start: u64,
    pub end: u64,
    pub downloaded: u64,
    pub state: SegmentState,
    pub path: PathBuf,
}

impl Segment {
    pub fn new(ordinal: u32, start: u64, end: u64, path: PathBuf) -> Self {
        Self {
            ordinal,
            start,
            end,
            downloaded: 0,
            state: SegmentState::NotStarted,
            path,
        }
    }

    pub fn size(&self) -> u64 {
        self.end - self.start + 1
    }

    pub fn is_complete(&self) -> bool {
        self.downloaded >= self.size()
    }
}

/// Custom request headers forwarded verbatim to the origin, minus `Range`
/// (the engine always sets its own) and a handful of hop-by-hop headers the
/// transport layer manages itself. No cookies, no per-segment authentication
/// — both are out of scope (spec Non-goals).
#[derive(Debug, Clone, Default)]
pub struct HeaderData {
    pub url: String,
    pub headers: std::collections::HashMap<String, Vec<String>>,
}

/// Result of the one-shot probe request.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub resumable: bool,
    pub resource_size: Option<u64>,
    pub final_uri: String,
    pub attachment_name: Option<String>,
    pub content_type: Option<String>,
}

/// A unit of work: one remote resource being fetched into one local file.
#[derive(Debug, Clone)]
pub struct Download {
    pub id: String,
    pub url: String,
    pub output_dir: PathBuf,
    pub file_name: String,
    pub total_size: u64,
    pub segment_count: u32,
    pub range_supported: bool,
    pub speed_cap: u64,
    /// Bytes already on disk (across all segments) when the current
    /// `Pumping` session began — 0 for a fresh start, the sum of scratch
    /// file lengths for a resume or a post-`Recovering` restart.
    pub bytes_at_session_start: u64,
}

/// The taxonomy from spec §7. Each fatal kind escapes the worker as exactly
/// one `finished(false, message)` event; transient kinds are handled inside
/// the engine and never cross the public boundary.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("disk error: {0}")]
    Disk(#[from] std::io::Error),
    #[error("could not connect to server")]
    ProbeFailed,
    #[error("initialization failed")]
    InitFailed,
    #[error("connection dropped. retrying...")]
    TransportError,
    #[error("network lost. retrying...")]
    PollError,
    #[error("stream stalled. retrying...")]
    Stalled,
    #[error("merge error")]
    MergeError,
    #[error("resume failed: state missing")]
    StateMissing,
    #[error("file access error")]
    FileAccessError,
    #[error("cancelled")]
    Cancelled,
    #[error("max retry exceeded")]
    MaxRetryExceeded,
    #[error("recovery exhausted")]
    RecoveryExhausted,
}

impl DownloadError {
    /// The exact strings spec §4.5/§7 requires in `finished(false, message)`.
    pub fn user_message(&self) -> &'static str {
        match self {
            DownloadError::ProbeFailed | DownloadError::Network(_) => "Could not connect to server.",
            DownloadError::InitFailed => "Initialization failed",
            DownloadError::Disk(_) => "File access error",
            DownloadError::TransportError => "Connection dropped. Retrying...",
            DownloadError::PollError => "Network lost. Retrying...",
            DownloadError::Stalled => "Stream stalled. Retrying...",
            DownloadError::MergeError => "Merge Error",
            DownloadError::StateMissing => "Resume failed: State missing",
            DownloadError::FileAccessError => "File access error",
            DownloadError::Cancelled => "Cancelled",
            DownloadError::MaxRetryExceeded => "Connection dropped. Retrying...",
            DownloadError::RecoveryExhausted => "Connection dropped.",
        }
    }
}
