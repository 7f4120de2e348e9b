pub mod engine;
pub mod http;
pub mod progress;
pub mod segment;
pub mod state_store;
pub mod types;

pub use engine::{Engine, EngineOptions};
pub use progress::{EngineObserver, ProgressSnapshot, SegmentSnapshot};
pub use types::{Download, DownloadError, Segment, SegmentState};
