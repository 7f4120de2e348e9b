pub mod observer;
pub mod snapshot;

pub use observer::EngineObserver;
pub use snapshot::{format_bytes, ProgressSnapshot, SegmentSnapshot};
