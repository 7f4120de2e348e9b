use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::http;
use crate::progress::{EngineObserver, ProgressSnapshot, SegmentSnapshot};
use crate::segment::{download_segment, SpeedCapHandle};
use crate::state_store::{StateRecord, StateStore};
use crate::types::{Download, DownloadError, HeaderData, Segment, SegmentState};

const MAX_SEGMENTS: u32 = 8;
const SEGMENT_SIZE_DIVISOR: u64 = 50 * 1024 * 1024;
const RECOVERY_WAIT: Duration = Duration::from_secs(3);
/// The source's `Recovering` state has no maximum retry count. This bound
/// is an addition (see spec design notes): five attempts before giving up
/// and surfacing `RecoveryExhausted`.
const MAX_RECOVERY_ATTEMPTS: u32 = 5;
const PROGRESS_TICK: Duration = Duration::from_millis(200);

#[derive(Debug)]
enum Command {
    Pause,
    Cancel,
    SetSpeedCap(u64),
}

/// TLS and connection behavior. Verification is on by default; `insecure`
/// is an explicit opt-in for compatibility with origins presenting a bad
/// certificate chain.
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub insecure: bool,
}

/// A handle to a running or paused download. Operations are posted as
/// commands to the worker task rather than touching its state directly —
/// the worker is the sole owner of segments, handles, and the multiplexed
/// transfer pool.
pub struct Engine {
    id: String,
    cmd_tx: mpsc::Sender<Command>,
    worker: tokio::task::JoinHandle<()>,
}

impl Engine {
    /// Allocates an id, probes the URL, plans segments, persists state, and
    /// begins pumping. `idAssigned` fires before any network I/O.
    pub async fn start(
        url: String,
        output_dir: PathBuf,
        observer: Arc<dyn EngineObserver>,
        options: EngineOptions,
    ) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let store = StateStore::new().expect("scratch root available");
        let id_clone = id.clone();
        let worker = tokio::spawn(async move {
            run_fresh(id_clone, url, output_dir, store, observer, options, cmd_rx).await;
        });
        Self { id, cmd_tx, worker }
    }

    /// Loads persisted state for `id`, reconstructs segment layout,
    /// measures each scratch file's length as its `downloaded`, and resumes
    /// pumping only the segments that aren't already complete.
    pub async fn resume(id: String, observer: Arc<dyn EngineObserver>, options: EngineOptions) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let store = StateStore::new().expect("scratch root available");
        let id_clone = id.clone();
        let worker = tokio::spawn(async move {
            run_resumed(id_clone, store, observer, options, cmd_rx).await;
        });
        Self { id, cmd_tx, worker }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn pause(&self) {
        let _ = self.cmd_tx.send(Command::Pause).await;
    }

    pub async fn cancel(&self) {
        let _ = self.cmd_tx.send(Command::Cancel).await;
    }

    pub async fn set_speed_cap(&self, bytes_per_sec: u64) {
        let _ = self.cmd_tx.send(Command::SetSpeedCap(bytes_per_sec)).await;
    }

    /// Waits for the worker to reach a terminal state: paused, finished, or
    /// cancelled.
    pub async fn join(self) {
        let _ = self.worker.await;
    }

    /// Cancels a download that is currently `Suspended` by id, without
    /// resuming it first: no worker is spun up, no scratch file is reopened,
    /// no network request is made. Matches the `Suspended --cancel-->
    /// Terminated(Cancelled)` transition for downloads with no attached
    /// `Engine` handle.
    pub async fn cancel_suspended(id: &str) -> Result<(), DownloadError> {
        let store = StateStore::new().map_err(DownloadError::Disk)?;
        store.cancel_suspended(id).await
    }
}

fn build_client(options: &EngineOptions) -> Result<reqwest::Client, DownloadError> {
    reqwest::Client::builder()
        .danger_accept_invalid_certs(options.insecure)
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(DownloadError::Network)
}

fn plan_segment_count(resumable: bool, total_size: u64) -> u32 {
    if !resumable {
        return 1;
    }
    let by_size = 1 + (total_size / SEGMENT_SIZE_DIVISOR) as u32;
    by_size.min(MAX_SEGMENTS)
}

fn segment_range(ordinal_zero_based: u32, segment_count: u32, total_size: u64) -> (u64, u64) {
    let chunk = total_size / segment_count as u64;
    let start = ordinal_zero_based as u64 * chunk;
    let end = if ordinal_zero_based == segment_count - 1 {
        total_size - 1
    } else {
        (ordinal_zero_based as u64 + 1) * chunk - 1
    };
    (start, end)
}

async fn run_fresh(
    id: String,
    url: String,
    output_dir: PathBuf,
    store: StateStore,
    observer: Arc<dyn EngineObserver>,
    options: EngineOptions,
    cmd_rx: mpsc::Receiver<Command>,
) {
    observer.on_id_assigned(&id).await;
    observer.on_status_changed("Connecting...").await;

    let client = match build_client(&options) {
        Ok(c) => c,
        Err(_) => {
            observer
                .on_finished(false, DownloadError::InitFailed.user_message())
                .await;
            return;
        }
    };

    let probe_headers = HeaderData {
        url,
        headers: HashMap::new(),
    };

    let probe = match http::probe(&client, &probe_headers).await {
        Ok(p) => p,
        Err(_) => {
            observer
                .on_finished(false, DownloadError::ProbeFailed.user_message())
                .await;
            return;
        }
    };

    let total_size = match probe.resource_size {
        Some(n) if n > 0 => n,
        _ => {
            observer
                .on_finished(false, DownloadError::ProbeFailed.user_message())
                .await;
            return;
        }
    };

    let file_name = probe.attachment_name.unwrap_or_else(|| "download.bin".to_string());
    let segment_count = plan_segment_count(probe.resumable, total_size);

    let record = StateRecord {
        url: probe.final_uri.clone(),
        output_dir: output_dir.clone(),
        file_name: file_name.clone(),
        segment_count,
        total_size,
    };
    if store.save(&id, &record).await.is_err() {
        observer
            .on_finished(false, DownloadError::InitFailed.user_message())
            .await;
        return;
    }

    let mut segments = Vec::with_capacity(segment_count as usize);
    for i in 0..segment_count {
        let (start, end) = segment_range(i, segment_count, total_size);
        segments.push(Segment::new(i + 1, start, end, store.part_path(&id, i + 1)));
    }

    let header_data = Arc::new(HeaderData {
        url: probe.final_uri.clone(),
        headers: HashMap::new(),
    });

    observer
        .on_status_changed(&format!("Downloading with {segment_count} connections..."))
        .await;

    let download = Download {
        id,
        url: probe.final_uri,
        output_dir,
        file_name,
        total_size,
        segment_count,
        range_supported: probe.resumable,
        speed_cap: 0,
        bytes_at_session_start: 0,
    };

    run(download, segments, store, client, header_data, observer, cmd_rx).await;
}

async fn run_resumed(
    id: String,
    store: StateStore,
    observer: Arc<dyn EngineObserver>,
    options: EngineOptions,
    cmd_rx: mpsc::Receiver<Command>,
) {
    observer.on_id_assigned(&id).await;

    let record = match store.load(&id).await {
        Ok(r) => r,
        Err(_) => {
            observer
                .on_finished(false, DownloadError::StateMissing.user_message())
                .await;
            return;
        }
    };

    let client = match build_client(&options) {
        Ok(c) => c,
        Err(_) => {
            observer
                .on_finished(false, DownloadError::InitFailed.user_message())
                .await;
            return;
        }
    };

    let mut segments = Vec::with_capacity(record.segment_count as usize);
    let mut bytes_at_session_start = 0u64;
    for i in 0..record.segment_count {
        let (start, end) = segment_range(i, record.segment_count, record.total_size);
        let mut seg = Segment::new(i + 1, start, end, store.part_path(&id, i + 1));
        seg.downloaded = store.scratch_len(&id, i + 1).await.min(seg.size());
        bytes_at_session_start += seg.downloaded;
        if seg.is_complete() {
            seg.state = SegmentState::Finished;
        }
        segments.push(seg);
    }

    let header_data = Arc::new(HeaderData {
        url: record.url.clone(),
        headers: HashMap::new(),
    });

    observer.on_status_changed("Resumed").await;

    let download = Download {
        id,
        url: record.url,
        output_dir: record.output_dir,
        file_name: record.file_name,
        total_size: record.total_size,
        segment_count: record.segment_count,
        // The original always re-issues Range requests on resume, even for
        // a single segment that began life range-unsupported; a
        // non-compliant full-body reply is caught and capped by
        // `download_segment`.
        range_supported: true,
        speed_cap: 0,
        bytes_at_session_start,
    };

    run(download, segments, store, client, header_data, observer, cmd_rx).await;
}

async fn run(
    download: Download,
    mut segments: Vec<Segment>,
    store: StateStore,
    client: reqwest::Client,
    header_data: Arc<HeaderData>,
    observer: Arc<dyn EngineObserver>,
    mut cmd_rx: mpsc::Receiver<Command>,
) {
    let Download {
        id,
        total_size,
        file_name,
        output_dir,
        range_supported,
        bytes_at_session_start,
        speed_cap,
        ..
    } = download;

    let segment_count = segments.len() as u32;
    let engine_cap = Arc::new(AtomicU64::new(speed_cap));
    let mut recovery_attempts = 0u32;
    let session_start = Instant::now();

    loop {
        let cap_snapshot = engine_cap.load(Ordering::Relaxed);
        let per_segment_cap = if segment_count > 0 { cap_snapshot / segment_count as u64 } else { 0 };
        let cap_handles: Vec<SpeedCapHandle> = (0..segment_count)
            .map(|_| Arc::new(AtomicU64::new(per_segment_cap)))
            .collect();

        let counters: Arc<Vec<AtomicU64>> =
            Arc::new(segments.iter().map(|s| AtomicU64::new(s.downloaded)).collect());
        let segment_meta: Arc<Vec<(u32, u64, u64)>> =
            Arc::new(segments.iter().map(|s| (s.ordinal, s.start, s.size())).collect());
        let cancel_token = CancellationToken::new();

        let progress_handle = spawn_progress_timer(
            counters.clone(),
            segment_meta,
            total_size,
            bytes_at_session_start,
            session_start,
            observer.clone(),
        );

        let mut join_set = JoinSet::new();
        let mut pending = 0usize;
        for (idx, seg) in segments.iter().enumerate() {
            if seg.is_complete() {
                continue;
            }
            pending += 1;
            let seg = seg.clone();
            let client = client.clone();
            let header_data = header_data.clone();
            let cancel_token = cancel_token.clone();
            let cap_handle = cap_handles[idx].clone();
            let counters = counters.clone();
            join_set.spawn(async move {
                download_segment(seg, &client, &header_data, range_supported, cancel_token, cap_handle, move |n| {
                    counters[idx].fetch_add(n, Ordering::Relaxed);
                })
                .await
            });
        }

        let mut pump_error: Option<DownloadError> = None;
        let mut paused = false;
        let mut cancelled = false;

        while pending > 0 {
            tokio::select! {
                Some(cmd) = cmd_rx.recv() => {
                    match cmd {
                        Command::Pause => {
                            cancel_token.cancel();
                            paused = true;
                        }
                        Command::Cancel => {
                            cancel_token.cancel();
                            cancelled = true;
                        }
                        Command::SetSpeedCap(cap) => {
                            engine_cap.store(cap, Ordering::Relaxed);
                            let per = if segment_count > 0 { cap / segment_count as u64 } else { 0 };
                            for h in &cap_handles {
                                h.store(per, Ordering::Relaxed);
                            }
                        }
                    }
                }
                res = join_set.join_next(), if pending > 0 => {
                    pending -= 1;
                    match res {
                        Some(Ok(Ok(finished_seg))) => {
                            let idx = (finished_seg.ordinal - 1) as usize;
                            segments[idx] = finished_seg;
                        }
                        Some(Ok(Err(DownloadError::Cancelled))) => {}
                        Some(Ok(Err(e))) if pump_error.is_none() => {
                            pump_error = Some(e);
                        }
                        Some(Ok(Err(_))) => {}
                        Some(Err(_join_err)) if pump_error.is_none() => {
                            pump_error = Some(DownloadError::TransportError);
                        }
                        Some(Err(_join_err)) => {}
                        None => {}
                    }
                }
            }
        }

        progress_handle.abort();

        for seg in segments.iter_mut() {
            seg.downloaded = store.scratch_len(&id, seg.ordinal).await.min(seg.size());
        }

        if cancelled {
            store.cleanup(&id, segment_count).await;
            observer
                .on_finished(false, DownloadError::Cancelled.user_message())
                .await;
            return;
        }

        if paused {
            let record = StateRecord {
                url: header_data.url.clone(),
                output_dir,
                file_name,
                segment_count,
                total_size,
            };
            let _ = store.save(&id, &record).await;
            observer.on_status_changed("Paused").await;
            observer.on_paused().await;
            let total_downloaded: u64 = segments.iter().map(|s| s.downloaded).sum();
            let snapshot = ProgressSnapshot::compute(total_downloaded, total_size, bytes_at_session_start, Duration::from_secs(0));
            observer.on_progress(&snapshot).await;
            return;
        }

        // A disk/permission failure on a scratch file is not transient like
        // a dropped connection: retrying it wastes the recovery budget on
        // something that won't fix itself, so it's surfaced as fatal
        // immediately instead of being routed into `Recovering`.
        if let Some(DownloadError::Disk(_)) = &pump_error {
            observer
                .on_finished(false, DownloadError::FileAccessError.user_message())
                .await;
            return;
        }

        let total_downloaded: u64 = segments.iter().map(|s| s.downloaded).sum();
        let needs_recovery = pump_error.is_some() || total_downloaded < total_size;

        if !needs_recovery {
            finalize(&id, &file_name, &output_dir, &store, segment_count, &observer).await;
            return;
        }

        recovery_attempts += 1;
        if recovery_attempts > MAX_RECOVERY_ATTEMPTS {
            observer
                .on_finished(false, DownloadError::RecoveryExhausted.user_message())
                .await;
            return;
        }

        let status_text = match pump_error {
            Some(DownloadError::PollError) => "Network lost. Retrying...",
            Some(DownloadError::Stalled) => "Stream stalled. Retrying...",
            Some(_) => "Connection dropped. Retrying...",
            None => "Stream stalled. Retrying...",
        };
        observer.on_status_changed(status_text).await;
        tokio::time::sleep(RECOVERY_WAIT).await;
    }
}

async fn finalize(
    id: &str,
    file_name: &str,
    output_dir: &std::path::Path,
    store: &StateStore,
    segment_count: u32,
    observer: &Arc<dyn EngineObserver>,
) {
    observer.on_status_changed("Merging files...").await;

    match store.merge(id, output_dir, segment_count).await {
        Ok(merged_path) => {
            let target = output_dir.join(file_name);
            let _ = tokio::fs::remove_file(&target).await;
            match tokio::fs::rename(&merged_path, &target).await {
                Ok(()) => {
                    observer.on_finished(true, "Completed").await;
                }
                Err(_) => {
                    observer
                        .on_finished(false, DownloadError::MergeError.user_message())
                        .await;
                }
            }
        }
        Err(_) => {
            observer
                .on_finished(false, DownloadError::MergeError.user_message())
                .await;
        }
    }
}

fn spawn_progress_timer(
    counters: Arc<Vec<AtomicU64>>,
    segment_meta: Arc<Vec<(u32, u64, u64)>>,
    total_size: u64,
    bytes_at_session_start: u64,
    session_start: Instant,
    observer: Arc<dyn EngineObserver>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_TICK);
        loop {
            interval.tick().await;

            let downloaded: u64 = counters.iter().map(|c| c.load(Ordering::Relaxed)).sum();
            let snapshot = ProgressSnapshot::compute(
                downloaded,
                total_size,
                bytes_at_session_start,
                session_start.elapsed(),
            );
            observer.on_progress(&snapshot).await;

            let segs: Vec<SegmentSnapshot> = segment_meta
                .iter()
                .zip(counters.iter())
                .map(|((ordinal, start, size), c)| SegmentSnapshot {
                    ordinal: *ordinal,
                    downloaded: c.load(Ordering::Relaxed),
                    size: *size,
                    start_offset: *start,
                    total_file_size: total_size,
                })
                .collect();
            observer.on_segment_progress(&segs).await;
        }
    })
}
