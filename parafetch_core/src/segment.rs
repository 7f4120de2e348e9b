use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::types::{DownloadError, HeaderData, Segment, SegmentState};

const MAX_RETRIES: usize = 3;

/// Shared, live-adjustable speed cap for one segment, in bytes/sec. `0`
/// means unlimited. `Engine::set_speed_cap` mutates this directly so a
/// running transfer picks up the new cap on its next sleep window.
pub type SpeedCapHandle = Arc<AtomicU64>;

/// Downloads one segment: the absolute range `[segment.start + downloaded,
/// segment.end]` for a resumable download, or the whole body when
/// `range_supported` is false (segment 1 of 1).
///
/// The write callback is the only place `downloaded` advances: bytes are
/// appended to the scratch file and, only if the full write succeeded, the
/// counter increments. A short write aborts the transfer.
pub async fn download_segment(
    mut segment: Segment,
    client: &Client,
    header_data: &Arc<HeaderData>,
    range_supported: bool,
    cancel_token: CancellationToken,
    speed_cap: SpeedCapHandle,
    on_progress: impl Fn(u64),
) -> Result<Segment, DownloadError> {
    let mut retries = 0;
    segment.state = SegmentState::Downloading;

    loop {
        if cancel_token.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let mut builder = client.get(&header_data.url);
        for (key, values) in &header_data.headers {
            if key.eq_ignore_ascii_case("range") {
                continue;
            }
            for value in values {
                builder = builder.header(key, value);
            }
        }

        if range_supported {
            let start = segment.start + segment.downloaded;
            builder = builder.header("Range", format!("bytes={}-{}", start, segment.end));
        }

        match builder.send().await {
            Ok(response) => {
                let status = response.status();

                // A ranged request answered with a full-content response is
                // only acceptable for the single-segment, range-unsupported
                // path; anything else means the server ignored our Range
                // header and would otherwise inflate the assembled file.
                if range_supported && status == reqwest::StatusCode::OK {
                    log::error!(
                        "[segment {}] server returned 200 to a ranged request; capping writes to {} bytes",
                        segment.ordinal,
                        segment.size()
                    );
                }

                let file = if segment.downloaded > 0 {
                    tokio::fs::OpenOptions::new()
                        .append(true)
                        .open(&segment.path)
                        .await
                        .map_err(DownloadError::Disk)?
                } else {
                    tokio::fs::File::create(&segment.path)
                        .await
                        .map_err(DownloadError::Disk)?
                };
                let mut writer = tokio::io::BufWriter::with_capacity(256 * 1024, file);

                let remaining = segment.size() - segment.downloaded;
                let mut bytes_written: u64 = 0;
                let mut window_started = tokio::time::Instant::now();
                let mut window_bytes: u64 = 0;

                let mut stream = response.bytes_stream();
                let mut stream_error = false;

                while let Some(chunk_result) = stream.next().await {
                    if cancel_token.is_cancelled() {
                        let _ = writer.flush().await;
                        return Err(DownloadError::Cancelled);
                    }

                    match chunk_result {
                        Ok(chunk) => {
                            let to_write: &[u8] = if range_supported {
                                let left = remaining - bytes_written;
                                let usable = (chunk.len() as u64).min(left);
                                &chunk[..usable as usize]
                            } else {
                                &chunk[..]
                            };

                            if to_write.is_empty() {
                                break;
                            }

                            let written_len = to_write.len() as u64;
                            writer
                                .write_all(to_write)
                                .await
                                .map_err(DownloadError::Disk)?;

                            bytes_written += written_len;
                            segment.downloaded += written_len;
                            on_progress(written_len);

                            throttle(speed_cap.as_ref(), &mut window_started, &mut window_bytes, written_len).await;

                            if range_supported && bytes_written >= remaining {
                                break;
                            }
                        }
                        Err(_e) => {
                            let _ = writer.flush().await;
                            stream_error = true;
                            break;
                        }
                    }
                }

                if stream_error {
                    retries += 1;
                    if retries >= MAX_RETRIES {
                        segment.state = SegmentState::Failed;
                        return Err(DownloadError::MaxRetryExceeded);
                    }
                    backoff(retries).await;
                    continue;
                }

                writer.flush().await.map_err(DownloadError::Disk)?;
                segment.state = SegmentState::Finished;
                return Ok(segment);
            }
            Err(_e) => {
                retries += 1;
                if retries >= MAX_RETRIES {
                    segment.state = SegmentState::Failed;
                    return Err(DownloadError::MaxRetryExceeded);
                }
                backoff(retries).await;
            }
        }
    }
}

async fn backoff(retries: usize) {
    let delay_ms = 100u64 * (1u64 << retries.min(5));
    tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
}

/// Simple windowed throttle: once the bytes written in the current
/// 100ms window exceed this segment's share of the cap, sleep out the
/// rest of the window before accepting more data.
async fn throttle(
    cap: &AtomicU64,
    window_started: &mut tokio::time::Instant,
    window_bytes: &mut u64,
    just_written: u64,
) {
    let cap = cap.load(Ordering::Relaxed);
    if cap == 0 {
        return;
    }

    *window_bytes += just_written;
    let window = std::time::Duration::from_millis(100);
    let budget = (cap as f64 * window.as_secs_f64()) as u64;

    if *window_bytes >= budget.max(1) {
        let elapsed = window_started.elapsed();
        if elapsed < window {
            tokio::time::sleep(window - elapsed).await;
        }
        *window_started = tokio::time::Instant::now();
        *window_bytes = 0;
    }
}
