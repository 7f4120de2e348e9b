use reqwest::Client;

use crate::types::{DownloadError, HeaderData, ProbeResult};

/// Applies the caller's custom headers to a request builder. Skips `Range`
/// — the engine sets its own per segment/probe, and a caller-supplied Range
/// would create a duplicate, causing the server to return the wrong bytes.
fn apply_headers(
    mut builder: reqwest::RequestBuilder,
    header_data: &HeaderData,
) -> reqwest::RequestBuilder {
    for (key, values) in &header_data.headers {
        if key.eq_ignore_ascii_case("range") {
            continue;
        }
        for value in values {
            builder = builder.header(key, value);
        }
    }
    builder
}

/// Probes the URL with a no-body request, following redirects, to determine
/// total size, range support, and a suggested file name. Does not download
/// any bytes — the response body is dropped unread.
pub async fn probe(client: &Client, header_data: &HeaderData) -> Result<ProbeResult, DownloadError> {
    let builder = client.head(&header_data.url);
    let builder = apply_headers(builder, header_data).timeout(std::time::Duration::from_secs(10));

    let response = builder.send().await?;

    let resource_size = response
        .headers()
        .get("content-length")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.parse::<u64>().ok());

    let resumable = response
        .headers()
        .get("accept-ranges")
        .and_then(|v| v.to_str().ok())
        .map(|s| !s.eq_ignore_ascii_case("none"))
        .unwrap_or(false);

    let content_type = response
        .headers()
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let attachment_name = response
        .headers()
        .get("content-disposition")
        .and_then(|v| v.to_str().ok())
        .and_then(extract_filename)
        .or_else(|| filename_from_url(response.url().as_str()))
        .or_else(|| default_filename_for_mime(content_type.as_deref()));

    let final_uri = response.url().to_string();

    Ok(ProbeResult {
        resumable,
        resource_size,
        final_uri,
        attachment_name,
        content_type,
    })
}

/// Last-path-segment fallback, used only when Content-Disposition is absent.
pub fn filename_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let name = path.rsplit('/').find(|s| !s.is_empty())?;
    if name.contains('.') {
        Some(name.to_string())
    } else {
        None
    }
}

/// Content-type-derived default name, used only when neither
/// Content-Disposition nor the URL path yields a name.
pub fn default_filename_for_mime(content_type: Option<&str>) -> Option<String> {
    let mime = content_type?.split(';').next()?.trim().to_lowercase();
    let name = match mime.as_str() {
        "application/pdf" => "download.pdf",
        "application/zip" => "download.zip",
        m if m.starts_with("video/") => "download.mp4",
        m if m.starts_with("audio/") => "download.mp3",
        m if m.starts_with("image/") => "download.jpg",
        _ => return None,
    };
    Some(name.to_string())
}

/// Extract the filename from a `Content-Disposition` header value.
///
/// Handles both the plain `filename=` form and the RFC 5987 `filename*=`
/// extended form (e.g. `filename*=UTF-8''My%20File.mp4`). The RFC 5987 form
/// takes priority when both are present.
pub fn extract_filename(disposition: &str) -> Option<String> {
    extract_filename_star(disposition).or_else(|| extract_filename_plain(disposition))
}

fn extract_filename_star(disposition: &str) -> Option<String> {
    let lower = disposition.to_lowercase();
    let key = "filename*=";
    let idx = lower.find(key)?;
    let rest = &disposition[idx + key.len()..];
    let rest = rest.split(';').next().unwrap_or(rest).trim();

    let after_charset = rest
        .strip_prefix("UTF-8''")
        .or_else(|| rest.strip_prefix("utf-8''"))?;

    Some(percent_decode(after_charset))
}

fn percent_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    let mut pending: Vec<u8> = Vec::new();

    while let Some(c) = chars.next() {
        if c == '%' {
            let h1 = chars.next();
            let h2 = chars.next();
            if let (Some(h1), Some(h2)) = (h1, h2) {
                let hex = format!("{}{}", h1, h2);
                if let Ok(byte) = u8::from_str_radix(&hex, 16) {
                    pending.push(byte);
                    continue;
                }
            }
            flush_pending(&mut pending, &mut out);
            out.push('%');
            if let Some(h1) = h1 {
                out.push(h1);
            }
            if let Some(h2) = h2 {
                out.push(h2);
            }
        } else {
            flush_pending(&mut pending, &mut out);
            out.push(c);
        }
    }
    flush_pending(&mut pending, &mut out);
    out
}

fn flush_pending(pending: &mut Vec<u8>, out: &mut String) {
    if pending.is_empty() {
        return;
    }
    match std::str::from_utf8(pending) {
        Ok(s) => out.push_str(s),
        Err(_) => out.push('\u{FFFD}'),
    }
    pending.clear();
}

fn extract_filename_plain(disposition: &str) -> Option<String> {
    let lower = disposition.to_lowercase();
    let key = "filename=";
    let idx = lower.find(key)?;
    let start = idx + key.len();
    let slice = &disposition[start..];
    let end = slice.find(';').unwrap_or(slice.len());
    let raw = slice[..end].trim().trim_matches('"');
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}
