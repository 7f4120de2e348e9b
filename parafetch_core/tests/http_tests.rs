use parafetch_core::http::{default_filename_for_mime, extract_filename, filename_from_url};

#[test]
fn quoted_filename() {
    assert_eq!(
        extract_filename("attachment; filename=\"report.pdf\""),
        Some("report.pdf".to_string())
    );
}

#[test]
fn unquoted_filename() {
    assert_eq!(
        extract_filename("attachment; filename=data.csv"),
        Some("data.csv".to_string())
    );
}

#[test]
fn trailing_params_are_ignored() {
    assert_eq!(
        extract_filename("attachment; filename=\"image.png\"; size=1024"),
        Some("image.png".to_string())
    );
}

#[test]
fn missing_filename() {
    assert_eq!(extract_filename("inline"), None);
}

#[test]
fn rfc5987_basic() {
    assert_eq!(
        extract_filename("attachment; filename*=UTF-8''My%20Video.mp4"),
        Some("My Video.mp4".to_string())
    );
}

#[test]
fn rfc5987_takes_priority_over_plain() {
    assert_eq!(
        extract_filename("attachment; filename=\"fallback.mp4\"; filename*=UTF-8''Better%20Name.mp4"),
        Some("Better Name.mp4".to_string())
    );
}

#[test]
fn rfc5987_lowercase_charset() {
    assert_eq!(
        extract_filename("attachment; filename*=utf-8''Report%202024.pdf"),
        Some("Report 2024.pdf".to_string())
    );
}

#[test]
fn rfc5987_percent_decoded_unicode() {
    assert_eq!(
        extract_filename("attachment; filename*=UTF-8''%C3%9Cn%C3%AF%63%C3%B6d%C3%A9.zip"),
        Some("Ünïcödé.zip".to_string())
    );
}

#[test]
fn filename_from_url_requires_extension() {
    assert_eq!(
        filename_from_url("http://h.example/path/file.zip"),
        Some("file.zip".to_string())
    );
    assert_eq!(filename_from_url("http://h.example/path/noext"), None);
}

#[test]
fn default_filename_from_mime() {
    assert_eq!(
        default_filename_for_mime(Some("video/mp4; charset=binary")),
        Some("download.mp4".to_string())
    );
    assert_eq!(default_filename_for_mime(Some("text/plain")), None);
}
