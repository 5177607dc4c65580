//! Stream URL cleanup and playlist resolution.
//!
//! Incoming URLs may lack a scheme or point at an `.m3u`/`.m3u8` playlist
//! instead of the stream itself; both are fixed up before launch.

use anyhow::Context;

const PLAYLIST_FETCH_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(5);

/// Trim whitespace and prepend `http://` when no scheme is present.
pub(crate) fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    if has_scheme(trimmed) {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    }
}

fn has_scheme(url: &str) -> bool {
    let Some(idx) = url.find("://") else {
        return false;
    };
    let prefix = &url[..idx];
    let mut chars = prefix.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
}

/// Whether the URL looks like a playlist rather than a raw stream.
pub(crate) fn is_playlist_url(url: &str) -> bool {
    let lower = url.to_lowercase();
    let path = lower.split('?').next().unwrap_or(&lower);
    path.ends_with(".m3u") || path.contains(".m3u8")
}

/// Whether the URL hints at raw MP3 content. Used only to rank backend
/// strategies; never to rule one out.
pub(crate) fn is_mp3_like(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains(".mp3") || lower.contains("mp3stream")
}

/// Fetch a playlist and return the first stream entry, or the playlist URL
/// itself when nothing usable is found.
pub(crate) fn resolve_playlist(url: &str) -> anyhow::Result<String> {
    let mut resp = ureq::get(url)
        .config()
        .timeout_per_call(Some(PLAYLIST_FETCH_TIMEOUT))
        .build()
        .call()
        .with_context(|| format!("failed to fetch playlist: {url}"))?;
    let body = resp
        .body_mut()
        .read_to_string()
        .context("failed to read playlist body")?;
    Ok(first_playlist_entry(&body, url).unwrap_or_else(|| url.to_string()))
}

/// First non-comment line of an M3U body, resolved against the playlist URL
/// when the entry is relative.
pub(crate) fn first_playlist_entry(body: &str, base_url: &str) -> Option<String> {
    for line in body.lines() {
        let entry = line.trim();
        if entry.is_empty() || entry.starts_with('#') {
            continue;
        }
        if entry.starts_with("http://") || entry.starts_with("https://") {
            return Some(entry.to_string());
        }
        return Some(join_relative(base_url, entry));
    }
    None
}

fn join_relative(base_url: &str, entry: &str) -> String {
    let dir = match base_url.rfind('/') {
        // Keep the authority intact when the URL has no path.
        Some(idx) if idx > base_url.find("://").map(|i| i + 2).unwrap_or(0) => &base_url[..idx],
        _ => base_url,
    };
    format!("{}/{}", dir.trim_end_matches('/'), entry.trim_start_matches('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_missing_scheme() {
        assert_eq!(
            normalize_url("  radio.example/stream  "),
            "http://radio.example/stream"
        );
        assert_eq!(
            normalize_url("https://radio.example/stream"),
            "https://radio.example/stream"
        );
        assert_eq!(normalize_url("rtsp://cam.example/feed"), "rtsp://cam.example/feed");
    }

    #[test]
    fn scheme_detection_rejects_bad_prefixes() {
        assert_eq!(normalize_url("1abc://x"), "http://1abc://x");
        assert_eq!(normalize_url("host:8000/stream"), "http://host:8000/stream");
    }

    #[test]
    fn playlist_urls_are_detected() {
        assert!(is_playlist_url("http://r.example/list.m3u"));
        assert!(is_playlist_url("http://r.example/list.M3U"));
        assert!(is_playlist_url("http://r.example/live.m3u8?token=1"));
        assert!(!is_playlist_url("http://r.example/stream.mp3"));
    }

    #[test]
    fn mp3_hint_matches_common_patterns() {
        assert!(is_mp3_like("http://r.example/stream.mp3"));
        assert!(is_mp3_like("http://r.example/MP3Stream"));
        assert!(!is_mp3_like("http://r.example/stream.aac"));
    }

    #[test]
    fn playlist_body_yields_first_entry() {
        let body = "#EXTM3U\n#EXTINF:-1,Radio\nhttp://r.example/live\nhttp://r.example/backup\n";
        assert_eq!(
            first_playlist_entry(body, "http://r.example/list.m3u"),
            Some("http://r.example/live".to_string())
        );
    }

    #[test]
    fn relative_entry_is_joined_to_playlist_dir() {
        let body = "#EXTM3U\nlive/stream\n";
        assert_eq!(
            first_playlist_entry(body, "http://r.example/lists/main.m3u"),
            Some("http://r.example/lists/live/stream".to_string())
        );
    }

    #[test]
    fn empty_playlist_yields_none() {
        assert_eq!(first_playlist_entry("#EXTM3U\n\n# only comments\n", "http://x"), None);
    }
}
