//! Loopback level metering for pipelines the server cannot tap inline.
//!
//! Records short PCM snippets with `arecord` and folds them into the shared
//! level tap. Capture hardware on these boards is flaky, so the task keeps
//! counters and switches to a detected fallback device when reads go quiet.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pcm_meter::{LevelSample, LevelTap, rms_stereo};
use tokio::process::Command;

use crate::devices;

/// 0.1s of 44.1kHz stereo.
const SNIPPET_FRAMES: u32 = 4410;
const SNIPPET_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(800);
const OK_INTERVAL: std::time::Duration = std::time::Duration::from_millis(100);
const EMPTY_INTERVAL: std::time::Duration = std::time::Duration::from_millis(150);
const ERROR_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

/// Consecutive empty snippets before trying another capture device.
pub(crate) const EMPTY_READS_BEFORE_FALLBACK: u32 = 10;
/// Consecutive hard errors before trying another capture device.
pub(crate) const HARD_ERRORS_BEFORE_FALLBACK: u32 = 3;

/// Spawn the capture meter task for a pipeline playing on `output_device`.
pub(crate) fn spawn_capture_meter(
    output_device: String,
    levels: Arc<LevelTap>,
    stop: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut device = match capture_device_for_output(&output_device) {
            Some(dev) => dev,
            None => devices::default_capture_device().await,
        };
        tracing::debug!(device = %device, "capture meter started");

        let mut empty_reads = 0u32;
        let mut hard_errors = 0u32;
        loop {
            if stop.load(Ordering::Relaxed) {
                break;
            }
            match record_snippet(&device).await {
                SnippetResult::Pcm(chunk) => {
                    levels.store(rms_stereo(&chunk));
                    empty_reads = 0;
                    hard_errors = 0;
                    tokio::time::sleep(OK_INTERVAL).await;
                }
                SnippetResult::Empty => {
                    levels.store(LevelSample::ZERO);
                    empty_reads += 1;
                    tokio::time::sleep(EMPTY_INTERVAL).await;
                }
                SnippetResult::Error => {
                    levels.store(LevelSample::ZERO);
                    hard_errors += 1;
                    tokio::time::sleep(ERROR_INTERVAL).await;
                }
            }
            if empty_reads >= EMPTY_READS_BEFORE_FALLBACK
                || hard_errors >= HARD_ERRORS_BEFORE_FALLBACK
            {
                let fallback = devices::default_capture_device().await;
                if fallback != device {
                    tracing::info!(from = %device, to = %fallback, "switching capture device");
                    device = fallback;
                }
                empty_reads = 0;
                hard_errors = 0;
            }
        }
        levels.clear();
        tracing::debug!("capture meter stopped");
    })
}

/// Capture side of an output device string: `plughw:N,M` and `hw:N,M`
/// map onto the same card's capture interface. Anything else means the
/// detected default should be used.
pub(crate) fn capture_device_for_output(output_device: &str) -> Option<String> {
    let rest = output_device
        .strip_prefix("plughw:")
        .or_else(|| output_device.strip_prefix("hw:"))?;
    let mut parts = rest.splitn(2, ',');
    let card = parts.next()?.trim();
    if card.is_empty() {
        return None;
    }
    let dev = parts.next().unwrap_or("0").trim();
    Some(format!("hw:{card},{dev}"))
}

enum SnippetResult {
    Pcm(Vec<u8>),
    Empty,
    Error,
}

async fn record_snippet(device: &str) -> SnippetResult {
    let mut cmd = Command::new("arecord");
    cmd.args(["-q", "-f", "S16_LE", "-r", "44100", "-c", "2", "-t", "raw"]);
    cmd.arg("-D").arg(device);
    cmd.arg("-s").arg(SNIPPET_FRAMES.to_string());
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::null());
    match tokio::time::timeout(SNIPPET_TIMEOUT, cmd.output()).await {
        Ok(Ok(out)) if out.status.success() && out.stdout.len() >= 4 => {
            SnippetResult::Pcm(out.stdout)
        }
        Ok(Ok(_)) => SnippetResult::Empty,
        Ok(Err(_)) | Err(_) => SnippetResult::Error,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_device_maps_to_same_card_capture() {
        assert_eq!(
            capture_device_for_output("plughw:1,0"),
            Some("hw:1,0".to_string())
        );
        assert_eq!(
            capture_device_for_output("hw:2,1"),
            Some("hw:2,1".to_string())
        );
        assert_eq!(
            capture_device_for_output("plughw:3"),
            Some("hw:3,0".to_string())
        );
    }

    #[test]
    fn unknown_outputs_defer_to_detection() {
        assert_eq!(capture_device_for_output("default"), None);
        assert_eq!(capture_device_for_output(""), None);
        assert_eq!(capture_device_for_output("hw:"), None);
    }
}
