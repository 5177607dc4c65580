//! Byte pump for the transcode backend.
//!
//! Moves decoded PCM from the decoder's stdout to the player's stdin,
//! metering levels inline. Pre-fills a local cache before the first write
//! so playback starts with some slack against network jitter.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use pcm_meter::{LevelTap, rms_stereo};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{ChildStdin, ChildStdout};

use crate::process::ProcHandle;

/// Relay chunk size; 16 KiB is under 100ms of 44.1kHz stereo s16.
pub(crate) const CHUNK_BYTES: usize = 16 * 1024;
/// Bytes per second of 44.1kHz stereo s16 PCM.
pub(crate) const PCM_BYTES_PER_SEC: u64 = 176_400;
const PREFILL_DEADLINE: std::time::Duration = std::time::Duration::from_secs(10);
const READ_TIMEOUT: std::time::Duration = std::time::Duration::from_millis(500);
const WRITE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);
const EOF_SETTLE: std::time::Duration = std::time::Duration::from_millis(10);

/// Cache target for a given pre-play cache depth.
pub(crate) fn prefill_bytes(cache_secs: u32) -> u64 {
    u64::from(cache_secs) * PCM_BYTES_PER_SEC
}

pub(crate) struct PumpIo {
    pub(crate) source: ChildStdout,
    pub(crate) sink: ChildStdin,
}

/// Spawn the pump task. It exits when the stop flag clears, either side
/// of the pipe dies, or the decoder reaches end of stream; a broken data
/// path raises `dead` so the supervisor relaunches.
pub(crate) fn spawn_pump(
    io: PumpIo,
    decoder: ProcHandle,
    should_run: Arc<AtomicBool>,
    levels: Arc<LevelTap>,
    dead: Arc<AtomicBool>,
    cache_secs: u32,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        run_pump(io, decoder, should_run, levels, dead, cache_secs).await;
    })
}

async fn run_pump(
    mut io: PumpIo,
    decoder: ProcHandle,
    should_run: Arc<AtomicBool>,
    levels: Arc<LevelTap>,
    dead: Arc<AtomicBool>,
    cache_secs: u32,
) {
    let mut buf = vec![0u8; CHUNK_BYTES];
    let mut cache: Vec<u8> = Vec::new();
    let target = prefill_bytes(cache_secs);

    // Pre-fill phase: bounded by the cache target and a hard deadline.
    let deadline = tokio::time::Instant::now() + PREFILL_DEADLINE;
    while (cache.len() as u64) < target
        && should_run.load(Ordering::Relaxed)
        && tokio::time::Instant::now() < deadline
    {
        match tokio::time::timeout(READ_TIMEOUT, io.source.read(&mut buf)).await {
            Ok(Ok(0)) => {
                if !decoder.alive() {
                    break;
                }
                tokio::time::sleep(EOF_SETTLE).await;
            }
            Ok(Ok(n)) => cache.extend_from_slice(&buf[..n]),
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "pump read failed during pre-fill");
                break;
            }
            Err(_) => {
                if !decoder.alive() {
                    break;
                }
            }
        }
    }
    if !cache.is_empty() {
        tracing::debug!(cached_bytes = cache.len(), "pre-fill complete, starting relay");
    }

    // Relay phase: drain the cache first, then stream chunk by chunk.
    let mut offset = 0usize;
    loop {
        if !should_run.load(Ordering::Relaxed) {
            break;
        }
        let chunk: &[u8] = if offset < cache.len() {
            let end = (offset + CHUNK_BYTES).min(cache.len());
            let chunk = &cache[offset..end];
            offset = end;
            chunk
        } else {
            match tokio::time::timeout(READ_TIMEOUT, io.source.read(&mut buf)).await {
                Ok(Ok(0)) => {
                    if !decoder.alive() {
                        tracing::debug!("decoder reached end of stream");
                        break;
                    }
                    tokio::time::sleep(EOF_SETTLE).await;
                    continue;
                }
                Ok(Ok(n)) => &buf[..n],
                Ok(Err(err)) => {
                    tracing::debug!(error = %err, "pump read failed");
                    dead.store(true, Ordering::Relaxed);
                    break;
                }
                Err(_) => {
                    if !decoder.alive() {
                        break;
                    }
                    continue;
                }
            }
        };

        levels.store(rms_stereo(chunk));

        match tokio::time::timeout(WRITE_TIMEOUT, io.sink.write_all(chunk)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                tracing::debug!(error = %err, "pump write failed, player side gone");
                dead.store(true, Ordering::Relaxed);
                break;
            }
            // Player stalled; drop the chunk and re-check liveness.
            Err(_) => continue,
        }
    }

    let _ = io.sink.shutdown().await;
    levels.clear();
    tracing::debug!("pump finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[test]
    fn prefill_target_scales_with_cache_depth() {
        assert_eq!(prefill_bytes(0), 0);
        assert_eq!(prefill_bytes(1), 176_400);
        assert_eq!(prefill_bytes(3), 529_200);
    }

    fn piped(program: &str, args: &[&str], stdin: Stdio) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.stdin(stdin);
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::null());
        cmd
    }

    #[tokio::test]
    async fn pump_relays_bytes_and_meters_levels() {
        // Decoder stand-in: emits one second of full-scale square wave.
        let script = "for i in $(seq 1 44100); do printf '\\377\\177\\377\\177'; done";
        let decoder = ProcHandle::spawn(
            piped("sh", &["-c", script], Stdio::null()),
            "test-decoder",
        )
        .unwrap();

        // Player stand-in: counts bytes to a file-less sink via wc.
        let mut sink_cmd = Command::new("wc");
        sink_cmd.arg("-c");
        sink_cmd.stdin(Stdio::piped());
        sink_cmd.stdout(Stdio::piped());
        sink_cmd.stderr(Stdio::null());
        let player = ProcHandle::spawn(sink_cmd, "test-player").unwrap();

        let io = PumpIo {
            source: decoder.take_stdout().unwrap(),
            sink: player.take_stdin().unwrap(),
        };
        let should_run = Arc::new(AtomicBool::new(true));
        let levels = Arc::new(LevelTap::default());
        let dead = Arc::new(AtomicBool::new(false));

        let handle = spawn_pump(
            io,
            decoder.clone(),
            Arc::clone(&should_run),
            Arc::clone(&levels),
            Arc::clone(&dead),
            0,
        );
        tokio::time::timeout(std::time::Duration::from_secs(10), handle)
            .await
            .expect("pump should finish after decoder EOF")
            .unwrap();

        // Levels are cleared at pump exit; the data path never broke.
        assert!(!dead.load(Ordering::Relaxed));
        assert_eq!(levels.load(), pcm_meter::LevelSample::ZERO);

        let mut out = player.take_stdout().unwrap();
        let mut text = String::new();
        tokio::io::AsyncReadExt::read_to_string(&mut out, &mut text)
            .await
            .unwrap();
        assert_eq!(text.trim(), "176400");
    }

    #[tokio::test]
    async fn pump_stops_when_flag_clears() {
        // Endless decoder; the stop flag is the only way out.
        let decoder = ProcHandle::spawn(
            piped("sh", &["-c", "while :; do printf '\\000\\000\\000\\000'; sleep 0.01; done"], Stdio::null()),
            "test-decoder",
        )
        .unwrap();
        let player = ProcHandle::spawn(
            piped("cat", &[], Stdio::piped()),
            "test-player",
        )
        .unwrap();

        let io = PumpIo {
            source: decoder.take_stdout().unwrap(),
            sink: player.take_stdin().unwrap(),
        };
        let should_run = Arc::new(AtomicBool::new(true));
        let levels = Arc::new(LevelTap::default());
        let dead = Arc::new(AtomicBool::new(false));

        let handle = spawn_pump(
            io,
            decoder.clone(),
            Arc::clone(&should_run),
            Arc::clone(&levels),
            dead,
            0,
        );
        tokio::time::sleep(std::time::Duration::from_millis(200)).await;
        should_run.store(false, Ordering::Relaxed);
        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .expect("pump should exit promptly on stop")
            .unwrap();

        decoder.terminate();
        player.terminate();
    }
}
