//! Backend launch strategies.
//!
//! Three ways to turn a stream URL into audio on an ALSA device, tried in
//! order until one sticks:
//!
//! 1. managed player (`cvlc`): best buffering, handles any codec itself
//! 2. transcode (`ffmpeg` piped through the server into `aplay`): decodes
//!    anything and gives us the PCM for inline level metering
//! 3. mp3-direct (`mpg123` piped OS-level into `aplay`, optional `sox`
//!    gain stage): lightest option for plain MP3 streams
//!
//! An MP3-looking URL promotes mp3-direct above transcode in the ranking;
//! it never removes a strategy from the list.

use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use pcm_meter::LevelTap;
use tokio::process::Command;

use crate::capture;
use crate::devices;
use crate::error::{self, PlayerError};
use crate::pipeline::{BackendKind, PipelineHandle};
use crate::process::{self, ProcHandle};
use crate::pump::{self, PumpIo};

/// How long piped backends get to prove both legs stay up.
const PIPE_STARTUP_GRACE: std::time::Duration = std::time::Duration::from_millis(1500);

/// ALSA period size in frames; 1024 frames is roughly 23ms at 44.1kHz.
const APLAY_PERIOD_FRAMES: u32 = 1024;

/// Everything a launch needs to know, already normalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PlaybackRequest {
    pub url: String,
    /// Resolved at launch when empty.
    pub output_device: String,
    pub volume: u8,
    pub buffer_secs: u32,
    pub playback_cache_secs: u32,
}

/// Strategies in preference order for a given URL.
pub(crate) fn candidate_backends(url: &str) -> Vec<BackendKind> {
    if crate::stream_url::is_mp3_like(url) {
        vec![
            BackendKind::Managed,
            BackendKind::Mp3Direct,
            BackendKind::Transcode,
        ]
    } else {
        vec![
            BackendKind::Managed,
            BackendKind::Transcode,
            BackendKind::Mp3Direct,
        ]
    }
}

/// Network buffer depth in milliseconds for the managed player.
pub(crate) fn network_cache_ms(buffer_secs: u32) -> u32 {
    (buffer_secs * 1000).clamp(5_000, 120_000)
}

/// Pre-play buffer in milliseconds for the managed player.
pub(crate) fn live_cache_ms(buffer_secs: u32, cache_secs: u32) -> u32 {
    ((buffer_secs + cache_secs) * 1000).clamp(10_000, 120_000)
}

/// File cache stays ahead of the network cache.
pub(crate) fn file_cache_ms(network_ms: u32) -> u32 {
    network_ms * 2
}

/// Map 0..=100 volume onto the managed player's 0..=256 scale.
pub(crate) fn native_volume(volume: u8) -> u32 {
    let scaled = (f64::from(volume) * 2.56).round();
    (scaled as u32).min(256)
}

/// How long the managed player gets to fill its pre-play buffer before
/// liveness is judged: at least 5s, at least half the live cache.
pub(crate) fn startup_grace(live_cache_ms: u32) -> std::time::Duration {
    let secs = f64::max(5.0, f64::from(live_cache_ms) / 1000.0 * 0.5);
    std::time::Duration::from_secs_f64(secs)
}

/// MP3 decoder buffer size in bytes of decoded PCM.
pub(crate) fn pcm_buffer_bytes(buffer_secs: u32) -> u64 {
    (u64::from(buffer_secs) * pump::PCM_BYTES_PER_SEC).clamp(4_096, 1_048_576)
}

/// Render a byte count the way ffmpeg's `-bufsize` wants it.
pub(crate) fn bufsize_arg(bytes: u64) -> String {
    if bytes < 1_024 {
        format!("{bytes}B")
    } else if bytes < 1_048_576 {
        format!("{}k", bytes / 1_024)
    } else {
        format!("{}M", bytes / 1_048_576)
    }
}

/// ALSA buffer size in frames for the transcode writer.
pub(crate) fn aplay_buffer_frames(buffer_secs: u32) -> u32 {
    (buffer_secs * 44_100)
        .max(APLAY_PERIOD_FRAMES * 4)
        .clamp(APLAY_PERIOD_FRAMES * 4, 131_072)
}

/// Software gain factor for the sox stage.
pub(crate) fn gain_factor(volume: u8) -> f64 {
    f64::from(volume) / 100.0
}

enum AttemptFailure {
    /// Required executable not on `$PATH`.
    Unavailable(&'static str),
    Failed(String),
}

type Attempt = Result<PipelineHandle, AttemptFailure>;

/// Launches pipelines and wires their metering to the shared level tap.
pub(crate) struct Launcher {
    should_run: Arc<AtomicBool>,
    levels: Arc<LevelTap>,
}

impl Launcher {
    pub(crate) fn new(should_run: Arc<AtomicBool>, levels: Arc<LevelTap>) -> Self {
        Launcher { should_run, levels }
    }

    /// Try every candidate strategy in order. The classified error reflects
    /// the last real failure, or `BackendUnavailable` when nothing could
    /// even be attempted.
    pub(crate) async fn launch(&self, req: &PlaybackRequest) -> Result<PipelineHandle, PlayerError> {
        let device = if req.output_device.is_empty() {
            devices::default_playback_device().await
        } else {
            req.output_device.clone()
        };

        let mut attempted = false;
        let mut last_detail = String::new();
        for kind in candidate_backends(&req.url) {
            let result = match kind {
                BackendKind::Managed => self.start_managed(req, &device).await,
                BackendKind::Transcode => self.start_transcode(req, &device).await,
                BackendKind::Mp3Direct => self.start_mp3_direct(req, &device).await,
            };
            match result {
                Ok(pipeline) => {
                    tracing::info!(
                        backend = %kind,
                        url = %req.url,
                        device = %device,
                        "playback pipeline started"
                    );
                    return Ok(pipeline);
                }
                Err(AttemptFailure::Unavailable(tool)) => {
                    tracing::debug!(backend = %kind, tool, "backend unavailable, skipping");
                }
                Err(AttemptFailure::Failed(detail)) => {
                    tracing::warn!(backend = %kind, detail = %detail, "backend failed to start");
                    attempted = true;
                    last_detail = detail;
                }
            }
        }

        if attempted {
            Err(error::classify_launch_failure(&last_detail))
        } else {
            Err(PlayerError::BackendUnavailable)
        }
    }

    async fn start_managed(&self, req: &PlaybackRequest, device: &str) -> Attempt {
        let Some(cvlc) = process::find_executable("cvlc") else {
            return Err(AttemptFailure::Unavailable("cvlc"));
        };
        devices::set_mixer_full(device).await;

        let network_ms = network_cache_ms(req.buffer_secs);
        let live_ms = live_cache_ms(req.buffer_secs, req.playback_cache_secs);
        let file_ms = file_cache_ms(network_ms);

        let mut cmd = Command::new(cvlc);
        cmd.args(["--intf", "dummy", "--no-video", "--quiet", "--aout", "alsa"]);
        cmd.arg(format!("--alsa-audio-device={device}"));
        cmd.arg("--volume").arg(native_volume(req.volume).to_string());
        cmd.arg(format!("--network-caching={network_ms}"));
        cmd.arg(format!("--file-caching={file_ms}"));
        cmd.arg(format!("--live-caching={live_ms}"));
        cmd.args(["--http-continuous", "--http-forward-cookies"]);
        cmd.args(["--http-reconnect-delay", "2", "--http-reconnect"]);
        cmd.args(["--audio-resampler", "src"]);
        cmd.args(["--audio-filter", "normvol", "--norm-max-level", "1.0"]);
        cmd.args(["--network-timeout", "10000"]);
        cmd.args(["--no-sout-rtp-sap", "--no-sout-standard-sap", "--ttl=1"]);
        cmd.arg(&req.url);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::null());
        cmd.stderr(Stdio::piped());

        let player = spawn_leg(cmd, "cvlc")?;

        let grace = startup_grace(live_ms);
        tracing::info!(
            grace_secs = grace.as_secs_f64(),
            live_cache_ms = live_ms,
            "waiting for managed player to fill its buffer"
        );
        tokio::time::sleep(grace).await;

        if let Some(status) = player.exit_status() {
            let snippet = player.stderr_snippet().await;
            player.terminate();
            return Err(AttemptFailure::Failed(format!(
                "managed player exited during startup ({status}): {snippet}"
            )));
        }

        let pipeline = PipelineHandle::new(BackendKind::Managed, vec![player]);
        capture::spawn_capture_meter(
            device.to_string(),
            Arc::clone(&self.levels),
            pipeline.meter_stop_flag(),
        );
        Ok(pipeline)
    }

    async fn start_transcode(&self, req: &PlaybackRequest, device: &str) -> Attempt {
        let Some(ffmpeg) = process::find_executable("ffmpeg") else {
            return Err(AttemptFailure::Unavailable("ffmpeg"));
        };
        let Some(aplay) = process::find_executable("aplay") else {
            return Err(AttemptFailure::Unavailable("aplay"));
        };
        devices::set_mixer_full(device).await;

        let buffer_bytes = u64::from(req.buffer_secs) * pump::PCM_BYTES_PER_SEC;
        let mut decoder_cmd = Command::new(ffmpeg);
        decoder_cmd.args(["-nostdin", "-vn"]);
        decoder_cmd.args(["-reconnect", "1", "-reconnect_at_eof", "1"]);
        decoder_cmd.args(["-reconnect_streamed", "1", "-reconnect_delay_max", "5"]);
        decoder_cmd.args(["-fflags", "+genpts+discardcorrupt"]);
        decoder_cmd.args(["-err_detect", "ignore_err"]);
        decoder_cmd.arg("-i").arg(&req.url);
        decoder_cmd.args(["-f", "s16le", "-ac", "2", "-ar", "44100"]);
        decoder_cmd.arg("-bufsize").arg(bufsize_arg(buffer_bytes));
        decoder_cmd.args(["-max_delay", "500000", "pipe:1"]);
        decoder_cmd.stdin(Stdio::null());
        decoder_cmd.stdout(Stdio::piped());
        decoder_cmd.stderr(Stdio::piped());
        let decoder = spawn_leg(decoder_cmd, "ffmpeg")?;

        let mut writer_cmd = Command::new(aplay);
        writer_cmd.arg("-D").arg(device);
        writer_cmd.args(["-f", "cd", "-c", "2", "-r", "44100"]);
        writer_cmd
            .arg("-B")
            .arg(aplay_buffer_frames(req.buffer_secs).to_string());
        writer_cmd.arg("-F").arg(APLAY_PERIOD_FRAMES.to_string());
        writer_cmd.stdin(Stdio::piped());
        writer_cmd.stdout(Stdio::null());
        writer_cmd.stderr(Stdio::null());
        let writer = spawn_leg(writer_cmd, "aplay")?;

        let io = PumpIo {
            source: decoder
                .take_stdout()
                .ok_or_else(|| AttemptFailure::Failed("decoder stdout missing".to_string()))?,
            sink: writer
                .take_stdin()
                .ok_or_else(|| AttemptFailure::Failed("player stdin missing".to_string()))?,
        };

        let pipeline =
            PipelineHandle::new(BackendKind::Transcode, vec![decoder.clone(), writer]);
        pump::spawn_pump(
            io,
            decoder.clone(),
            Arc::clone(&self.should_run),
            Arc::clone(&self.levels),
            pipeline.pump_dead_flag(),
            req.playback_cache_secs,
        );

        tokio::time::sleep(PIPE_STARTUP_GRACE).await;
        if let Some((leg, status)) = pipeline.dead_leg() {
            let snippet = decoder.stderr_snippet().await;
            pipeline.teardown().await;
            return Err(AttemptFailure::Failed(format!(
                "{leg} exited during startup ({status:?}): {snippet}"
            )));
        }
        Ok(pipeline)
    }

    async fn start_mp3_direct(&self, req: &PlaybackRequest, device: &str) -> Attempt {
        let Some(mpg123) = process::find_executable("mpg123") else {
            return Err(AttemptFailure::Unavailable("mpg123"));
        };
        let Some(aplay) = process::find_executable("aplay") else {
            return Err(AttemptFailure::Unavailable("aplay"));
        };

        let mut decoder_cmd = Command::new(mpg123);
        // JACK autodetection stalls mpg123 on headless boards.
        decoder_cmd.env_remove("JACK_PROMISCUOUS_SERVER");
        decoder_cmd.env_remove("JACK_DEFAULT_SERVER");
        decoder_cmd.args(["-q", "-s", "-b"]);
        decoder_cmd.arg(pcm_buffer_bytes(req.buffer_secs).to_string());
        decoder_cmd.arg(&req.url);
        decoder_cmd.stdin(Stdio::null());
        decoder_cmd.stdout(Stdio::piped());
        decoder_cmd.stderr(Stdio::piped());
        let decoder = spawn_leg(decoder_cmd, "mpg123")?;

        let mut legs = vec![decoder.clone()];
        let mut upstream = decoder
            .take_stdout()
            .ok_or_else(|| AttemptFailure::Failed("decoder stdout missing".to_string()))?;

        // Optional software gain stage; full volume pipes straight through.
        if req.volume < 100 {
            if let Some(sox) = process::find_executable("sox") {
                let mut gain_cmd = Command::new(sox);
                gain_cmd.args(["-t", "raw", "-r", "44100", "-c", "2"]);
                gain_cmd.args(["-b", "16", "-e", "signed-integer", "-"]);
                gain_cmd.args(["-t", "raw", "-r", "44100", "-c", "2"]);
                gain_cmd.args(["-b", "16", "-e", "signed-integer", "-"]);
                gain_cmd.arg("vol").arg(gain_factor(req.volume).to_string());
                gain_cmd.stdin(into_stdio(upstream)?);
                gain_cmd.stdout(Stdio::piped());
                gain_cmd.stderr(Stdio::null());
                let gain = spawn_leg(gain_cmd, "sox")?;
                upstream = gain
                    .take_stdout()
                    .ok_or_else(|| AttemptFailure::Failed("gain stdout missing".to_string()))?;
                legs.push(gain);
            }
        }

        let mut writer_cmd = Command::new(aplay);
        writer_cmd.arg("-D").arg(device);
        writer_cmd.args(["-f", "cd", "-c", "2", "-r", "44100"]);
        writer_cmd
            .arg("-B")
            .arg((APLAY_PERIOD_FRAMES * 4).to_string());
        writer_cmd.arg("-F").arg(APLAY_PERIOD_FRAMES.to_string());
        writer_cmd.stdin(into_stdio(upstream)?);
        writer_cmd.stdout(Stdio::null());
        writer_cmd.stderr(Stdio::null());
        legs.push(spawn_leg(writer_cmd, "aplay")?);

        let pipeline = PipelineHandle::new(BackendKind::Mp3Direct, legs);

        tokio::time::sleep(PIPE_STARTUP_GRACE).await;
        if let Some((leg, status)) = pipeline.dead_leg() {
            let snippet = decoder.stderr_snippet().await;
            pipeline.teardown().await;
            return Err(AttemptFailure::Failed(format!(
                "{leg} exited during startup ({status:?}): {snippet}"
            )));
        }

        capture::spawn_capture_meter(
            device.to_string(),
            Arc::clone(&self.levels),
            pipeline.meter_stop_flag(),
        );
        Ok(pipeline)
    }
}

fn spawn_leg(cmd: Command, name: &'static str) -> Result<ProcHandle, AttemptFailure> {
    ProcHandle::spawn(cmd, name).map_err(|err| AttemptFailure::Failed(format!("{err:#}")))
}

/// Hand a child's stdout to the next process as its stdin.
fn into_stdio(stdout: tokio::process::ChildStdout) -> Result<Stdio, AttemptFailure> {
    stdout
        .try_into()
        .map_err(|err| AttemptFailure::Failed(format!("failed to wire pipe: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_cache_clamps_to_bounds() {
        assert_eq!(network_cache_ms(1), 5_000);
        assert_eq!(network_cache_ms(10), 10_000);
        assert_eq!(network_cache_ms(60), 60_000);
        assert_eq!(network_cache_ms(500), 120_000);
    }

    #[test]
    fn live_cache_sums_buffer_and_cache() {
        assert_eq!(live_cache_ms(10, 3), 13_000);
        assert_eq!(live_cache_ms(1, 0), 10_000);
        assert_eq!(live_cache_ms(200, 10), 120_000);
    }

    #[test]
    fn file_cache_doubles_network_cache() {
        assert_eq!(file_cache_ms(5_000), 10_000);
        assert_eq!(file_cache_ms(60_000), 120_000);
    }

    #[test]
    fn native_volume_maps_percent_to_player_scale() {
        assert_eq!(native_volume(0), 0);
        assert_eq!(native_volume(50), 128);
        assert_eq!(native_volume(100), 256);
    }

    #[test]
    fn startup_grace_is_half_the_live_cache_with_a_floor() {
        assert_eq!(startup_grace(10_000), std::time::Duration::from_secs(5));
        assert_eq!(startup_grace(2_000), std::time::Duration::from_secs(5));
        assert_eq!(startup_grace(30_000), std::time::Duration::from_secs(15));
    }

    #[test]
    fn pcm_buffer_clamps_to_bounds() {
        assert_eq!(pcm_buffer_bytes(0), 4_096);
        assert_eq!(pcm_buffer_bytes(1), 176_400);
        assert_eq!(pcm_buffer_bytes(5), 882_000);
        assert_eq!(pcm_buffer_bytes(60), 1_048_576);
    }

    #[test]
    fn bufsize_renders_human_units() {
        assert_eq!(bufsize_arg(512), "512B");
        assert_eq!(bufsize_arg(176_400), "172k");
        assert_eq!(bufsize_arg(1_764_000), "1M");
    }

    #[test]
    fn aplay_buffer_scales_with_depth() {
        assert_eq!(aplay_buffer_frames(0), 4_096);
        assert_eq!(aplay_buffer_frames(1), 44_100);
        assert_eq!(aplay_buffer_frames(10), 131_072);
    }

    #[test]
    fn gain_factor_is_linear() {
        assert!((gain_factor(100) - 1.0).abs() < f64::EPSILON);
        assert!((gain_factor(50) - 0.5).abs() < f64::EPSILON);
        assert!((gain_factor(0)).abs() < f64::EPSILON);
    }

    #[test]
    fn mp3_hint_reorders_but_never_gates() {
        let plain = candidate_backends("http://r.example/stream.aac");
        assert_eq!(
            plain,
            vec![
                BackendKind::Managed,
                BackendKind::Transcode,
                BackendKind::Mp3Direct
            ]
        );

        let mp3 = candidate_backends("http://r.example/stream.mp3");
        assert_eq!(
            mp3,
            vec![
                BackendKind::Managed,
                BackendKind::Mp3Direct,
                BackendKind::Transcode
            ]
        );

        // Same strategies either way, only the order differs.
        let mut a = plain.clone();
        let mut b = mp3.clone();
        a.sort_by_key(|k| k.as_str());
        b.sort_by_key(|k| k.as_str());
        assert_eq!(a, b);
    }
}
