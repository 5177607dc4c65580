//! Request/response payloads for the HTTP API.

use pcm_meter::LevelSample;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body for `POST /player/start`. Omitted fields fall back to the
/// persisted configuration.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct StartRequest {
    /// Stream URL; required unless the persisted config already has one.
    pub url: Option<String>,
    /// ALSA output device, e.g. `plughw:1,0`. Empty means auto-detect.
    pub output_device: Option<String>,
    /// Playback volume, 0..=100.
    pub volume: Option<u8>,
    /// Network buffer depth in seconds.
    pub buffer_secs: Option<u32>,
    /// Extra local cache in seconds before audio starts.
    pub playback_cache_secs: Option<u32>,
}

/// Generic acknowledgement for control endpoints.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ControlResponse {
    pub ok: bool,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        ControlResponse {
            ok: true,
            message: message.into(),
        }
    }
}

/// Snapshot returned by `GET /status`.
#[derive(Debug, Serialize, ToSchema)]
pub struct StatusResponse {
    /// Whether the supervisor is trying to keep a pipeline alive.
    pub running: bool,
    /// Whether all legs of the current pipeline looked alive at the last check.
    pub pipeline_alive: bool,
    /// Active backend name (`managed-player`, `transcode`, `mp3-direct`).
    pub backend: Option<String>,
    /// Launch failures since the last successful start.
    pub consecutive_failures: u32,
    /// Most recent per-channel RMS levels, 0.0..=1.0.
    pub levels: LevelSample,
}

/// One ALSA card as reported by `aplay -l` / `arecord -l`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq, ToSchema)]
pub struct DeviceInfo {
    /// Card index.
    pub card: u32,
    /// Card description from the bracketed field.
    pub name: String,
    /// Whether the card line mentioned USB.
    pub usb: bool,
    /// Device string usable in config, e.g. `plughw:1,0`.
    pub alsa_id: String,
}

/// Response for `GET /outputs`.
#[derive(Debug, Serialize, ToSchema)]
pub struct OutputsResponse {
    pub playback: Vec<DeviceInfo>,
    pub capture: Vec<DeviceInfo>,
    /// Device string the launcher would pick when none is configured.
    pub default_playback: String,
    /// Capture device the level meter falls back to.
    pub default_capture: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_request_accepts_partial_bodies() {
        let req: StartRequest = serde_json::from_str(r#"{"url":"http://r.example/s"}"#).unwrap();
        assert_eq!(req.url.as_deref(), Some("http://r.example/s"));
        assert_eq!(req.volume, None);
        assert_eq!(req.buffer_secs, None);

        let req: StartRequest = serde_json::from_str("{}").unwrap();
        assert_eq!(req.url, None);
    }

    #[test]
    fn status_response_includes_levels() {
        let status = StatusResponse {
            running: true,
            pipeline_alive: true,
            backend: Some("transcode".to_string()),
            consecutive_failures: 0,
            levels: LevelSample {
                left: 0.25,
                right: 0.5,
            },
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json["backend"], "transcode");
        assert_eq!(json["levels"]["left"], 0.25);
        assert_eq!(json["levels"]["right"], 0.5);
    }
}
