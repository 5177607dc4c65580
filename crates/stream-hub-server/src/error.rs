//! Playback error taxonomy and API error responses.
//!
//! Classifies launch/runtime failures so the synchronous caller gets a
//! useful message; the supervisor retries every kind the same way.

use actix_web::HttpResponse;

use crate::models::ControlResponse;

/// Errors surfaced by the playback core.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum PlayerError {
    /// Stream unreachable: DNS, refused, timeout.
    Connection(String),
    /// Output hardware missing or misconfigured.
    Device(String),
    /// No backend strategy could be started.
    BackendUnavailable,
    /// A previously started pipeline exited.
    PipelineDied(String),
    /// Config store write failed (playback unaffected).
    ConfigPersist(String),
}

impl PlayerError {
    /// Human-readable message, with remediation hints where the failure
    /// points at something the user can fix.
    pub(crate) fn message(&self) -> String {
        match self {
            PlayerError::Connection(detail) => format!(
                "Cannot connect to stream URL. Verify the URL is correct, \
                 the network is up, and the server is streaming. Details: {detail}"
            ),
            PlayerError::Device(detail) => format!(
                "Audio output device error. Check the output device selection, \
                 try a different ALSA device (e.g. \"plughw:2,0\"), and verify \
                 the audio card is connected. Details: {detail}"
            ),
            PlayerError::BackendUnavailable => {
                "No playback backend could be started; install cvlc, ffmpeg, or mpg123".to_string()
            }
            PlayerError::PipelineDied(detail) => {
                format!("Playback pipeline exited unexpectedly: {detail}")
            }
            PlayerError::ConfigPersist(detail) => {
                format!("Failed to persist configuration: {detail}")
            }
        }
    }

    /// Convert into an HTTP response with an `{ok, message}` body.
    pub(crate) fn into_response(self) -> HttpResponse {
        let body = ControlResponse {
            ok: false,
            message: self.message(),
        };
        match self {
            PlayerError::Connection(_) => HttpResponse::BadGateway().json(body),
            PlayerError::Device(_) => HttpResponse::InternalServerError().json(body),
            PlayerError::BackendUnavailable => HttpResponse::ServiceUnavailable().json(body),
            PlayerError::PipelineDied(_) => HttpResponse::InternalServerError().json(body),
            PlayerError::ConfigPersist(_) => HttpResponse::InternalServerError().json(body),
        }
    }
}

impl std::fmt::Display for PlayerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message())
    }
}

const CONNECTION_HINTS: [&str; 6] = [
    "connection",
    "resolve",
    "network",
    "timeout",
    "refused",
    "unreachable",
];

const DEVICE_HINTS: [&str; 6] = [
    "driver",
    "out123",
    "alsa",
    "device",
    "no such file",
    "busy",
];

/// Classify a failed launch from the collected backend diagnostics.
///
/// Connection-style text wins over device-style text; anything that matches
/// neither is reported as no usable backend.
pub(crate) fn classify_launch_failure(detail: &str) -> PlayerError {
    let lower = detail.to_lowercase();
    if CONNECTION_HINTS.iter().any(|hint| lower.contains(hint)) {
        return PlayerError::Connection(detail.to_string());
    }
    if DEVICE_HINTS.iter().any(|hint| lower.contains(hint)) {
        return PlayerError::Device(detail.to_string());
    }
    PlayerError::BackendUnavailable
}
