//! Playback control handlers.

use actix_web::{HttpResponse, Responder, get, post, web};

use crate::error::PlayerError;
use crate::launcher::PlaybackRequest;
use crate::models::{ControlResponse, StartRequest, StatusResponse};
use crate::state::AppState;
use crate::stream_url;

/// Start playback. Fields missing from the body come from the persisted
/// configuration; the merged result is persisted back before launch.
#[utoipa::path(
    post,
    path = "/player/start",
    request_body = StartRequest,
    responses(
        (status = 200, description = "Playback started", body = ControlResponse),
        (status = 400, description = "No stream URL available", body = ControlResponse),
        (status = 502, description = "Stream unreachable", body = ControlResponse),
        (status = 503, description = "No playback backend available", body = ControlResponse)
    )
)]
#[post("/player/start")]
pub async fn player_start(
    state: web::Data<AppState>,
    body: web::Json<StartRequest>,
) -> impl Responder {
    let stored = match state.config.load() {
        Ok(config) => config.player,
        Err(err) => {
            tracing::warn!(error = %format!("{err:#}"), "config unreadable, using defaults");
            Default::default()
        }
    };

    let raw_url = body
        .url
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| (!stored.url.is_empty()).then(|| stored.url.clone()));
    let Some(raw_url) = raw_url else {
        return HttpResponse::BadRequest().json(ControlResponse {
            ok: false,
            message: "stream url is required".to_string(),
        });
    };

    let mut url = stream_url::normalize_url(&raw_url);
    if stream_url::is_playlist_url(&url) {
        let playlist_url = url.clone();
        match web::block(move || stream_url::resolve_playlist(&playlist_url)).await {
            Ok(Ok(resolved)) => {
                if resolved != url {
                    tracing::info!(playlist = %url, stream = %resolved, "resolved playlist entry");
                    url = resolved;
                }
            }
            // Unresolvable playlists go to the backends as-is; the managed
            // player can often handle them itself.
            Ok(Err(err)) => {
                tracing::warn!(error = %format!("{err:#}"), "playlist resolution failed")
            }
            Err(err) => tracing::warn!(error = %err, "playlist resolution task failed"),
        }
    }

    let settings = crate::config::PlayerSettings {
        url: url.clone(),
        output_device: body
            .output_device
            .clone()
            .unwrap_or_else(|| stored.output_device.clone()),
        volume: body.volume.unwrap_or(stored.volume),
        buffer_secs: body.buffer_secs.unwrap_or(stored.buffer_secs),
        playback_cache_secs: body
            .playback_cache_secs
            .unwrap_or(stored.playback_cache_secs),
    }
    .normalized();

    // Persist failures are logged, never allowed to block playback.
    if let Err(err) = state.config.save_player(&settings) {
        let err = PlayerError::ConfigPersist(format!("{err:#}"));
        tracing::warn!(error = %err, "player settings not persisted");
    }

    let request = PlaybackRequest {
        url,
        output_device: settings.output_device,
        volume: settings.volume,
        buffer_secs: settings.buffer_secs,
        playback_cache_secs: settings.playback_cache_secs,
    };
    match state.supervisor.start(request).await {
        Ok(()) => HttpResponse::Ok().json(ControlResponse::ok("playback started")),
        Err(err) => err.into_response(),
    }
}

/// Stop playback and kill every pipeline process.
#[utoipa::path(
    post,
    path = "/player/stop",
    responses(
        (status = 200, description = "Playback stopped", body = ControlResponse)
    )
)]
#[post("/player/stop")]
pub async fn player_stop(state: web::Data<AppState>) -> impl Responder {
    let stopped = state.supervisor.stop().await;
    let message = if stopped {
        "playback stopped"
    } else {
        "playback was not running"
    };
    HttpResponse::Ok().json(ControlResponse::ok(message))
}

/// Supervisor and level meter snapshot. Polled by UIs, so it only reads
/// flags and never touches the playback loop.
#[utoipa::path(
    get,
    path = "/status",
    responses(
        (status = 200, description = "Playback status", body = StatusResponse)
    )
)]
#[get("/status")]
pub async fn status(state: web::Data<AppState>) -> impl Responder {
    let snapshot = state.supervisor.status();
    HttpResponse::Ok().json(StatusResponse {
        running: snapshot.running,
        pipeline_alive: snapshot.pipeline_alive,
        backend: snapshot.backend.map(str::to_string),
        consecutive_failures: snapshot.consecutive_failures,
        levels: state.supervisor.levels(),
    })
}
