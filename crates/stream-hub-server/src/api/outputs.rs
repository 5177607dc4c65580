//! Output device discovery handlers.

use actix_web::{HttpResponse, Responder, get, web};

use crate::devices;
use crate::models::OutputsResponse;
use crate::state::AppState;

/// List ALSA playback and capture devices plus the defaults the launcher
/// and level meter would pick.
#[utoipa::path(
    get,
    path = "/outputs",
    responses(
        (status = 200, description = "Available audio devices", body = OutputsResponse)
    )
)]
#[get("/outputs")]
pub async fn outputs_list(_state: web::Data<AppState>) -> impl Responder {
    let playback = devices::list_playback().await;
    let capture = devices::list_capture().await;
    let default_playback = devices::preferred_card(&playback)
        .map(|card| card.alsa_id.clone())
        .unwrap_or_else(|| "default".to_string());
    let default_capture = devices::preferred_card(&capture)
        .map(|card| card.alsa_id.clone())
        .unwrap_or_else(|| devices::CAPTURE_FALLBACK.to_string());
    HttpResponse::Ok().json(OutputsResponse {
        playback,
        capture,
        default_playback,
        default_capture,
    })
}
