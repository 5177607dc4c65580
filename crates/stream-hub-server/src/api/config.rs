//! Player configuration handlers.

use actix_web::{HttpResponse, Responder, get, post, web};

use crate::config::PlayerSettings;
use crate::error::PlayerError;
use crate::models::ControlResponse;
use crate::state::AppState;

/// Current persisted player settings.
#[utoipa::path(
    get,
    path = "/config",
    responses(
        (status = 200, description = "Persisted player settings", body = PlayerSettings),
        (status = 500, description = "Config unreadable", body = ControlResponse)
    )
)]
#[get("/config")]
pub async fn config_get(state: web::Data<AppState>) -> impl Responder {
    match state.config.load() {
        Ok(config) => HttpResponse::Ok().json(config.player),
        Err(err) => HttpResponse::InternalServerError().json(ControlResponse {
            ok: false,
            message: format!("{err:#}"),
        }),
    }
}

/// Replace the persisted player settings. Values are clamped into range
/// before writing; a running pipeline is not restarted.
#[utoipa::path(
    post,
    path = "/config",
    request_body = PlayerSettings,
    responses(
        (status = 200, description = "Settings saved", body = PlayerSettings),
        (status = 500, description = "Write failed", body = ControlResponse)
    )
)]
#[post("/config")]
pub async fn config_save(
    state: web::Data<AppState>,
    body: web::Json<PlayerSettings>,
) -> impl Responder {
    let settings = body.into_inner().normalized();
    match state.config.save_player(&settings) {
        Ok(()) => HttpResponse::Ok().json(settings),
        Err(err) => PlayerError::ConfigPersist(format!("{err:#}")).into_response(),
    }
}
