use actix_web::{HttpResponse, Responder, get};
use serde::Serialize;
use utoipa::ToSchema;

/// Liveness payload; always `"ok"` while the server answers at all.
#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Liveness endpoint. Answers from a static payload so uptime checks
/// never touch the playback loop.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Server is up and serving requests", body = HealthResponse)
    )
)]
#[get("/health")]
pub async fn health() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse { status: "ok" })
}
