use utoipa::OpenApi;

use crate::api;
use crate::config;
use crate::models;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::playback::player_start,
        api::playback::player_stop,
        api::playback::status,
        api::config::config_get,
        api::config::config_save,
        api::outputs::outputs_list,
        api::health::health,
    ),
    components(
        schemas(
            pcm_meter::LevelSample,
            models::StartRequest,
            models::ControlResponse,
            models::StatusResponse,
            models::DeviceInfo,
            models::OutputsResponse,
            config::PlayerSettings,
            api::health::HealthResponse,
        )
    ),
    tags(
        (name = "stream-hub-server", description = "Stream playback control API")
    )
)]
pub struct ApiDoc;
