//! HTTP API handlers.
//!
//! Defines the Actix routes for playback control, status, configuration,
//! and output discovery.

pub mod config;
pub mod health;
pub mod outputs;
pub mod playback;

pub use config::{config_get, config_save};
pub use outputs::outputs_list;
pub use playback::{player_start, player_stop, status};

#[cfg(test)]
mod tests {
    use actix_web::{App, test};

    use crate::api;
    use crate::config::{ConfigStore, PlayerSettings};
    use crate::models::ControlResponse;
    use crate::state::AppState;
    use crate::supervisor::Supervisor;

    fn make_state(config_path: impl Into<std::path::PathBuf>) -> actix_web::web::Data<AppState> {
        actix_web::web::Data::new(AppState {
            supervisor: Supervisor::new(),
            config: ConfigStore::new(config_path),
        })
    }

    fn temp_config(tag: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!(
            "stream-hub-api-{tag}-{}-{}.toml",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ))
    }

    #[actix_web::test]
    async fn health_route_answers_ok() {
        let app = test::init_service(App::new().service(api::health::health)).await;

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());
    }

    #[actix_web::test]
    async fn config_save_and_get_round_trip() {
        let state = make_state(temp_config("round-trip"));
        let app = test::init_service(
            App::new()
                .app_data(state.clone())
                .service(api::config_save)
                .service(api::config_get),
        )
        .await;

        let payload = PlayerSettings {
            url: "http://radio.example/stream".to_string(),
            volume: 40,
            ..PlayerSettings::default()
        };
        let req = test::TestRequest::post()
            .uri("/config")
            .set_json(&payload)
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert!(resp.status().is_success());

        let req = test::TestRequest::get().uri("/config").to_request();
        let saved: PlayerSettings = test::call_and_read_body_json(&app, req).await;
        assert_eq!(saved, payload);
    }

    #[actix_web::test]
    async fn config_save_reports_write_failures_as_persist_errors() {
        let state = make_state("/nonexistent-dir/stream-hub.toml");
        let app =
            test::init_service(App::new().app_data(state.clone()).service(api::config_save)).await;

        let req = test::TestRequest::post()
            .uri("/config")
            .set_json(PlayerSettings::default())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(
            resp.status(),
            actix_web::http::StatusCode::INTERNAL_SERVER_ERROR
        );

        let body: ControlResponse = test::read_body_json(resp).await;
        assert!(!body.ok);
        assert!(body.message.contains("persist configuration"));
    }
}
