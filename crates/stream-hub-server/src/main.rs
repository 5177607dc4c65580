mod api;
mod capture;
mod config;
mod devices;
mod error;
mod launcher;
mod models;
mod openapi;
mod pipeline;
mod process;
mod pump;
mod state;
mod stream_url;
mod supervisor;

use std::path::PathBuf;

use actix_web::{App, HttpServer, middleware::Logger, web};
use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::ConfigStore;
use crate::state::AppState;
use crate::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "stream-hub-server")]
struct Args {
    /// HTTP bind address, e.g. 0.0.0.0:8080
    #[arg(long)]
    bind: Option<std::net::SocketAddr>,

    /// Config file path (TOML); created on first save
    #[arg(long)]
    config: Option<PathBuf>,
}

#[actix_web::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,actix_web=info,stream_hub_server=info")
        }))
        .init();

    let config_path = match args.config {
        Some(path) => path,
        None => std::env::current_exe()
            .ok()
            .and_then(|path| path.parent().map(|dir| dir.join("config.toml")))
            .unwrap_or_else(|| PathBuf::from("config.toml")),
    };
    let store = ConfigStore::new(config_path);
    let cfg = store.load()?;
    let bind: std::net::SocketAddr = match args.bind {
        Some(addr) => addr,
        None => cfg
            .bind
            .as_deref()
            .unwrap_or("0.0.0.0:8080")
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid bind address in config: {e}"))?,
    };
    tracing::info!(
        bind = %bind,
        config = %store.path().display(),
        "starting stream-hub-server"
    );

    let supervisor = Supervisor::new();
    supervisor.spawn_loop()?;

    let shutdown = supervisor.clone();
    let _ = ctrlc::set_handler(move || {
        shutdown.shutdown_blocking();
        if let Some(system) = actix_web::rt::System::try_current() {
            system.stop();
        } else {
            std::process::exit(0);
        }
    });

    let state = web::Data::new(AppState {
        supervisor,
        config: store,
    });

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default().exclude("/status").exclude("/health"))
            .service(
                SwaggerUi::new("/swagger-ui/{_:.*}")
                    .url("/api-doc/openapi.json", openapi::ApiDoc::openapi()),
            )
            .service(api::player_start)
            .service(api::player_stop)
            .service(api::status)
            .service(api::config_get)
            .service(api::config_save)
            .service(api::outputs_list)
            .service(api::health::health)
    })
    .bind(bind)?
    .run()
    .await?;

    Ok(())
}
