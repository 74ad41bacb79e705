pub mod backend_client;
pub mod config;
pub mod dispatcher;
pub mod registry;
pub mod request_handler;
pub mod routes;
pub mod selector;
pub mod types;

use crate::backend_client::ClassifyBackend;
use crate::config::AppConfig;
use crate::request_handler::RequestHandler;
use crate::types::ErrorResponse;
use rocket::config::LogLevel;
use rocket::fairing::AdHoc;
use rocket::serde::json::Json;
use rocket::{Build, Request, Rocket, catch, http::Status};
use std::sync::Arc;

/// Only catches errors that aren't explicitly handled,
/// has lower priority than custom responders, i.e., custom error handling bypasses this global catcher
#[catch(default)]
fn json_error_catcher(status: Status, _req: &Request) -> Json<ErrorResponse> {
    Json(ErrorResponse {
        detail: status.reason().unwrap_or("Unknown Error").to_string(),
    })
}

/// Builds and configures a Rocket application instance.
/// Accessible from application as well as tests
pub async fn build_rocket(app_config: AppConfig) -> Rocket<Build> {
    // it's OK to fail earlier in this case, since it's App startup code
    let handler = Arc::new(
        RequestHandler::new(app_config.clone()).expect("Failed to create RequestHandler"),
    );
    rocket_with_handler(app_config, handler)
}

/// Same application with the backend transport swapped out; integration
/// tests use this to script backend outcomes.
pub async fn build_rocket_with_backend(
    app_config: AppConfig,
    backend: Arc<dyn ClassifyBackend>,
) -> Rocket<Build> {
    let handler = Arc::new(RequestHandler::with_backend(app_config.clone(), backend));
    rocket_with_handler(app_config, handler)
}

fn rocket_with_handler(app_config: AppConfig, handler: Arc<RequestHandler>) -> Rocket<Build> {
    let port = app_config.port;
    let log_level = if app_config.quiet_mode {
        LogLevel::Off // Silent Rocket (no startup messages)
    } else {
        LogLevel::Normal // Standard Rocket startup messages
    };

    rocket::build()
        // same Arc<RequestHandler> instance is shared across all requests
        .manage(handler)
        .mount(
            "/",
            rocket::routes![routes::health, routes::proxy_classify],
        )
        .register("/", rocket::catchers![json_error_catcher])
        // resolve every parked caller with `Cancelled` on Ctrl-C / shutdown
        .attach(AdHoc::on_shutdown("stop dispatcher", |rocket| {
            Box::pin(async move {
                if let Some(handler) = rocket.state::<Arc<RequestHandler>>() {
                    handler.shutdown();
                }
            })
        }))
        .configure(rocket::Config {
            port,
            log_level,
            ..rocket::Config::default()
        })
}
