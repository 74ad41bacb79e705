use crate::request_handler::RequestHandler;
use crate::types::{ClassifyRequest, ClassifyResponse, ErrorResponse};
use rocket::http::Status;
use rocket::response::status::Custom;
use rocket::serde::json::Json;
use rocket::{State, get, post};
use std::sync::Arc;

/// POST /proxy_classify - Main classification endpoint
///
/// Accepts a single text sequence and returns its label. Requests are
/// grouped with other waiting requests into backend batches; which batch a
/// sequence lands in depends on its length, not its arrival alone.
#[post("/proxy_classify", data = "<request>")]
pub async fn proxy_classify(
    request: Json<ClassifyRequest>,
    request_handler: &State<Arc<RequestHandler>>,
) -> Result<Json<ClassifyResponse>, Custom<Json<ErrorResponse>>> {
    // Validate before registration - an empty sequence never reaches the
    // dispatcher
    if request.sequence.is_empty() {
        return Err(Custom(
            Status::BadRequest,
            Json(ErrorResponse {
                detail: "`sequence` can't be empty".to_string(),
            }),
        ));
    }

    match request_handler
        .submit(request.into_inner().sequence)
        .await
    {
        Ok(result) => Ok(Json(ClassifyResponse { result })),
        Err(failure) => Err(Custom(
            failure.status(),
            Json(ErrorResponse {
                detail: failure.message(),
            }),
        )),
    }
}

/// GET /health - Health check endpoint
///
/// Returns "OK" if the service is running.
/// Used by load balancers and monitoring systems.
#[get("/health")]
pub fn health() -> &'static str {
    "OK"
}
