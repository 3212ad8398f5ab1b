mod health;
mod jobs;

pub use health::health_handler;
pub use jobs::{
    ResultResponse, RunAccepted, RunRequest, cancel_job_handler, get_result_handler,
    post_run_handler,
};

use actix_web::error::{InternalError, JsonPayloadError};
use actix_web::{HttpRequest, HttpResponse};
use serde::Serialize;

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn json_error_handler(err: JsonPayloadError, _req: &HttpRequest) -> actix_web::Error {
    let response = HttpResponse::BadRequest().json(ErrorResponse {
        error: format!("Invalid request body: {err}"),
    });
    InternalError::from_response(err, response).into()
}
