use actix_web::{HttpResponse, Responder, get, web};
use serde::Serialize;

use crate::queue::JobQueue;

#[derive(Serialize)]
struct HealthResponse {
    server: &'static str,
    redis: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

#[get("/health")]
pub async fn health_handler(queue: web::Data<JobQueue>) -> impl Responder {
    match queue.ping().await {
        Ok(()) => HttpResponse::Ok().json(HealthResponse {
            server: "OK",
            redis: "OK",
            error: None,
        }),
        Err(e) => {
            log::error!("health check failed to reach redis: {e}");
            HttpResponse::InternalServerError().json(HealthResponse {
                server: "OK",
                redis: "ERROR",
                error: Some(e.to_string()),
            })
        }
    }
}
