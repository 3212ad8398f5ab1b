use super::*;

#[post("/run")]
pub async fn post_run_handler(
    queue: web::Data<JobQueue>,
    catalog: web::Data<Catalog>,
    body: web::Json<RunRequest>,
) -> impl Responder {
    if catalog.resolve(&body.language).is_none() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: format!("Unknown language: {}", body.language),
        });
    }
    if body.code.is_empty() {
        return HttpResponse::BadRequest().json(ErrorResponse {
            error: "Code must not be empty".to_string(),
        });
    }

    let body = body.into_inner();
    let payload = JobPayload {
        language: body.language,
        code: body.code,
    };

    match queue.submit(&payload).await {
        Ok(job_id) => {
            log::info!("job {job_id} accepted for language {}", payload.language);
            HttpResponse::Accepted().json(RunAccepted { job_id })
        }
        Err(e) => {
            log::error!("failed to enqueue job: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to enqueue the job".to_string(),
            })
        }
    }
}
