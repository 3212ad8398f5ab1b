use super::*;

#[delete("/jobs/{job_id}")]
pub async fn cancel_job_handler(
    queue: web::Data<JobQueue>,
    path: web::Path<(Uuid,)>,
) -> impl Responder {
    let job_id = path.into_inner().0;

    match queue.cancel(&job_id).await {
        Ok(true) => {
            log::info!("job {job_id} canceled while waiting");
            HttpResponse::Ok().finish()
        }
        Ok(false) => match queue.fetch(&job_id).await {
            // Job exists but already left the waiting list
            Ok(Some(_)) => HttpResponse::BadRequest().json(ErrorResponse {
                error: format!("Job {job_id} is no longer waiting."),
            }),
            Ok(None) => HttpResponse::NotFound().json(ErrorResponse {
                error: format!("Job {job_id} not found."),
            }),
            Err(e) => {
                log::error!("failed to validate if job {job_id} exists: {e}");
                HttpResponse::InternalServerError().json(ErrorResponse {
                    error: "Failed to query the job".to_string(),
                })
            }
        },
        Err(e) => {
            log::error!("failed to cancel job {job_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to cancel the job".to_string(),
            })
        }
    }
}
