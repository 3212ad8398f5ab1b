use super::*;

#[get("/results/{job_id}")]
pub async fn get_result_handler(
    queue: web::Data<JobQueue>,
    path: web::Path<(Uuid,)>,
) -> impl Responder {
    let job_id = path.into_inner().0;

    match queue.fetch(&job_id).await {
        Ok(Some(job)) => {
            let message = match job.state {
                JobState::Completed => "Job completed successfully.",
                JobState::Failed => "Job failed.",
                JobState::Active => "Job is currently executing.",
                _ => "Job is queued and waiting to be executed.",
            };
            HttpResponse::Ok().json(ResultResponse {
                job_id,
                state: job.state,
                output: job.output,
                error: job.error,
                message: message.to_string(),
            })
        }
        Ok(None) => {
            log::info!("got nothing with job id {job_id} from the queue");
            HttpResponse::NotFound().json(ErrorResponse {
                error: format!("Job {job_id} not found."),
            })
        }
        Err(e) => {
            log::error!("failed to retrieve job {job_id}: {e}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                error: "Failed to query the job".to_string(),
            })
        }
    }
}
