mod delete;
mod get;
mod post;

pub use delete::cancel_job_handler;
pub use get::get_result_handler;
pub use post::post_run_handler;

use actix_web::{HttpResponse, Responder, delete, get, post, web};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ErrorResponse;
use crate::catalog::Catalog;
use crate::queue::{JobPayload, JobQueue, JobState};

#[derive(Serialize, Deserialize, Debug)]
pub struct RunRequest {
    pub language: String,
    pub code: String,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RunAccepted {
    pub job_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ResultResponse {
    pub job_id: Uuid,
    pub state: JobState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}
