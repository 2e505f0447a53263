//! Minimal axum submission/status surface. A full HTTP API is out of scope;
//! this exists only so the orchestration core has a caller to be exercised
//! end-to-end through the binary — it is not itself the subject of testing.

use crate::model::JobStatus;
use crate::orchestrator::Orchestrator;
use std::sync::Arc;
use tracing::{Level, event};

#[derive(Clone)]
pub struct HTTPHandlerState {
    orchestrator: Arc<Orchestrator>,
}

impl HTTPHandlerState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> HTTPHandlerState {
        HTTPHandlerState { orchestrator }
    }
}

#[derive(Debug, serde::Deserialize)]
#[serde(untagged)]
pub enum SubmitReq {
    Single { video_url: String },
    Many { video_urls: Vec<String> },
}

#[derive(Debug, serde::Serialize)]
pub struct SubmitItem {
    pub job_id: String,
    pub status_url: String,
}

#[derive(Debug, serde::Serialize)]
pub struct SubmitResp {
    pub jobs: Vec<SubmitItem>,
}

/// `POST /submit`: accepts either a single `video_url` or a list
/// `video_urls`; a list is grouped under one `Batch`. Returns
/// `{job_id, status_url}` for each created job.
pub async fn post_submit(
    axum::extract::State(state): axum::extract::State<HTTPHandlerState>,
    axum::Json(payload): axum::Json<SubmitReq>,
) -> (axum::http::StatusCode, axum::Json<SubmitResp>) {
    let urls = match payload {
        SubmitReq::Single { video_url } => vec![video_url],
        SubmitReq::Many { video_urls } => video_urls,
    };

    let batch_id = if urls.len() > 1 {
        let id = uuid::Uuid::new_v4().to_string();
        if let Err(e) = state.orchestrator.store.create_batch(&id).await {
            event!(Level::WARN, "failed to create batch {id}: {e}");
        }
        Some(id)
    } else {
        None
    };

    let mut jobs = Vec::with_capacity(urls.len());
    for url in urls {
        match state.orchestrator.submit(url, batch_id.clone()).await {
            Ok(job) => jobs.push(SubmitItem {
                status_url: format!("/status/{}", job.id),
                job_id: job.id,
            }),
            Err(e) => {
                event!(Level::WARN, "failed to submit job: {e}");
            }
        }
    }

    (axum::http::StatusCode::CREATED, axum::Json(SubmitResp { jobs }))
}

#[derive(Debug, serde::Serialize)]
pub struct StatusResp {
    pub job_id: String,
    pub status: String,
    pub mp3_url: Option<String>,
    pub error_message: Option<String>,
    pub progress: u8,
}

/// `GET /status/:job_id`: derives `progress` purely from `status`, never
/// from progress events.
pub async fn get_status(
    axum::extract::State(state): axum::extract::State<HTTPHandlerState>,
    axum::extract::Path(job_id): axum::extract::Path<String>,
) -> (axum::http::StatusCode, axum::Json<Option<StatusResp>>) {
    match state.orchestrator.status(&job_id).await {
        Ok(job) => (
            axum::http::StatusCode::OK,
            axum::Json(Some(StatusResp {
                job_id: job.id,
                status: job.status.as_str().to_string(),
                mp3_url: job.mp3_url,
                error_message: job.error_message,
                progress: job.status.progress_percent(),
            })),
        ),
        Err(_) => (axum::http::StatusCode::NOT_FOUND, axum::Json(None)),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn progress_is_derived_purely_from_status() {
        assert_eq!(JobStatus::Pending.progress_percent(), 0);
        assert_eq!(JobStatus::Downloading.progress_percent(), 25);
        assert_eq!(JobStatus::Converting.progress_percent(), 50);
        assert_eq!(JobStatus::Uploading.progress_percent(), 75);
        assert_eq!(JobStatus::Completed.progress_percent(), 100);
        assert_eq!(JobStatus::Failed.progress_percent(), 0);
    }
}
