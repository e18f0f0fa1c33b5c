use axum::body::Body;
use axum::extract::multipart::{Multipart, MultipartError, MultipartRejection};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use tracing::info;

use crate::intake::{Submission, Upload};
use crate::job::{JobId, JobState};
use super::error::{ApiError, ApiResult};
use super::AppState;

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub job_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub job_id: String,
    pub status: String,
}

pub async fn health() -> impl IntoResponse {
    "ok"
}

/// Accept a video plus prompt and start an editing job.
pub async fn edit_video(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<(StatusCode, Json<SubmitResponse>)> {
    let multipart = multipart.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let submission = read_submission(multipart).await?;

    let ticket = state.dispatcher.submit(submission).await?;
    info!(job_id = %ticket.id, "Accepted edit request");

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            job_id: ticket.id.to_string(),
        }),
    ))
}

/// Report a job's state; ids the registry has never seen are `unknown`.
pub async fn job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Json<StatusResponse> {
    let status = state
        .registry
        .get(&JobId::from(job_id.as_str()))
        .await
        .map(|job| job.state.to_string())
        .unwrap_or_else(|| "unknown".to_string());

    Json(StatusResponse { job_id, status })
}

/// Serve the edited video of a completed job.
pub async fn download(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Response> {
    let id = JobId::from(job_id.as_str());
    let job = state
        .registry
        .get(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("unknown job {}", id)))?;

    if job.state != JobState::Completed {
        return Err(ApiError::conflict(format!("job {} is {}", id, job.state)));
    }

    let result_path = job
        .result_path
        .ok_or_else(|| ApiError::internal(format!("job {} has no result path", id)))?;

    let file = match tokio::fs::File::open(&result_path).await {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::not_found(format!("result for job {} is missing", id)));
        }
        Err(e) => return Err(ApiError::internal(format!("failed to read result: {}", e))),
    };

    let extension = result_path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("mp4")
        .to_lowercase();
    let disposition = format!("attachment; filename=\"{}.{}\"", id, extension);

    Ok((
        [
            (header::CONTENT_TYPE, content_type_for(&extension).to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response())
}

async fn read_submission(mut multipart: Multipart) -> ApiResult<Submission> {
    let mut submission = Submission::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "video" => {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                submission.video = Some(Upload {
                    filename,
                    data: data.to_vec(),
                });
            }
            "prompt" => submission.prompt = Some(field.text().await.map_err(multipart_error)?),
            "inversion_prompt" => {
                submission.inversion_prompt = Some(field.text().await.map_err(multipart_error)?)
            }
            _ => {}
        }
    }

    Ok(submission)
}

fn multipart_error(e: MultipartError) -> ApiError {
    match e.status() {
        StatusCode::PAYLOAD_TOO_LARGE => ApiError::payload_too_large(format!("upload too large: {}", e.body_text())),
        _ => ApiError::bad_request(format!("invalid multipart body: {}", e.body_text())),
    }
}

fn content_type_for(extension: &str) -> &'static str {
    match extension {
        "mp4" => "video/mp4",
        "mkv" => "video/x-matroska",
        "avi" => "video/x-msvideo",
        _ => "application/octet-stream",
    }
}
