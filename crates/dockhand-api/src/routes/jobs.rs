//! Job endpoints.

use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use dockhand_core::{Job, JobId};
use dockhand_scheduler::JobTrigger;
use tracing::info;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/repos/{owner}/{repo}/jobs", post(create_default_branch_job))
        .route(
            "/repos/{owner}/{repo}/branches/{branch}/jobs",
            get(list_jobs).post(create_branch_job),
        )
        .route(
            "/repos/{owner}/{repo}/branches/{branch}/jobs/{number}",
            get(get_job),
        )
        .route(
            "/repos/{owner}/{repo}/branches/{branch}/jobs/{number}/log",
            get(get_job_log),
        )
        .route("/repos/{owner}/{repo}/commits/{sha}/jobs", post(create_commit_job))
        .route("/jobs/{id}", get(get_job_by_id))
}

async fn submit(state: &AppState, trigger: JobTrigger) -> Result<(StatusCode, Json<Job>), ApiError> {
    let (job, _task) = state.dispatcher.submit(trigger).await?;
    info!(owner = %job.owner, repo = %job.repo, branch = %job.branch, number = ?job.number, "Created job");
    Ok((StatusCode::CREATED, Json(job)))
}

async fn create_default_branch_job(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    submit(&state, JobTrigger::default_branch(owner, repo)).await
}

async fn create_branch_job(
    State(state): State<AppState>,
    Path((owner, repo, branch)): Path<(String, String, String)>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    submit(&state, JobTrigger::branch(owner, repo, branch)).await
}

async fn create_commit_job(
    State(state): State<AppState>,
    Path((owner, repo, sha)): Path<(String, String, String)>,
) -> Result<(StatusCode, Json<Job>), ApiError> {
    submit(&state, JobTrigger::commit(owner, repo, sha)).await
}

async fn list_jobs(
    State(state): State<AppState>,
    Path((owner, repo, branch)): Path<(String, String, String)>,
) -> Result<Json<Vec<Job>>, ApiError> {
    let jobs = state.store().list(&owner, &repo, &branch).await?;
    Ok(Json(jobs))
}

async fn get_job(
    State(state): State<AppState>,
    Path((owner, repo, branch, number)): Path<(String, String, String, u64)>,
) -> Result<Json<Job>, ApiError> {
    let job = state
        .store()
        .get_by_number(&owner, &repo, &branch, number)
        .await?;
    Ok(Json(job))
}

async fn get_job_log(
    State(state): State<AppState>,
    Path((owner, repo, branch, number)): Path<(String, String, String, u64)>,
) -> Result<impl IntoResponse, ApiError> {
    let store = state.store();
    let job = store.get_by_number(&owner, &repo, &branch, number).await?;
    let log = store.logger(&job)?.replay().await?;
    Ok(([(header::CONTENT_TYPE, "text/plain; charset=utf-8")], log))
}

async fn get_job_by_id(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<Job>, ApiError> {
    let job = state.store().get_by_id(JobId::new(id)).await?;
    Ok(Json(job))
}
