//! Ownership hierarchy listings.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/owners", get(list_owners))
        .route("/owners/{owner}/repos", get(list_repos))
        .route("/repos/{owner}/{repo}/branches", get(list_branches))
}

async fn list_owners(State(state): State<AppState>) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.store().list_owners().await?))
}

async fn list_repos(
    State(state): State<AppState>,
    Path(owner): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.store().list_repos(&owner).await?))
}

async fn list_branches(
    State(state): State<AppState>,
    Path((owner, repo)): Path<(String, String)>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(state.store().list_branches(&owner, &repo).await?))
}
