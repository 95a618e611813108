//! API routes.

pub mod browse;
pub mod health;
pub mod jobs;

use crate::AppState;
use axum::Router;

/// Build the main API router.
pub fn router(state: AppState) -> Router {
    Router::new().nest("/api/v1", api_router()).with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(jobs::router())
        .merge(browse::router())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use dockhand_core::Job;
    use dockhand_core::store::JobStore;
    use dockhand_db::SqliteJobStore;
    use dockhand_scheduler::JobDispatcher;
    use dockhand_scheduler::testing::{StubExecutor, StubSource};
    use serde_json::Value;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn test_state() -> (AppState, Arc<SqliteJobStore>) {
        let store = Arc::new(SqliteJobStore::in_memory().await.unwrap());
        let dispatcher = JobDispatcher::new(
            Arc::new(StubExecutor::new(r#"build { image "x"; }"#)),
            store.clone(),
            Arc::new(StubSource::new("c0ffee")),
        );
        (AppState::new(dispatcher), store)
    }

    async fn saved_job(store: &SqliteJobStore, owner: &str, repo: &str, branch: &str) -> Job {
        let mut job = Job::new(owner, repo, Some(branch.to_string()), None);
        store.save(&mut job).await.unwrap();
        job
    }

    async fn send(state: AppState, method: &str, uri: &str) -> (StatusCode, Vec<u8>) {
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        let status = resp.status();
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    async fn send_json(state: AppState, method: &str, uri: &str) -> (StatusCode, Value) {
        let (status, body) = send(state, method, uri).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_health() {
        let (state, _) = test_state().await;
        let (status, body) = send_json(state, "GET", "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_job_on_branch() {
        let (state, _) = test_state().await;
        let (status, body) =
            send_json(state, "POST", "/api/v1/repos/acme/widget/branches/main/jobs").await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["id"], 1);
        assert_eq!(body["number"], 1);
        assert_eq!(body["owner"], "acme");
        assert_eq!(body["repo"], "widget");
        assert_eq!(body["branch"], "main");
        assert!(body["ended_at"].is_null());
    }

    #[tokio::test]
    async fn test_create_job_defaults_and_commits() {
        let (state, _) = test_state().await;

        let (status, body) = send_json(state.clone(), "POST", "/api/v1/repos/acme/widget/jobs").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["branch"], "master");

        let (status, body) =
            send_json(state, "POST", "/api/v1/repos/acme/widget/commits/abc123/jobs").await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["branch"], "");
        assert_eq!(body["sha"], "abc123");
    }

    #[tokio::test]
    async fn test_encoded_branch_names() {
        let (state, store) = test_state().await;
        saved_job(&store, "acme", "widget", "feature/login").await;

        let (status, body) = send_json(
            state,
            "GET",
            "/api/v1/repos/acme/widget/branches/feature%2Flogin/jobs/1",
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["branch"], "feature/login");
    }

    #[tokio::test]
    async fn test_list_jobs_newest_first() {
        let (state, store) = test_state().await;
        for _ in 0..3 {
            saved_job(&store, "acme", "widget", "main").await;
        }

        let (status, body) =
            send_json(state.clone(), "GET", "/api/v1/repos/acme/widget/branches/main/jobs").await;
        assert_eq!(status, StatusCode::OK);
        let numbers: Vec<u64> = body
            .as_array()
            .unwrap()
            .iter()
            .map(|j| j["number"].as_u64().unwrap())
            .collect();
        assert_eq!(numbers, vec![3, 2, 1]);

        let (status, body) =
            send_json(state, "GET", "/api/v1/repos/acme/widget/branches/nope/jobs").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_get_job_by_id_and_number() {
        let (state, store) = test_state().await;
        saved_job(&store, "acme", "widget", "main").await;
        let second = saved_job(&store, "acme", "widget", "dev").await;

        let (status, body) = send_json(state.clone(), "GET", "/api/v1/jobs/2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["branch"], "dev");
        assert_eq!(body["number"], second.number.unwrap());

        let (status, _) = send_json(state.clone(), "GET", "/api/v1/jobs/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send_json(
            state,
            "GET",
            "/api/v1/repos/acme/widget/branches/main/jobs/7",
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_get_job_log() {
        let (state, store) = test_state().await;
        let job = saved_job(&store, "acme", "widget", "main").await;
        let logger = store.logger(&job).unwrap();
        logger.write_step("build").await.unwrap();
        logger.write(b"ok\n").await.unwrap();

        let req = Request::builder()
            .uri("/api/v1/repos/acme/widget/branches/main/jobs/1/log")
            .body(Body::empty())
            .unwrap();
        let resp = router(state).oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()["content-type"],
            "text/plain; charset=utf-8"
        );
        let body = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"--- build ---\nok\n");
    }

    #[tokio::test]
    async fn test_hierarchy_listings() {
        let (state, store) = test_state().await;
        saved_job(&store, "acme", "widget", "main").await;
        saved_job(&store, "acme", "widget", "dev").await;
        saved_job(&store, "acme", "gadget", "main").await;

        let (_, owners) = send_json(state.clone(), "GET", "/api/v1/owners").await;
        assert_eq!(owners, serde_json::json!(["acme"]));

        let (_, repos) = send_json(state.clone(), "GET", "/api/v1/owners/acme/repos").await;
        assert_eq!(repos.as_array().unwrap().len(), 2);

        let (_, branches) =
            send_json(state.clone(), "GET", "/api/v1/repos/acme/widget/branches").await;
        assert_eq!(branches.as_array().unwrap().len(), 2);

        let (status, empty) = send_json(state, "GET", "/api/v1/owners/nobody/repos").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(empty, serde_json::json!([]));
    }
}
