use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use joblock_core::{Database, DbConfig, Error};

use crate::handlers::*;

pub type AppState = Arc<Database>;

pub async fn run(host: &str, port: u16, config: &DbConfig) -> Result<(), Box<dyn std::error::Error>> {
    // Waits here for as long as the shared store is unreachable
    let db = Database::open(config).await?;
    tracing::info!(backend = %db.family(), "💾 Job database ready");

    let app = router(db);
    let addr = format!("{}:{}", host, port);
    tracing::info!("🔒 joblock server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(db: Database) -> Router {
    let state: AppState = Arc::new(db);

    Router::new()
        .route("/health", get(health))
        .route("/jobs", get(list_jobs).post(insert_job).delete(delete_all_jobs))
        .route("/jobs/{id}", get(get_job).put(put_job).delete(delete_job))
        .route("/jobs/{id}/lock", get(job_lock))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

// ─── Response Helpers ───────────────────────────────────────────────────────

fn reply<T: Serialize>(status: StatusCode, body: ApiResponse<T>) -> Response {
    (status, Json(body)).into_response()
}

fn bad_request(msg: String) -> Response {
    reply(StatusCode::BAD_REQUEST, ApiResponse::<()>::err(msg))
}

fn error_response(err: Error) -> Response {
    if err.is_storage_unavailable() {
        // The caller owns the retry; tell it to come back later
        tracing::warn!("Storage unavailable: {}", err);
        return reply(StatusCode::SERVICE_UNAVAILABLE, ApiResponse::<()>::err(err.to_string()));
    }
    let status = match &err {
        Error::JobAlreadyExists(_) => StatusCode::CONFLICT,
        Error::JobNotFound(_) => StatusCode::NOT_FOUND,
        _ => {
            tracing::error!("Request failed: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    reply(status, ApiResponse::<()>::err(err.to_string()))
}

// ─── Handlers ───────────────────────────────────────────────────────────────

async fn health(State(db): State<AppState>) -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        backend: db.family(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn list_jobs(State(db): State<AppState>) -> Response {
    match db.jobs().list().await {
        Ok(jobs) => reply(StatusCode::OK, ApiResponse::ok(jobs)),
        Err(e) => error_response(e),
    }
}

async fn insert_job(State(db): State<AppState>, Json(req): Json<JobRequest>) -> Response {
    if let Err(e) = req.validate() {
        return bad_request(e);
    }
    let job = req.into_job();
    match db.jobs().insert(&job).await {
        Ok(()) => {
            tracing::info!(job_id = %job.id, "Job created");
            reply(StatusCode::CREATED, ApiResponse::ok(job))
        }
        Err(e) => error_response(e),
    }
}

async fn delete_all_jobs(State(db): State<AppState>) -> Response {
    match db.jobs().delete_all().await {
        Ok(()) => {
            tracing::info!("All jobs deleted");
            reply(StatusCode::OK, ApiResponse::ok("all jobs deleted"))
        }
        Err(e) => error_response(e),
    }
}

async fn get_job(State(db): State<AppState>, Path(id): Path<String>) -> Response {
    match db.jobs().get(&id).await {
        Ok(Some(job)) => reply(StatusCode::OK, ApiResponse::ok(job)),
        Ok(None) => error_response(Error::JobNotFound(id)),
        Err(e) => error_response(e),
    }
}

async fn put_job(
    State(db): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<JobRequest>,
) -> Response {
    if let Err(e) = req.validate_for(&id) {
        return bad_request(e);
    }
    let job = req.into_job();
    match db.jobs().put(&job).await {
        Ok(()) => {
            tracing::info!(job_id = %job.id, "Job stored");
            reply(StatusCode::OK, ApiResponse::ok(job))
        }
        Err(e) => error_response(e),
    }
}

async fn delete_job(State(db): State<AppState>, Path(id): Path<String>) -> Response {
    match db.jobs().delete(&id).await {
        Ok(()) => {
            tracing::info!(job_id = %id, "Job deleted");
            reply(StatusCode::OK, ApiResponse::ok(format!("Job '{}' deleted", id)))
        }
        Err(e) => error_response(e),
    }
}

async fn job_lock(State(db): State<AppState>, Path(id): Path<String>) -> Response {
    match db.locker().current_lock(&id).await {
        Ok(lock) => reply(StatusCode::OK, ApiResponse::ok(LockInfo::from_lock(id, lock))),
        Err(e) => error_response(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request};
    use async_trait::async_trait;
    use joblock_core::{BackendFamily, Job, JobAccess, JobLock, JobLocker, OwnerId};
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    /// A backend whose every call fails like a dropped connection.
    struct UnreachableStore;

    fn connection_reset<T>() -> joblock_core::Result<T> {
        Err(Error::StorageUnavailable("connection reset by peer".into()))
    }

    #[async_trait]
    impl JobAccess for UnreachableStore {
        async fn put(&self, _job: &Job) -> joblock_core::Result<()> {
            connection_reset()
        }
        async fn insert(&self, _job: &Job) -> joblock_core::Result<()> {
            connection_reset()
        }
        async fn update(&self, _job: &Job) -> joblock_core::Result<()> {
            connection_reset()
        }
        async fn get(&self, _id: &str) -> joblock_core::Result<Option<Job>> {
            connection_reset()
        }
        async fn list(&self) -> joblock_core::Result<Vec<Job>> {
            connection_reset()
        }
        async fn delete(&self, _id: &str) -> joblock_core::Result<()> {
            connection_reset()
        }
        async fn delete_all(&self) -> joblock_core::Result<()> {
            connection_reset()
        }
    }

    #[async_trait]
    impl JobLocker for UnreachableStore {
        async fn acquire(&self, _: &str, _: &OwnerId, _: Duration) -> joblock_core::Result<bool> {
            connection_reset()
        }
        async fn renew(&self, _: &str, _: &OwnerId, _: Duration) -> joblock_core::Result<bool> {
            connection_reset()
        }
        async fn release(&self, _: &str, _: &OwnerId) -> joblock_core::Result<bool> {
            connection_reset()
        }
        async fn is_locked(&self, _: &str) -> joblock_core::Result<bool> {
            connection_reset()
        }
        async fn current_lock(&self, _: &str) -> joblock_core::Result<Option<JobLock>> {
            connection_reset()
        }
    }

    fn app() -> (Router, Database) {
        let db = Database::in_memory(Duration::from_secs(10));
        (router(db.clone()), db)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        let body = match body {
            Some(value) => {
                builder = builder.header("content-type", "application/json");
                Body::from(value.to_string())
            }
            None => Body::empty(),
        };
        let response = app
            .clone()
            .oneshot(builder.body(body).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_backend() {
        let (app, _) = app();
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["backend"], "LOCAL_EPHEMERAL");
    }

    #[tokio::test]
    async fn test_job_crud() {
        let (app, _) = app();
        let job = json!({"id": "order-1", "payload": {"pair": "BTC/USD"}});

        let (status, _) = call(&app, Method::POST, "/jobs", Some(job.clone())).await;
        assert_eq!(status, StatusCode::CREATED);

        let (status, body) = call(&app, Method::POST, "/jobs", Some(job.clone())).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["success"], false);

        let (status, body) = call(&app, Method::GET, "/jobs/order-1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], job);

        let replaced = json!({"id": "order-1", "payload": {"pair": "ETH/USD"}});
        let (status, _) = call(&app, Method::PUT, "/jobs/order-1", Some(replaced.clone())).await;
        assert_eq!(status, StatusCode::OK);

        let (_, body) = call(&app, Method::GET, "/jobs", None).await;
        assert_eq!(body["data"], json!([replaced]));

        let (status, _) = call(&app, Method::DELETE, "/jobs/order-1", None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = call(&app, Method::GET, "/jobs/order-1", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_put_with_mismatched_id_is_rejected() {
        let (app, _) = app();
        let job = json!({"id": "order-2", "payload": {}});
        let (status, body) = call(&app, Method::PUT, "/jobs/order-1", Some(job)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "id doesn't match endpoint");
    }

    #[tokio::test]
    async fn test_lock_view_is_advisory() {
        let (app, db) = app();

        let (_, body) = call(&app, Method::GET, "/jobs/order-1/lock", None).await;
        assert_eq!(body["data"]["locked"], false);

        let owner = OwnerId::new("instance-a");
        assert!(db
            .locker()
            .acquire("order-1", &owner, db.lock_duration())
            .await
            .unwrap());

        let (_, body) = call(&app, Method::GET, "/jobs/order-1/lock", None).await;
        assert_eq!(body["data"]["locked"], true);
        assert_eq!(body["data"]["owner"], "instance-a");
    }

    #[tokio::test]
    async fn test_storage_outage_maps_to_service_unavailable() {
        let db = Database::from_parts(
            BackendFamily::DurableShared,
            Arc::new(UnreachableStore),
            Duration::from_secs(10),
        );
        let app = router(db);

        let (status, body) = call(&app, Method::GET, "/jobs", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);

        let (status, _) = call(&app, Method::GET, "/jobs/order-1/lock", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

        let job = json!({"id": "order-1", "payload": {}});
        let (status, _) = call(&app, Method::PUT, "/jobs/order-1", Some(job)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }
}
