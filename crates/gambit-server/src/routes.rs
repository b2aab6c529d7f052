//! JSON over HTTP transport of the RPC surface.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use gambit::{
    common::payload::{
        AnonymousTokenRequest, AuthResponse, MigrateCredentialsRequest, ProgressReport,
        ProgressResponse, TaskRequest, TaskResponse,
    },
    AuthService, Code, GambitStore, Status, TaskService,
};
use tower_http::trace::TraceLayer;

#[derive(Debug, Clone)]
struct AppState<S> {
    tasks: TaskService<S>,
    auth: AuthService<S>,
}

/// Build the router serving both services.
pub fn router<S>(tasks: TaskService<S>, auth: AuthService<S>) -> Router
where
    S: GambitStore,
{
    Router::new()
        .route("/v1/auth/migrate", post(migrate_credentials::<S>))
        .route("/v1/auth/anonymous", post(anonymous_token::<S>))
        .route("/v1/tasks/next", post(next_task::<S>))
        .route("/v1/tasks/progress", post(report_progress::<S>))
        .layer(TraceLayer::new_for_http())
        .with_state(AppState { tasks, auth })
}

async fn migrate_credentials<S: GambitStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<MigrateCredentialsRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    Ok(Json(state.auth.migrate_credentials(request).await?))
}

async fn anonymous_token<S: GambitStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<AnonymousTokenRequest>,
) -> Result<Json<AuthResponse>, ApiError> {
    Ok(Json(state.auth.get_anonymous_token(request).await?))
}

async fn next_task<S: GambitStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<TaskRequest>,
) -> Result<Json<TaskResponse>, ApiError> {
    Ok(Json(state.tasks.get_next_task(request).await?))
}

async fn report_progress<S: GambitStore>(
    State(state): State<AppState<S>>,
    Json(request): Json<ProgressReport>,
) -> Result<Json<ProgressResponse>, ApiError> {
    Ok(Json(state.tasks.report_progress(request).await?))
}

struct ApiError(Status);

impl From<Status> for ApiError {
    fn from(status: Status) -> Self {
        Self(status)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (http_status(self.0.code), Json(self.0)).into_response()
    }
}

fn http_status(code: Code) -> StatusCode {
    match code {
        Code::InvalidArgument | Code::FailedPrecondition => StatusCode::BAD_REQUEST,
        Code::Unauthenticated => StatusCode::UNAUTHORIZED,
        Code::NotFound => StatusCode::NOT_FOUND,
        Code::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
        Code::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use gambit::{MemoryStore, SchedulerOptions, TrackerOptions};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;

    fn app() -> Router {
        let store = MemoryStore::new();
        router(
            TaskService::new(
                store.clone(),
                SchedulerOptions::default(),
                TrackerOptions::default(),
            ),
            AuthService::new(store),
        )
    }

    async fn call(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::post(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();

        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn anonymous_token_without_work() {
        let app = app();

        let (status, body) = call(&app, "/v1/auth/anonymous", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        let token = body["token"].as_str().unwrap().to_string();
        assert!(token.starts_with("lc0-"));

        let (status, body) = call(&app, "/v1/tasks/next", json!({ "token": token })).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["code"], "UNAVAILABLE");
    }

    #[tokio::test]
    async fn token_errors_are_mapped() {
        let app = app();

        let (status, body) = call(&app, "/v1/tasks/next", json!({ "token": "abc" })).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "INVALID_ARGUMENT");

        let (status, body) = call(&app, "/v1/tasks/next", json!({ "token": "lc0-unknown" })).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "UNAUTHENTICATED");

        let (status, body) = call(
            &app,
            "/v1/auth/migrate",
            json!({ "username": "", "password": "secret" }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No username supplied");
    }
}
