//! Task Server HTTP API (§4.5, §6's endpoint table).

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use repair_core::error::RepairError;
use repair_core::event::{CodeHost, ErrorBody, Frame, IncidentEvent, RepoRef, ServiceRef};
use repair_core::trace::TaskKind;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::runner::{Job, PrCommentJob};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/tasks", post(create_task))
        .route("/v1/pr-comments", post(create_pr_comment_task))
        .route("/v1/webhooks/github", post(github_webhook))
        .route("/v1/debug/retrieval", post(debug_retrieval))
        .route("/v1/tasks/{id}", get(get_task))
        .route("/v1/traces", get(list_traces))
        .route("/v1/traces/{id}", get(get_trace))
        .route("/v1/bug-cases", get(list_bug_cases))
        .route("/v1/bug-cases/{id}", get(get_bug_case))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

impl IntoResponse for RepairError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            RepairError::Validation(_) | RepairError::PathViolation(_) => StatusCode::BAD_REQUEST,
            RepairError::Auth(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        // Validation/PathViolation carry a specific, stable reason string
        // (e.g. "fingerprint_required") that callers match on; other
        // variants fall back to the coarse taxonomy bucket.
        let error = match &self {
            RepairError::Validation(reason) | RepairError::PathViolation(reason) => reason.clone(),
            _ => self.kind().to_string(),
        };
        (status, Json(json!({ "error": error }))).into_response()
    }
}

fn check_api_key(state: &AppState, headers: &HeaderMap) -> Result<(), RepairError> {
    let Some(expected) = &state.config.server_api_key else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|v| v.to_str().ok());
    if provided == Some(expected.as_str()) {
        Ok(())
    } else {
        Err(RepairError::Auth("missing or invalid X-API-Key".to_string()))
    }
}

#[derive(Debug, Serialize)]
struct TaskCreatedResponse {
    task_id: String,
}

async fn create_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, RepairError> {
    check_api_key(&state, &headers)?;
    let event = parse_incident_event(&body)?;
    event.validate()?;
    let task_id = state.enqueue(TaskKind::Event, Job::Event(Box::new(event)));
    info!(task_id = %task_id, "enqueued incident event");
    Ok((StatusCode::OK, Json(TaskCreatedResponse { task_id })))
}

/// Reads the incident envelope out of a raw JSON body field-by-field,
/// the way `ApiHandler.do_POST`'s `body.get(key, ...)` does, so a
/// structurally missing key and an explicit empty value hit the exact
/// same `IncidentEvent::validate()` branch instead of a field missing
/// from the body failing at deserialization with a differently-shaped
/// error.
fn parse_incident_event(body: &Value) -> Result<IncidentEvent, RepairError> {
    let repo = &body["repo"];
    let service = &body["service"];
    let error = &body["error"];

    let frames = match &error["frames"] {
        Value::Null => Vec::new(),
        Value::Array(items) => items
            .iter()
            .map(|f| Frame {
                file: f["file"].as_str().unwrap_or_default().to_string(),
                function: f["function"].as_str().unwrap_or_default().to_string(),
            })
            .collect(),
        _ => return Err(RepairError::Validation("frames_must_be_list".to_string())),
    };

    let code_host = match repo["code_host"].as_str() {
        Some("gitlab") => CodeHost::Gitlab,
        _ => CodeHost::Github,
    };

    Ok(IncidentEvent {
        schema_version: body["schema_version"].as_str().unwrap_or_default().to_string(),
        event_id: body["event_id"].as_str().unwrap_or_default().to_string(),
        occurred_at: body["occurred_at"].as_i64().unwrap_or_default(),
        repo: RepoRef {
            repo_url: repo["repo_url"].as_str().unwrap_or_default().to_string(),
            code_host,
            default_branch: repo["default_branch"].as_str().unwrap_or("main").to_string(),
        },
        service: ServiceRef {
            name: service["name"].as_str().unwrap_or_default().to_string(),
            environment: service["environment"].as_str().unwrap_or_default().to_string(),
        },
        error: ErrorBody {
            exception_type: error["exception_type"].as_str().unwrap_or_default().to_string(),
            message_key: error["message_key"].as_str().unwrap_or_default().to_string(),
            fingerprint: error["fingerprint"].as_str().unwrap_or_default().to_string(),
            frames,
            raw_excerpt: error["raw_excerpt"].as_str().unwrap_or_default().to_string(),
        },
    })
}

#[derive(Debug, Deserialize)]
struct PrCommentRequest {
    repo_url: String,
    #[serde(default)]
    pr_number: u64,
    comment: String,
    #[serde(default)]
    code_host: Option<repair_core::event::CodeHost>,
    #[serde(default = "default_branch")]
    default_branch: String,
}

fn default_branch() -> String {
    "main".to_string()
}

async fn create_pr_comment_task(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<PrCommentRequest>,
) -> Result<impl IntoResponse, RepairError> {
    check_api_key(&state, &headers)?;
    if request.repo_url.trim().is_empty() || request.comment.trim().is_empty() {
        return Err(RepairError::Validation("repo_url_and_comment_required".to_string()));
    }
    let code_host = request.code_host.unwrap_or(repair_core::event::CodeHost::Github);
    let job = PrCommentJob {
        repo_url: request.repo_url,
        pr_number: request.pr_number,
        comment: request.comment,
        code_host: match code_host {
            repair_core::event::CodeHost::Github => repair_config::CodeHostKind::Github,
            repair_core::event::CodeHost::Gitlab => repair_config::CodeHostKind::Gitlab,
        },
        default_branch: request.default_branch,
    };
    let task_id = state.enqueue(TaskKind::PrComment, Job::PrComment(job));
    info!(task_id = %task_id, "enqueued pr-comment event");
    Ok((StatusCode::OK, Json(TaskCreatedResponse { task_id })))
}

async fn github_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, RepairError> {
    if let Some(secret) = &state.config.github_webhook_secret {
        let signature = headers
            .get("x-hub-signature-256")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RepairError::Auth("missing X-Hub-Signature-256".to_string()))?;
        if !crate::webhook::verify_signature(secret, signature, &body) {
            return Err(RepairError::Auth("signature mismatch".to_string()));
        }
    }

    let event_name = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();

    let payload: Value = serde_json::from_slice(&body)
        .map_err(|e| RepairError::Validation(format!("invalid webhook payload: {e}")))?;

    let Some(extracted) = crate::webhook::extract_comment(&event_name, &payload, state.config.pr_comment_command_prefix.as_deref())
    else {
        return Ok((StatusCode::OK, Json(json!({ "status": "ignored" }))));
    };

    let job = PrCommentJob {
        repo_url: extracted.repo_url,
        pr_number: extracted.pr_number,
        comment: extracted.comment,
        code_host: state.config.code_host,
        default_branch: default_branch(),
    };
    let task_id = state.enqueue(TaskKind::PrComment, Job::PrComment(job));
    info!(task_id = %task_id, %event_name, "enqueued pr-comment from webhook");
    Ok((StatusCode::OK, Json(json!({ "task_id": task_id }))))
}

#[derive(Debug, Deserialize)]
struct DebugRetrievalRequest {
    error_content: String,
}

async fn debug_retrieval(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<DebugRetrievalRequest>,
) -> Result<impl IntoResponse, RepairError> {
    check_api_key(&state, &headers)?;
    let (signature, exception_type, message_key, frames) = repair_core::extract::query_features(&request.error_content);
    let matches = state.store.search_similar_cases("", &request.error_content, 5)?;
    Ok(Json(json!({
        "signature": signature,
        "exception_type": exception_type,
        "message_key": message_key,
        "frames": frames,
        "matches": matches,
    })))
}

async fn get_task(State(state): State<Arc<AppState>>, Path(task_id): Path<String>) -> impl IntoResponse {
    match state.get_task(&task_id) {
        Some(task) => (StatusCode::OK, Json(task)).into_response(),
        None => (StatusCode::NOT_FOUND, Json(json!({ "error": "task_not_found" }))).into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TraceListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
    repo_url: Option<String>,
    status: Option<String>,
}

async fn list_traces(
    State(state): State<Arc<AppState>>,
    Query(q): Query<TraceListQuery>,
) -> Result<impl IntoResponse, RepairError> {
    let (items, total) = state.store.list_traces(
        q.repo_url.as_deref(),
        q.status.as_deref(),
        q.limit.unwrap_or(repair_core::trace::DEFAULT_PAGE_LIMIT),
        q.offset.unwrap_or(0),
    )?;
    Ok(Json(json!({ "items": items, "total": total })))
}

async fn get_trace(State(state): State<Arc<AppState>>, Path(trace_id): Path<String>) -> Result<impl IntoResponse, RepairError> {
    let Some((trace, steps)) = state.store.get_trace(&trace_id)? else {
        return Ok((StatusCode::NOT_FOUND, Json(json!({ "error": "trace_not_found" }))));
    };
    let top_match = state
        .store
        .search_similar_cases(&trace.repo_url, &trace.error_excerpt, 1)?
        .into_iter()
        .next();
    Ok((StatusCode::OK, Json(json!({ "trace": trace, "steps": steps, "top_match": top_match }))))
}

#[derive(Debug, Deserialize)]
struct BugCaseListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
    repo_url: Option<String>,
    q: Option<String>,
}

async fn list_bug_cases(
    State(state): State<Arc<AppState>>,
    Query(q): Query<BugCaseListQuery>,
) -> Result<impl IntoResponse, RepairError> {
    let (items, total) = state.store.query_bug_cases(
        q.repo_url.as_deref(),
        q.q.as_deref(),
        q.limit.unwrap_or(repair_core::trace::DEFAULT_PAGE_LIMIT),
        q.offset.unwrap_or(0),
    )?;
    Ok(Json(json!({ "items": items, "total": total })))
}

async fn get_bug_case(State(state): State<Arc<AppState>>, Path(case_id): Path<String>) -> Result<impl IntoResponse, RepairError> {
    match state.store.get_bug_case(&case_id)? {
        Some((case, revisions)) => Ok((StatusCode::OK, Json(json!({ "case": case, "revisions": revisions })))),
        None => {
            warn!(case_id, "bug case not found");
            Ok((StatusCode::NOT_FOUND, Json(json!({ "error": "bug_case_not_found" }))))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use repair_fixer::CliFixerAdapter;
    use repair_notify::Notifier;
    use repair_store::TraceStore;
    use repair_workspace::WorkspaceManager;
    use tower::ServiceExt;

    fn test_state() -> Arc<AppState> {
        let store = TraceStore::open_in_memory().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        let workspaces = WorkspaceManager::new(tmp.path()).unwrap();
        let fixer: Arc<dyn repair_fixer::FixerAdapter> = Arc::new(CliFixerAdapter::new(vec!["true".to_string()]));
        let config = repair_config_for_test();
        AppState::new(config, store, workspaces, fixer, Notifier::disabled())
    }

    fn repair_config_for_test() -> repair_config::ServerConfig {
        std::env::set_var("EMAIL_ENABLED", "false");
        std::env::set_var("GITHUB_TOKEN", "test-token");
        let config = repair_config::ServerConfig::from_env().unwrap();
        std::env::remove_var("EMAIL_ENABLED");
        std::env::remove_var("GITHUB_TOKEN");
        config
    }

    #[tokio::test]
    async fn rejects_task_with_missing_fingerprint() {
        let state = test_state();
        let app = build_router(state);
        let body = json!({
            "schema_version": "1.0",
            "event_id": "evt-1",
            "occurred_at": 1_700_000_000,
            "repo": {"repo_url": "https://github.com/acme/widgets", "code_host": "github", "default_branch": "main"},
            "service": {"name": "widgets-api", "environment": "prod"},
            "error": {"exception_type": "ValueError", "message_key": "bad", "fingerprint": "", "frames": [], "raw_excerpt": "boom"},
        });
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/tasks")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!({ "error": "fingerprint_required" }));
    }

    #[tokio::test]
    async fn rejects_task_with_structurally_missing_event_id() {
        let state = test_state();
        let app = build_router(state);
        // `event_id` key is absent entirely, not just empty — must hit the
        // same validation branch as an explicit "".
        let body = json!({
            "schema_version": "1.0",
            "occurred_at": 1_700_000_000,
            "repo": {"repo_url": "https://github.com/acme/widgets", "code_host": "github", "default_branch": "main"},
            "service": {"name": "widgets-api", "environment": "prod"},
            "error": {"exception_type": "ValueError", "message_key": "bad", "fingerprint": "abc123", "frames": [], "raw_excerpt": "boom"},
        });
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/v1/tasks")
            .header("content-type", "application/json")
            .body(axum::body::Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let parsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed, json!({ "error": "event_id_required" }));
    }

    #[tokio::test]
    async fn get_task_404s_for_unknown_id() {
        let state = test_state();
        let app = build_router(state);
        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/v1/tasks/does-not-exist")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn lists_traces_empty_store() {
        let state = test_state();
        let app = build_router(state);
        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/v1/traces")
            .body(axum::body::Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
