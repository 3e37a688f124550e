use assignments_block::respond::{self, HandlerResult};
use assignments_block::tasks;
use lambda_http::{
    http::{Method, StatusCode},
    Body, Error, Request, RequestExt, Response,
};
use lms_shared::{cors, AppState};
use std::sync::Arc;

fn unauthorized() -> HandlerResult {
    respond::json(
        StatusCode::UNAUTHORIZED,
        &serde_json::json!({"error": "Unauthorized", "message": "Missing X-User-Id header"}),
    )
}

/// Caller identity set by the upstream authorizer.
fn caller_id(event: &Request) -> Option<&str> {
    event
        .headers()
        .get("X-User-Id")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())
}

/// Main Lambda handler - routes task, template, stats and cron requests
pub(crate) async fn function_handler(
    event: Request,
    state: Arc<AppState>,
) -> Result<Response<Body>, Error> {
    let method = event.method();
    let path = event.uri().path();
    let body = event.body();
    let request_origin = event.headers().get("Origin").and_then(|v| v.to_str().ok());
    let allowed_origins = state.config.allowed_origins.as_str();
    tracing::info!(method = %method, path, "API request");

    // Handle CORS preflight
    if method == Method::OPTIONS {
        let resp = Response::builder()
            .status(StatusCode::OK)
            .body(Body::Empty)
            .map_err(Box::new)?;
        return Ok(cors::with_cors_headers(resp, allowed_origins, request_origin));
    }

    let engine = &state.engine;
    let caller = caller_id(&event);
    let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let resp = match (method, parts.as_slice()) {
        // --- TASK QUERIES ---
        (&Method::GET, ["tasks", "user", user_id]) => tasks::list_user_tasks(engine, user_id).await,
        (&Method::GET, ["tasks", "mentor", mentor_id]) => {
            tasks::list_mentor_tasks(engine, mentor_id).await
        }

        // --- SUBMISSION / DISTRIBUTION ---
        // POST /tasks/submit - evidence upload + completion
        (&Method::POST, ["tasks", "submit"]) => match caller {
            Some(caller) => tasks::submit_task(engine, caller, body).await,
            None => unauthorized(),
        },
        // POST /tasks/assign - direct assignment by a mentor
        (&Method::POST, ["tasks", "assign"]) => match caller {
            Some(caller) => tasks::assign_tasks(engine, caller, body).await,
            None => unauthorized(),
        },

        // --- SINGLE TASK ---
        (&Method::GET, ["tasks", task_id]) => tasks::get_task(engine, task_id).await,
        (&Method::PATCH, ["tasks", task_id]) => match caller {
            Some(caller) => tasks::update_task(engine, caller, task_id, body).await,
            None => unauthorized(),
        },
        (&Method::DELETE, ["tasks", task_id]) => match caller {
            Some(caller) => tasks::delete_task(engine, caller, task_id).await,
            None => unauthorized(),
        },
        (&Method::POST, ["tasks", task_id, action]) => match (caller, *action) {
            (None, _) => unauthorized(),
            (Some(caller), "incomplete") => tasks::mark_incomplete(engine, caller, task_id).await,
            (Some(caller), "pending") => tasks::reset_pending(engine, caller, task_id).await,
            (Some(caller), "reopen") => tasks::reopen_task(engine, caller, task_id).await,
            _ => respond::not_found(),
        },

        // --- TEMPLATES ---
        (&Method::GET, ["templates"]) => match caller {
            Some(caller) => tasks::list_templates(engine, caller).await,
            None => unauthorized(),
        },
        (&Method::POST, ["templates"]) => match caller {
            Some(caller) => tasks::create_template(engine, caller, body).await,
            None => unauthorized(),
        },

        // --- STATS ---
        (&Method::GET, ["users", "mentor", mentor_id]) => tasks::mentor_overview(engine, mentor_id).await,
        (&Method::GET, ["users", user_id, "stats"]) => tasks::user_stats(engine, user_id).await,
        (&Method::GET, ["users", user_id, "progress"]) => tasks::user_progress(engine, user_id).await,

        // --- SCHEDULER ---
        // POST /cron/distribute?period=2026-W42
        (&Method::POST, ["cron", "distribute"]) => {
            let params = event.query_string_parameters();
            tasks::run_distribution(engine, params.first("period")).await
        }

        _ => respond::not_found(),
    };

    resp.map(|r| cors::with_cors_headers(r, allowed_origins, request_origin))
}
