use lambda_http::{http::StatusCode, Body, Error, Response};
use lms_atoms::TaskError;
use serde::Serialize;

pub type HandlerResult = Result<Response<Body>, Error>;

pub fn status_for(err: &TaskError) -> StatusCode {
    match err {
        TaskError::NotFound(_) => StatusCode::NOT_FOUND,
        TaskError::Forbidden(_) => StatusCode::FORBIDDEN,
        TaskError::AlreadyCompleted(_)
        | TaskError::ConcurrentModification(_)
        | TaskError::InvalidTransition { .. } => StatusCode::CONFLICT,
        TaskError::StorageFailure(_) => StatusCode::SERVICE_UNAVAILABLE,
        TaskError::PartialBatchFailure { .. } => StatusCode::MULTI_STATUS,
        TaskError::Validation(_) => StatusCode::BAD_REQUEST,
        TaskError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn json<T: Serialize>(status: StatusCode, value: &T) -> HandlerResult {
    Ok(Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .body(serde_json::to_string(value)?.into())
        .map_err(Box::new)?)
}

pub fn no_content() -> HandlerResult {
    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::Empty)
        .map_err(Box::new)?)
}

/// `{ "error": kind, "message": ... }`, plus the per-user failures of a batch.
pub fn error(err: &TaskError) -> HandlerResult {
    let status = status_for(err);
    if status.is_server_error() {
        tracing::error!(kind = err.kind(), error = %err, "Request failed");
    } else {
        tracing::warn!(kind = err.kind(), error = %err, "Request rejected");
    }

    let mut body = serde_json::json!({
        "error": err.kind(),
        "message": err.to_string(),
    });
    if let TaskError::PartialBatchFailure {
        failures,
        unreached,
        committed,
    } = err
    {
        body["failures"] = serde_json::to_value(failures)?;
        body["unreached"] = serde_json::to_value(unreached)?;
        body["committed"] = (*committed).into();
    }
    json(status, &body)
}

pub fn respond<T: Serialize>(result: lms_atoms::Result<T>, status: StatusCode) -> HandlerResult {
    match result {
        Ok(value) => json(status, &value),
        Err(e) => error(&e),
    }
}

pub fn not_found() -> HandlerResult {
    json(StatusCode::NOT_FOUND, &serde_json::json!({"error": "Not found"}))
}

/// Parse a JSON body; malformed or unknown fields are a `Validation` error.
pub fn parse_body<T: serde::de::DeserializeOwned>(body: &[u8]) -> lms_atoms::Result<T> {
    serde_json::from_slice(body).map_err(|e| TaskError::Validation(format!("Invalid JSON body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use lms_atoms::{AssignmentFailure, MentorFailure};

    fn body_json(resp: Response<Body>) -> serde_json::Value {
        serde_json::from_slice(resp.body().as_ref()).unwrap()
    }

    #[test]
    fn test_error_kinds_map_to_status() {
        assert_eq!(status_for(&TaskError::NotFound("Task t".into())), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&TaskError::Forbidden("x".into())), StatusCode::FORBIDDEN);
        assert_eq!(status_for(&TaskError::AlreadyCompleted("t".into())), StatusCode::CONFLICT);
        assert_eq!(
            status_for(&TaskError::StorageFailure("s3".into())),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(status_for(&TaskError::Validation("x".into())), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_partial_batch_body_lists_failures() {
        let err = TaskError::PartialBatchFailure {
            failures: vec![AssignmentFailure {
                user_id: "u9".into(),
                kind: "NotFound",
                reason: "User u9 not found".into(),
            }],
            unreached: vec![MentorFailure {
                mentor_id: "m2".into(),
                kind: "StoreFailure",
                reason: "Task store error: timeout".into(),
            }],
            committed: 2,
        };
        let resp = error(&err).unwrap();
        assert_eq!(resp.status(), StatusCode::MULTI_STATUS);
        let body = body_json(resp);
        assert_eq!(body["error"], "PartialBatchFailure");
        assert_eq!(body["committed"], 2);
        assert_eq!(body["failures"][0]["user_id"], "u9");
        assert_eq!(body["unreached"][0]["mentor_id"], "m2");
    }

    #[test]
    fn test_parse_body_rejects_garbage() {
        let err = parse_body::<lms_atoms::tasks::AssignTasksPayload>(b"{not json").unwrap_err();
        assert_eq!(err.kind(), "Validation");
    }
}
