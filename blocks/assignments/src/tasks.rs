use chrono::Utc;
use lambda_http::http::StatusCode;
use lms_atoms::stats;
use lms_atoms::tasks::{
    self, Actor, AssignTasksPayload, CreateTemplatePayload, Task, TaskTemplate, UpdateTaskPayload,
};
use lms_atoms::users::UserRole;
use lms_atoms::{Result, TaskError};

use crate::respond::{self, parse_body, HandlerResult};
use crate::types::{SubmitTaskRequest, TaskWithPeople};
use crate::Engine;

/// Task joined with its assignee, mentor and submission history.
pub async fn task_with_people(engine: &Engine, task_id: &str) -> Result<TaskWithPeople> {
    let task = tasks::get_task(engine.tasks.as_ref(), task_id).await?;
    let (assignee, mentor, submissions) = tokio::join!(
        engine.users.get_user(&task.assignee_id),
        engine.users.get_user(&task.mentor_id),
        engine.tasks.submissions_for(task_id)
    );
    Ok(TaskWithPeople {
        assignee: assignee?,
        mentor: mentor?,
        submissions: submissions?,
        task,
    })
}

async fn require_mentor(engine: &Engine, user_id: &str) -> Result<()> {
    let user = engine
        .users
        .get_user(user_id)
        .await?
        .ok_or_else(|| TaskError::NotFound(format!("User {}", user_id)))?;
    if user.role() != UserRole::Mentor {
        return Err(TaskError::Forbidden(format!("user {} is not a mentor", user_id)));
    }
    Ok(())
}

// ========== QUERIES ==========

/// List tasks assigned to a user (newest first)
pub async fn list_user_tasks(engine: &Engine, user_id: &str) -> HandlerResult {
    respond::respond(
        tasks::tasks_for_user(engine.tasks.as_ref(), user_id).await,
        StatusCode::OK,
    )
}

/// List every task a mentor owns
pub async fn list_mentor_tasks(engine: &Engine, mentor_id: &str) -> HandlerResult {
    respond::respond(
        tasks::tasks_for_mentor(engine.tasks.as_ref(), mentor_id).await,
        StatusCode::OK,
    )
}

pub async fn get_task(engine: &Engine, task_id: &str) -> HandlerResult {
    respond::respond(task_with_people(engine, task_id).await, StatusCode::OK)
}

// ========== MENTOR ACTIONS ==========

/// Update title/description
pub async fn update_task(engine: &Engine, caller_id: &str, task_id: &str, body: &[u8]) -> HandlerResult {
    let payload: UpdateTaskPayload = match parse_body(body) {
        Ok(payload) => payload,
        Err(e) => return respond::error(&e),
    };
    respond::respond(
        tasks::edit_task(
            engine.tasks.as_ref(),
            task_id,
            caller_id,
            payload,
            engine.config.max_write_attempts,
        )
        .await,
        StatusCode::OK,
    )
}

pub async fn delete_task(engine: &Engine, caller_id: &str, task_id: &str) -> HandlerResult {
    match tasks::delete_task(
        engine.tasks.as_ref(),
        engine.blobs.as_ref(),
        task_id,
        caller_id,
        engine.config.max_write_attempts,
    )
    .await
    {
        Ok(()) => respond::no_content(),
        Err(e) => respond::error(&e),
    }
}

pub async fn mark_incomplete(engine: &Engine, caller_id: &str, task_id: &str) -> HandlerResult {
    let actor = Actor::Mentor(caller_id.to_string());
    respond::respond(
        tasks::mark_incomplete(engine.tasks.as_ref(), task_id, &actor, engine.config.max_write_attempts).await,
        StatusCode::OK,
    )
}

pub async fn reset_pending(engine: &Engine, caller_id: &str, task_id: &str) -> HandlerResult {
    let actor = Actor::Mentor(caller_id.to_string());
    respond::respond(
        tasks::reset_pending(engine.tasks.as_ref(), task_id, &actor, engine.config.max_write_attempts).await,
        StatusCode::OK,
    )
}

pub async fn reopen_task(engine: &Engine, caller_id: &str, task_id: &str) -> HandlerResult {
    respond::respond(
        tasks::reopen(
            engine.tasks.as_ref(),
            engine.blobs.as_ref(),
            task_id,
            caller_id,
            engine.config.pipeline.retain_superseded,
            engine.config.max_write_attempts,
        )
        .await,
        StatusCode::OK,
    )
}

// ========== SUBMISSION ==========

/// Submit evidence. The body names the submitting user, who must be the caller.
pub async fn submit_task(engine: &Engine, caller_id: &str, body: &[u8]) -> HandlerResult {
    respond::respond(submit(engine, caller_id, body).await, StatusCode::OK)
}

async fn submit(engine: &Engine, caller_id: &str, body: &[u8]) -> Result<Task> {
    let request: SubmitTaskRequest = parse_body(body)?;
    let (task_id, user_id, file) = request.into_evidence()?;
    if user_id != caller_id {
        return Err(TaskError::Forbidden(format!(
            "caller {} cannot submit on behalf of {}",
            caller_id, user_id
        )));
    }
    engine.pipeline().submit(&task_id, &user_id, file).await
}

// ========== DISTRIBUTION ==========

/// Direct assignment. 201 when every user was handled, 207 with the per-user
/// failures otherwise.
pub async fn assign_tasks(engine: &Engine, caller_id: &str, body: &[u8]) -> HandlerResult {
    let payload: AssignTasksPayload = match parse_body(body) {
        Ok(payload) => payload,
        Err(e) => return respond::error(&e),
    };
    match engine.distributor().assign_direct(caller_id, payload).await {
        Ok(report) if report.is_complete() => respond::json(StatusCode::CREATED, &report),
        Ok(report) => respond::json(StatusCode::MULTI_STATUS, &report),
        Err(e) => respond::error(&e),
    }
}

/// Scheduled run over HTTP, same contract as the cron lambda.
pub async fn run_distribution(engine: &Engine, period_id: Option<&str>) -> HandlerResult {
    let period_id = period_id
        .map(str::to_string)
        .unwrap_or_else(|| crate::period::iso_week_period(Utc::now()));
    match engine.distributor().run_scheduled(&period_id).await {
        Ok(report) if report.is_complete() => respond::json(StatusCode::OK, &report),
        Ok(report) => respond::json(StatusCode::MULTI_STATUS, &report),
        Err(e) => respond::error(&e),
    }
}

// ========== TEMPLATES ==========

pub async fn create_template(engine: &Engine, caller_id: &str, body: &[u8]) -> HandlerResult {
    respond::respond(new_template(engine, caller_id, body).await, StatusCode::CREATED)
}

async fn new_template(engine: &Engine, caller_id: &str, body: &[u8]) -> Result<TaskTemplate> {
    let payload: CreateTemplatePayload = parse_body(body)?;
    payload.validate()?;
    require_mentor(engine, caller_id).await?;
    let template = payload.into_template(caller_id, Utc::now());
    engine.tasks.put_template(&template).await?;
    tracing::info!(
        template_id = %template.template_id,
        mentor_id = caller_id,
        recurring = template.recurring,
        "Template created"
    );
    Ok(template)
}

pub async fn list_templates(engine: &Engine, caller_id: &str) -> HandlerResult {
    if let Err(e) = require_mentor(engine, caller_id).await {
        return respond::error(&e);
    }
    respond::respond(engine.tasks.list_templates(Some(caller_id)).await, StatusCode::OK)
}

// ========== STATS ==========

pub async fn user_stats(engine: &Engine, user_id: &str) -> HandlerResult {
    respond::respond(
        stats::stats_for_user(engine.tasks.as_ref(), user_id).await,
        StatusCode::OK,
    )
}

pub async fn user_progress(engine: &Engine, user_id: &str) -> HandlerResult {
    respond::respond(
        stats::progress_for_user(engine.tasks.as_ref(), engine.users.as_ref(), user_id).await,
        StatusCode::OK,
    )
}

pub async fn mentor_overview(engine: &Engine, mentor_id: &str) -> HandlerResult {
    respond::respond(
        stats::mentor_overview(engine.tasks.as_ref(), engine.users.as_ref(), mentor_id).await,
        StatusCode::OK,
    )
}
