use chrono::{DateTime, Datelike, Utc};
use lms_atoms::TaskError;

/// ISO-week period id for a scheduled run, e.g. `2026-W42`.
pub fn iso_week_period(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

/// Period ids become part of idempotency keys, so they are kept to a small
/// alphabet and may not collide with the `direct#` namespace.
pub fn validate_period_id(period_id: &str) -> Result<(), TaskError> {
    if period_id.is_empty() || period_id.len() > 32 {
        return Err(TaskError::Validation(
            "period id must be 1-32 characters".to_string(),
        ));
    }
    if !period_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    {
        return Err(TaskError::Validation(format!(
            "period id {:?} may only contain letters, digits, '-' and '_'",
            period_id
        )));
    }
    if period_id.starts_with("direct") {
        return Err(TaskError::Validation(
            "period ids starting with 'direct' are reserved".to_string(),
        ));
    }
    Ok(())
}
