use assignments_block::period::iso_week_period;
use assignments_block::types::DistributionSummary;
use chrono::{DateTime, Utc};
use lambda_runtime::{Error, LambdaEvent};
use lms_shared::AppState;
use serde::Deserialize;
use std::sync::Arc;

/// The parts of an EventBridge scheduled event the distributor needs. A rule
/// may pin the period through a constant `detail`.
#[derive(Debug, Default, Deserialize)]
pub struct ScheduleEvent {
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub detail: ScheduleDetail,
}

#[derive(Debug, Default, Deserialize)]
pub struct ScheduleDetail {
    #[serde(default)]
    pub period_id: Option<String>,
}

impl ScheduleEvent {
    /// Explicit period, else the ISO week the event fired in.
    pub fn period_id(&self, now: DateTime<Utc>) -> String {
        match &self.detail.period_id {
            Some(period) if !period.trim().is_empty() => period.trim().to_string(),
            _ => iso_week_period(self.time.unwrap_or(now)),
        }
    }
}

pub(crate) async fn function_handler(
    event: LambdaEvent<ScheduleEvent>,
    state: Arc<AppState>,
) -> Result<DistributionSummary, Error> {
    let period_id = event.payload.period_id(Utc::now());
    tracing::info!(period_id = %period_id, request_id = %event.context.request_id, "Scheduled distribution triggered");

    let report = state.engine.distributor().run_scheduled(&period_id).await?;
    for failure in &report.failures {
        tracing::warn!(user_id = %failure.user_id, kind = failure.kind, reason = %failure.reason, "Assignment failed");
    }
    for failure in &report.unreached {
        tracing::warn!(mentor_id = %failure.mentor_id, kind = failure.kind, reason = %failure.reason, "Interns not reachable");
    }

    // A partial run is still a successful invocation: the next trigger for the
    // same period picks up the users that failed.
    Ok(DistributionSummary {
        period_id,
        created: report.created.len(),
        skipped: report.skipped.len(),
        failed: report.failures.len(),
        unreached_mentors: report.unreached.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_period_from_event_time() {
        let event: ScheduleEvent = serde_json::from_str(
            r#"{"id":"abc","detail-type":"Scheduled Event","source":"aws.events","time":"2026-10-17T08:00:00Z","detail":{}}"#,
        )
        .unwrap();
        let now = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(event.period_id(now), "2026-W42");
    }

    #[test]
    fn test_explicit_period_wins() {
        let event: ScheduleEvent =
            serde_json::from_str(r#"{"detail":{"period_id":"sprint-7"}}"#).unwrap();
        assert_eq!(event.period_id(Utc::now()), "sprint-7");
    }

    #[test]
    fn test_empty_event_uses_now() {
        let event: ScheduleEvent = serde_json::from_str("{}").unwrap();
        let now = Utc.with_ymd_and_hms(2026, 1, 5, 0, 0, 0).unwrap();
        assert_eq!(event.period_id(now), "2026-W02");
    }
}
