mod common;

use std::sync::Arc;

use common::{evidence, Harness};
use lms_atoms::stats::{mentor_overview, stats_for_user, TaskStats};
use lms_atoms::tasks::{self, AssignTasksPayload, TaskStatus};
use lms_atoms::TaskError;
use pretty_assertions::assert_eq;

fn assign(template_id: &str, user_ids: &[&str]) -> AssignTasksPayload {
    AssignTasksPayload {
        template_id: template_id.to_string(),
        user_ids: user_ids.iter().map(|id| id.to_string()).collect(),
    }
}

fn counts(stats: TaskStats) -> (usize, usize, usize, usize) {
    (stats.total, stats.pending, stats.incomplete, stats.completed)
}

#[tokio::test]
async fn test_mentor_assigns_and_one_intern_submits() {
    let h = Harness::new();
    h.mentor("M").await;
    h.intern("A", "M").await;
    h.intern("B", "M").await;
    h.template("T", "M", false).await;

    let report = h
        .engine
        .distributor()
        .assign_direct("M", assign("T", &["A", "B"]))
        .await
        .unwrap();
    assert_eq!(report.created.len(), 2);
    assert!(report.is_complete());
    assert!(report.created.iter().all(|t| t.status() == TaskStatus::Pending));

    let a_task = report.created.iter().find(|t| t.assignee_id == "A").unwrap();
    h.engine.pipeline().submit(&a_task.task_id, "A", evidence("done")).await.unwrap();

    let a = stats_for_user(h.tasks.as_ref(), "A").await.unwrap();
    let b = stats_for_user(h.tasks.as_ref(), "B").await.unwrap();
    assert_eq!(counts(a), (1, 0, 0, 1));
    assert_eq!(counts(b), (1, 1, 0, 0));

    let overview = mentor_overview(h.tasks.as_ref(), h.users.as_ref(), "M").await.unwrap();
    assert_eq!(counts(overview.totals), (2, 1, 0, 1));
    assert_eq!(overview.interns.len(), 2);
}

#[tokio::test]
async fn test_scheduled_run_is_idempotent_per_period() {
    let h = Harness::new();
    h.mentor("M").await;
    h.intern("A", "M").await;
    h.intern("B", "M").await;
    h.template("weekly", "M", true).await;

    let first = h.engine.distributor().run_scheduled("W1").await.unwrap();
    assert_eq!(first.created.len(), 2);
    let after_first = h.tasks.all_tasks().await;

    let again = h.engine.distributor().run_scheduled("W1").await.unwrap();
    assert!(again.created.is_empty());
    assert_eq!(again.skipped.len(), 2);
    assert_eq!(h.tasks.all_tasks().await, after_first);

    let next = h.engine.distributor().run_scheduled("W2").await.unwrap();
    assert_eq!(next.created.len(), 2);
    assert_eq!(h.tasks.task_count().await, 4);
    assert!(next
        .created
        .iter()
        .all(|t| t.period_id.as_deref() == Some("W2")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_scheduled_runs_create_each_task_once() {
    let h = Arc::new(Harness::new());
    h.mentor("M").await;
    for intern in ["A", "B", "C"] {
        h.intern(intern, "M").await;
    }
    h.template("weekly", "M", true).await;

    let runs: Vec<_> = (0..4)
        .map(|_| {
            let h = h.clone();
            tokio::spawn(async move { h.engine.distributor().run_scheduled("2026-W42").await })
        })
        .collect();

    let mut created = 0;
    for run in runs {
        created += run.await.unwrap().unwrap().created.len();
    }
    assert_eq!(created, 3);
    assert_eq!(h.tasks.task_count().await, 3);
}

#[tokio::test]
async fn test_scheduled_run_skips_one_off_templates_and_other_mentors() {
    let h = Harness::new();
    h.mentor("M").await;
    h.mentor("N").await;
    h.intern("A", "M").await;
    h.intern("Z", "N").await;
    h.template("weekly", "M", true).await;
    h.template("once", "M", false).await;

    let report = h.engine.distributor().run_scheduled("W1").await.unwrap();

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].assignee_id, "A");
    assert_eq!(report.created[0].template_id, "weekly");
    assert_eq!(tasks::tasks_for_user(h.tasks.as_ref(), "Z").await.unwrap().len(), 0);
}

#[tokio::test]
async fn test_scheduled_run_rejects_bad_period() {
    let h = Harness::new();
    let err = h.engine.distributor().run_scheduled("direct#1").await.unwrap_err();
    assert_eq!(err.kind(), "Validation");
}

#[tokio::test]
async fn test_partial_batch_keeps_successful_assignments() {
    let h = Harness::new();
    h.mentor("M").await;
    h.mentor("N").await;
    h.intern("A", "M").await;
    h.intern("X", "N").await;
    h.template("T", "M", false).await;

    let report = h
        .engine
        .distributor()
        .assign_direct("M", assign("T", &["A", "ghost", "X"]))
        .await
        .unwrap();

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].assignee_id, "A");
    let mut failed: Vec<(&str, &str)> = report
        .failures
        .iter()
        .map(|f| (f.user_id.as_str(), f.kind))
        .collect();
    failed.sort();
    assert_eq!(failed, vec![("X", "Forbidden"), ("ghost", "NotFound")]);

    match report.into_result() {
        Err(TaskError::PartialBatchFailure {
            failures,
            unreached,
            committed,
        }) => {
            assert_eq!(committed, 1);
            assert_eq!(failures.len(), 2);
            assert!(unreached.is_empty());
        }
        other => panic!("expected partial batch failure, got {:?}", other),
    }
    assert_eq!(h.tasks.task_count().await, 1);
}

#[tokio::test]
async fn test_direct_assignment_requires_template_owner() {
    let h = Harness::new();
    h.mentor("M").await;
    h.mentor("N").await;
    h.intern("A", "M").await;
    h.template("T", "M", false).await;

    let err = h
        .engine
        .distributor()
        .assign_direct("N", assign("T", &["A"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "Forbidden");

    let err = h
        .engine
        .distributor()
        .assign_direct("M", assign("missing", &["A"]))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "NotFound");
    assert_eq!(h.tasks.task_count().await, 0);
}

#[tokio::test]
async fn test_direct_assignment_skips_active_and_duplicates() {
    let h = Harness::new();
    h.mentor("M").await;
    h.intern("A", "M").await;
    h.template("T", "M", false).await;
    let distributor = h.engine.distributor();

    let first = distributor.assign_direct("M", assign("T", &["A", "A", " A "])).await.unwrap();
    assert_eq!(first.created.len(), 1);

    let second = distributor.assign_direct("M", assign("T", &["A"])).await.unwrap();
    assert!(second.created.is_empty());
    assert_eq!(second.skipped, vec!["A".to_string()]);

    // Once completed, the template can be handed out again.
    let task_id = first.created[0].task_id.clone();
    h.engine.pipeline().submit(&task_id, "A", evidence("done")).await.unwrap();
    let third = distributor.assign_direct("M", assign("T", &["A"])).await.unwrap();
    assert_eq!(third.created.len(), 1);
    assert_eq!(third.created[0].period_id.as_deref(), Some("direct#1"));
    assert_eq!(h.tasks.task_count().await, 2);
}

#[tokio::test]
async fn test_deleted_direct_assignment_can_be_reassigned() {
    let h = Harness::new();
    h.mentor("M").await;
    h.intern("A", "M").await;
    h.template("T", "M", false).await;

    let first = h
        .engine
        .distributor()
        .assign_direct("M", assign("T", &["A"]))
        .await
        .unwrap();
    let task_id = first.created[0].task_id.clone();
    tasks::delete_task(h.tasks.as_ref(), h.blobs.as_ref(), &task_id, "M", 3).await.unwrap();

    let again = h
        .engine
        .distributor()
        .assign_direct("M", assign("T", &["A"]))
        .await
        .unwrap();
    assert_eq!(again.created.len(), 1);
    assert_ne!(again.created[0].task_id, task_id);
}

#[tokio::test]
async fn test_deleted_scheduled_task_is_not_resurrected() {
    let h = Harness::new();
    h.mentor("M").await;
    h.intern("A", "M").await;
    h.template("weekly", "M", true).await;

    let run = h.engine.distributor().run_scheduled("W1").await.unwrap();
    let task_id = run.created[0].task_id.clone();
    tasks::delete_task(h.tasks.as_ref(), h.blobs.as_ref(), &task_id, "M", 3).await.unwrap();

    let rerun = h.engine.distributor().run_scheduled("W1").await.unwrap();
    assert!(rerun.created.is_empty());
    assert_eq!(h.tasks.task_count().await, 0);
}

#[tokio::test]
async fn test_unreachable_mentor_is_reported_apart_from_users() {
    let h = Harness::new();
    h.mentor("M").await;
    h.mentor("N").await;
    h.intern("A", "M").await;
    h.intern("Z", "N").await;
    h.template("weekly-m", "M", true).await;
    h.template("weekly-n", "N", true).await;
    h.faults.unreachable("N");

    let report = h.engine.distributor().run_scheduled("W1").await.unwrap();

    assert_eq!(report.created.len(), 1);
    assert_eq!(report.created[0].assignee_id, "A");
    assert!(report.failures.is_empty());
    assert_eq!(report.unreached.len(), 1);
    assert_eq!(report.unreached[0].mentor_id, "N");
    assert_eq!(report.unreached[0].kind, "StoreFailure");
    assert!(!report.is_complete());
    // One listing for M, every allowed attempt for N.
    assert_eq!(h.faults.list_calls(), 1 + 3);

    match report.into_result() {
        Err(TaskError::PartialBatchFailure {
            failures,
            unreached,
            committed,
        }) => {
            assert!(failures.is_empty());
            assert_eq!(unreached.len(), 1);
            assert_eq!(committed, 1);
        }
        other => panic!("expected partial batch failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_insert_applied_before_store_error_counts_as_created() {
    let h = Harness::new();
    h.mentor("M").await;
    h.intern("A", "M").await;
    h.template("T", "M", false).await;
    h.faults.lose_insert_acks(1);

    let report = h
        .engine
        .distributor()
        .assign_direct("M", assign("T", &["A"]))
        .await
        .unwrap();

    assert_eq!(report.created.len(), 1);
    assert!(report.skipped.is_empty());
    assert!(report.is_complete());
    assert_eq!(h.tasks.task_count().await, 1);

    let again = h
        .engine
        .distributor()
        .assign_direct("M", assign("T", &["A"]))
        .await
        .unwrap();
    assert_eq!(again.skipped, vec!["A".to_string()]);
}
