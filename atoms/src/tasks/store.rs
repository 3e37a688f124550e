use async_trait::async_trait;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{Delete, DeleteRequest, Put, TransactWriteItem, Update, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use std::collections::HashMap;
use std::time::Duration;

use super::model::{
    IdempotencyKey, Submission, SubmissionRef, Task, TaskState, TaskStatus, TaskTemplate,
};
use crate::dynamo::{self, num_value, str_value, time_value, Item};
use crate::error::{Result, TaskError};
use crate::media::model::BlobRef;
use crate::store::{Superseded, TaskFilter, TaskStore, TaskWrite};

/// DynamoDB-backed task store (single table, see `crate::dynamo`).
#[derive(Clone)]
pub struct DynamoTaskStore {
    client: DynamoClient,
    table_name: String,
}

impl DynamoTaskStore {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn task_pk(task_id: &str) -> String {
    format!("TASK#{}", task_id)
}

fn submission_sk(submission_id: &str) -> String {
    format!("SUBMISSION#{}", submission_id)
}

fn build_err<E: std::fmt::Display>(e: E) -> TaskError {
    TaskError::Store(format!("DynamoDB request build error: {}", e))
}

fn task_to_item(task: &Task) -> Item {
    let pk = task_pk(&task.task_id);
    let mut item: Item = HashMap::new();
    item.insert("PK".into(), str_value(pk.clone()));
    item.insert("SK".into(), str_value(pk));
    item.insert("GSI1PK".into(), str_value(format!("ASSIGNEE#{}", task.assignee_id)));
    item.insert(
        "GSI1SK".into(),
        str_value(format!("TASK#{}#{}", task.created_at.to_rfc3339(), task.task_id)),
    );
    item.insert("GSI2PK".into(), str_value(format!("MENTOR#{}", task.mentor_id)));
    item.insert("GSI2SK".into(), str_value(format!("TASK#{}", task.task_id)));
    item.insert("template_id".into(), str_value(&task.template_id));
    item.insert("title".into(), str_value(&task.title));
    item.insert("description".into(), str_value(&task.description));
    item.insert("assignee_id".into(), str_value(&task.assignee_id));
    item.insert("mentor_id".into(), str_value(&task.mentor_id));
    item.insert("status".into(), str_value(task.status().as_str()));
    if let Some(sub) = task.submission() {
        item.insert("submission_id".into(), str_value(&sub.submission_id));
        item.insert("blob_key".into(), str_value(&sub.blob.key));
        item.insert("blob_url".into(), str_value(&sub.blob.url));
        item.insert("blob_size".into(), num_value(sub.blob.size_bytes));
        item.insert("blob_sha256".into(), str_value(&sub.blob.sha256));
        item.insert("blob_content_type".into(), str_value(&sub.blob.content_type));
    }
    if let Some(period_id) = &task.period_id {
        item.insert("period_id".into(), str_value(period_id));
    }
    if let Some(due_at) = &task.due_at {
        item.insert("due_at".into(), time_value(due_at));
    }
    item.insert("version".into(), num_value(task.version));
    item.insert("created_at".into(), time_value(&task.created_at));
    item.insert("transitioned_at".into(), time_value(&task.transitioned_at));
    item
}

fn blob_from_item(item: &Item) -> BlobRef {
    BlobRef {
        key: dynamo::s_or_default(item, "blob_key"),
        url: dynamo::s_or_default(item, "blob_url"),
        size_bytes: dynamo::n(item, "blob_size").unwrap_or(0),
        sha256: dynamo::s_or_default(item, "blob_sha256"),
        content_type: dynamo::s_or_default(item, "blob_content_type"),
    }
}

fn task_from_item(item: &Item) -> Result<Task> {
    let task_id = dynamo::s(item, "PK")
        .and_then(|pk| pk.strip_prefix("TASK#").map(|id| id.to_string()))
        .ok_or_else(|| TaskError::Store("task item without TASK# key".to_string()))?;

    // Items written before status was tracked have no attribute: never acted on.
    let status = dynamo::s(item, "status")
        .and_then(|raw| TaskStatus::parse(&raw))
        .unwrap_or(TaskStatus::Pending);

    let state = match status {
        TaskStatus::Pending => TaskState::Pending,
        TaskStatus::Incomplete => TaskState::Incomplete,
        TaskStatus::Completed => {
            let submission_id = dynamo::s(item, "submission_id").ok_or_else(|| {
                TaskError::Store(format!("task {} is completed without a submission", task_id))
            })?;
            TaskState::Completed(SubmissionRef {
                submission_id,
                blob: blob_from_item(item),
            })
        }
    };

    let created_at = dynamo::time(item, "created_at")
        .ok_or_else(|| TaskError::Store(format!("task {} has no created_at", task_id)))?;

    Ok(Task {
        template_id: dynamo::s_or_default(item, "template_id"),
        title: dynamo::s_or_default(item, "title"),
        description: dynamo::s_or_default(item, "description"),
        assignee_id: dynamo::s_or_default(item, "assignee_id"),
        mentor_id: dynamo::s_or_default(item, "mentor_id"),
        state,
        period_id: dynamo::s(item, "period_id"),
        due_at: dynamo::time(item, "due_at"),
        version: dynamo::n(item, "version").unwrap_or(0),
        transitioned_at: dynamo::time(item, "transitioned_at").unwrap_or(created_at),
        created_at,
        task_id,
    })
}

fn submission_to_item(sub: &Submission) -> Item {
    let mut item: Item = HashMap::new();
    item.insert("PK".into(), str_value(task_pk(&sub.task_id)));
    item.insert("SK".into(), str_value(submission_sk(&sub.submission_id)));
    item.insert("user_id".into(), str_value(&sub.user_id));
    item.insert("blob_key".into(), str_value(&sub.blob.key));
    item.insert("blob_url".into(), str_value(&sub.blob.url));
    item.insert("blob_size".into(), num_value(sub.blob.size_bytes));
    item.insert("blob_sha256".into(), str_value(&sub.blob.sha256));
    item.insert("blob_content_type".into(), str_value(&sub.blob.content_type));
    item.insert("submitted_at".into(), time_value(&sub.submitted_at));
    if let Some(at) = &sub.superseded_at {
        item.insert("superseded_at".into(), time_value(at));
    }
    item
}

fn submission_from_item(task_id: &str, item: &Item) -> Option<Submission> {
    let submission_id = dynamo::s(item, "SK")?
        .strip_prefix("SUBMISSION#")?
        .to_string();
    Some(Submission {
        submission_id,
        task_id: task_id.to_string(),
        user_id: dynamo::s_or_default(item, "user_id"),
        blob: blob_from_item(item),
        submitted_at: dynamo::time(item, "submitted_at")?,
        superseded_at: dynamo::time(item, "superseded_at"),
    })
}

fn template_to_item(template: &TaskTemplate) -> Item {
    let mut item: Item = HashMap::new();
    item.insert("PK".into(), str_value("TEMPLATE"));
    item.insert("SK".into(), str_value(format!("TEMPLATE#{}", template.template_id)));
    item.insert("mentor_id".into(), str_value(&template.mentor_id));
    item.insert("title".into(), str_value(&template.title));
    item.insert("description".into(), str_value(&template.description));
    item.insert(
        "recurring".into(),
        aws_sdk_dynamodb::types::AttributeValue::Bool(template.recurring),
    );
    if let Some(days) = template.due_in_days {
        item.insert("due_in_days".into(), num_value(days));
    }
    item.insert("created_at".into(), time_value(&template.created_at));
    item
}

fn template_from_item(item: &Item) -> Option<TaskTemplate> {
    let template_id = dynamo::s(item, "SK")?.strip_prefix("TEMPLATE#")?.to_string();
    Some(TaskTemplate {
        template_id,
        mentor_id: dynamo::s_or_default(item, "mentor_id"),
        title: dynamo::s_or_default(item, "title"),
        description: dynamo::s_or_default(item, "description"),
        recurring: dynamo::b(item, "recurring"),
        due_in_days: dynamo::n(item, "due_in_days"),
        created_at: dynamo::time(item, "created_at")?,
    })
}

impl DynamoTaskStore {
    /// Page through a query on the base table or one of the indexes.
    async fn query_items(
        &self,
        index: Option<&str>,
        key_condition: String,
        pk: String,
        sk_prefix: &str,
    ) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut start_key = None;
        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .set_index_name(index.map(|i| i.to_string()))
                .key_condition_expression(key_condition.clone())
                .expression_attribute_values(":pk", str_value(pk.clone()))
                .expression_attribute_values(":sk_prefix", str_value(sk_prefix))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| TaskError::Store(format!("DynamoDB query error: {}", e)))?;

            items.extend(result.items().iter().cloned());

            match result.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }
        Ok(items)
    }
}

/// Largest request `batch_write_item` accepts.
const BATCH_WRITE_LIMIT: usize = 25;

fn submission_delete_batches(pk: &str, submissions: &[Submission]) -> Result<Vec<Vec<WriteRequest>>> {
    submissions
        .chunks(BATCH_WRITE_LIMIT)
        .map(|chunk| {
            chunk
                .iter()
                .map(|sub| {
                    let delete = DeleteRequest::builder()
                        .key("PK", str_value(pk))
                        .key("SK", str_value(submission_sk(&sub.submission_id)))
                        .build()
                        .map_err(build_err)?;
                    Ok(WriteRequest::builder().delete_request(delete).build())
                })
                .collect()
        })
        .collect()
}

impl DynamoTaskStore {
    /// Batch delete submission records, retrying unprocessed items.
    async fn purge_submissions(&self, pk: &str, submissions: &[Submission]) -> Result<()> {
        for requests in submission_delete_batches(pk, submissions)? {
            let mut unprocessed = Some(requests);
            let mut attempts = 0;
            while let Some(requests) = unprocessed.take() {
                attempts += 1;
                let result = self
                    .client
                    .batch_write_item()
                    .request_items(&self.table_name, requests)
                    .send()
                    .await
                    .map_err(|e| TaskError::Store(format!("DynamoDB batch_write_item error: {}", e)))?;

                unprocessed = result
                    .unprocessed_items()
                    .and_then(|m| m.get(&self.table_name))
                    .filter(|left| !left.is_empty())
                    .cloned();

                if unprocessed.is_some() {
                    if attempts >= 5 {
                        return Err(TaskError::Store(format!(
                            "{} submission records left unprocessed",
                            unprocessed.map_or(0, |left| left.len())
                        )));
                    }
                    tokio::time::sleep(Duration::from_millis(100 * attempts)).await;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TaskStore for DynamoTaskStore {
    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let pk = task_pk(task_id);
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", str_value(pk.clone()))
            .key("SK", str_value(pk))
            .consistent_read(true)
            .send()
            .await
            .map_err(|e| TaskError::Store(format!("DynamoDB get_item error: {}", e)))?;

        result.item().map(task_from_item).transpose()
    }

    async fn query(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let items = if let Some(assignee_id) = &filter.assignee_id {
            self.query_items(
                Some(dynamo::ASSIGNEE_INDEX),
                "GSI1PK = :pk AND begins_with(GSI1SK, :sk_prefix)".to_string(),
                format!("ASSIGNEE#{}", assignee_id),
                "TASK#",
            )
            .await?
        } else if let Some(mentor_id) = &filter.mentor_id {
            self.query_items(
                Some(dynamo::MENTOR_INDEX),
                "GSI2PK = :pk AND begins_with(GSI2SK, :sk_prefix)".to_string(),
                format!("MENTOR#{}", mentor_id),
                "TASK#",
            )
            .await?
        } else {
            return Err(TaskError::Validation(
                "task query needs an assignee or a mentor".to_string(),
            ));
        };

        let mut tasks = Vec::with_capacity(items.len());
        for item in &items {
            let task = task_from_item(item)?;
            if filter.matches(&task) {
                tasks.push(task);
            }
        }

        // Newest first
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    async fn compare_and_swap(
        &self,
        task_id: &str,
        expected_version: u64,
        write: TaskWrite,
    ) -> Result<Task> {
        if write.task.task_id != task_id || write.task.version != expected_version + 1 {
            return Err(TaskError::Store(format!(
                "write for task {} does not follow version {}",
                task_id, expected_version
            )));
        }

        let put_task = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(task_to_item(&write.task)))
            .condition_expression("#version = :expected")
            .expression_attribute_names("#version", "version")
            .expression_attribute_values(":expected", num_value(expected_version))
            .build()
            .map_err(build_err)?;
        let mut items = vec![TransactWriteItem::builder().put(put_task).build()];

        if let Some(sub) = &write.new_submission {
            let put_submission = Put::builder()
                .table_name(&self.table_name)
                .set_item(Some(submission_to_item(sub)))
                .condition_expression("attribute_not_exists(PK)")
                .build()
                .map_err(build_err)?;
            items.push(TransactWriteItem::builder().put(put_submission).build());
        }

        match &write.superseded {
            Some(Superseded::Retain { submission_id, at }) => {
                let update = Update::builder()
                    .table_name(&self.table_name)
                    .key("PK", str_value(task_pk(task_id)))
                    .key("SK", str_value(submission_sk(submission_id)))
                    .update_expression("SET superseded_at = :at")
                    .expression_attribute_values(":at", time_value(at))
                    .build()
                    .map_err(build_err)?;
                items.push(TransactWriteItem::builder().update(update).build());
            }
            Some(Superseded::Discard { submission_id }) => {
                let delete = Delete::builder()
                    .table_name(&self.table_name)
                    .key("PK", str_value(task_pk(task_id)))
                    .key("SK", str_value(submission_sk(submission_id)))
                    .build()
                    .map_err(build_err)?;
                items.push(TransactWriteItem::builder().delete(delete).build());
            }
            None => {}
        }

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                TransactWriteItemsError::TransactionCanceledException(_) => {
                    TaskError::ConcurrentModification(task_id.to_string())
                }
                other => TaskError::Store(format!("DynamoDB transact_write_items error: {}", other)),
            })?;

        Ok(write.task)
    }

    async fn insert_if_absent(&self, key: &IdempotencyKey, task: &Task) -> Result<bool> {
        let marker = Put::builder()
            .table_name(&self.table_name)
            .item("PK", str_value(key.as_item_key()))
            .item("SK", str_value("ASSIGNMENT"))
            .item("task_id", str_value(&task.task_id))
            .item("created_at", time_value(&task.created_at))
            .condition_expression("attribute_not_exists(PK)")
            .build()
            .map_err(build_err)?;
        let put_task = Put::builder()
            .table_name(&self.table_name)
            .set_item(Some(task_to_item(task)))
            .condition_expression("attribute_not_exists(PK)")
            .build()
            .map_err(build_err)?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(marker).build())
            .transact_items(TransactWriteItem::builder().put(put_task).build())
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(e) => match e.into_service_error() {
                TransactWriteItemsError::TransactionCanceledException(cancelled) => {
                    let claimed = cancelled
                        .cancellation_reasons()
                        .iter()
                        .any(|reason| reason.code() == Some("ConditionalCheckFailed"));
                    if claimed {
                        Ok(false)
                    } else {
                        Err(TaskError::Store(format!(
                            "assignment {} conflicted with another write",
                            key.as_item_key()
                        )))
                    }
                }
                other => Err(TaskError::Store(format!(
                    "DynamoDB transact_write_items error: {}",
                    other
                ))),
            },
        }
    }

    async fn delete(&self, task_id: &str, expected_version: u64) -> Result<()> {
        let task = match self.get(task_id).await? {
            Some(task) => task,
            None => return Err(TaskError::ConcurrentModification(task_id.to_string())),
        };
        let submissions = self.submissions_for(task_id).await?;
        let pk = task_pk(task_id);

        let delete_task = Delete::builder()
            .table_name(&self.table_name)
            .key("PK", str_value(pk.clone()))
            .key("SK", str_value(pk.clone()))
            .condition_expression("#version = :expected")
            .expression_attribute_names("#version", "version")
            .expression_attribute_values(":expected", num_value(expected_version))
            .build()
            .map_err(build_err)?;
        let mut items = vec![TransactWriteItem::builder().delete(delete_task).build()];

        if let Some(key) = task.assignment_key().filter(|k| k.is_direct()) {
            let release_marker = Delete::builder()
                .table_name(&self.table_name)
                .key("PK", str_value(key.as_item_key()))
                .key("SK", str_value("ASSIGNMENT"))
                .build()
                .map_err(build_err)?;
            items.push(TransactWriteItem::builder().delete(release_marker).build());
        }

        self.client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await
            .map_err(|e| match e.into_service_error() {
                TransactWriteItemsError::TransactionCanceledException(_) => {
                    TaskError::ConcurrentModification(task_id.to_string())
                }
                other => TaskError::Store(format!("DynamoDB transact_write_items error: {}", other)),
            })?;

        // Submission history is unbounded, so it goes outside the transaction.
        // Records left behind by a failed batch belong to no task.
        if let Err(e) = self.purge_submissions(&pk, &submissions).await {
            tracing::warn!(task_id, records = submissions.len(), error = %e, "Could not purge submission records of deleted task");
        }
        Ok(())
    }

    async fn submissions_for(&self, task_id: &str) -> Result<Vec<Submission>> {
        let items = self
            .query_items(
                None,
                "PK = :pk AND begins_with(SK, :sk_prefix)".to_string(),
                task_pk(task_id),
                "SUBMISSION#",
            )
            .await?;

        let mut submissions: Vec<Submission> = items
            .iter()
            .filter_map(|item| submission_from_item(task_id, item))
            .collect();
        submissions.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));
        Ok(submissions)
    }

    async fn get_template(&self, template_id: &str) -> Result<Option<TaskTemplate>> {
        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", str_value("TEMPLATE"))
            .key("SK", str_value(format!("TEMPLATE#{}", template_id)))
            .send()
            .await
            .map_err(|e| TaskError::Store(format!("DynamoDB get_item error: {}", e)))?;

        Ok(result.item().and_then(template_from_item))
    }

    async fn list_templates(&self, mentor_id: Option<&str>) -> Result<Vec<TaskTemplate>> {
        let items = self
            .query_items(
                None,
                "PK = :pk AND begins_with(SK, :sk_prefix)".to_string(),
                "TEMPLATE".to_string(),
                "TEMPLATE#",
            )
            .await?;

        let mut templates: Vec<TaskTemplate> = items
            .iter()
            .filter_map(template_from_item)
            .filter(|t| mentor_id.map_or(true, |m| t.mentor_id == m))
            .collect();
        templates.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(templates)
    }

    async fn put_template(&self, template: &TaskTemplate) -> Result<()> {
        self.client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(template_to_item(template)))
            .send()
            .await
            .map_err(|e| TaskError::Store(format!("DynamoDB put_item error: {}", e)))?;
        Ok(())
    }
}
