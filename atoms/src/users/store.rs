use async_trait::async_trait;
use aws_sdk_dynamodb::Client as DynamoClient;

use super::model::User;
use crate::dynamo::{self, str_value, Item};
use crate::error::{Result, TaskError};
use crate::store::UserDirectory;

/// Read-only view of user records: PK = SK = `USER#{user_id}`, interns also
/// indexed under `GSI2PK = MENTOR#{mentor_id}`.
#[derive(Clone)]
pub struct DynamoUserDirectory {
    client: DynamoClient,
    table_name: String,
}

impl DynamoUserDirectory {
    pub fn new(client: DynamoClient, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }
}

fn user_from_item(user_id: &str, item: &Item) -> User {
    let mut full_name = dynamo::s_or_default(item, "full_name");
    if full_name.trim().is_empty() {
        full_name = "User".to_string();
    }
    User {
        user_id: user_id.to_string(),
        full_name,
        domain: dynamo::s_or_default(item, "domain"),
        mentor_id: dynamo::s(item, "mentor_id").filter(|m| !m.is_empty()),
        created_at: dynamo::time(item, "created_at").unwrap_or_default(),
    }
}

#[async_trait]
impl UserDirectory for DynamoUserDirectory {
    async fn get_user(&self, user_id: &str) -> Result<Option<User>> {
        let pk = format!("USER#{}", user_id);

        let result = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .key("PK", str_value(pk.clone()))
            .key("SK", str_value(pk))
            .send()
            .await
            .map_err(|e| TaskError::Store(format!("DynamoDB get_item error: {}", e)))?;

        Ok(result.item().map(|item| user_from_item(user_id, item)))
    }

    async fn list_interns(&self, mentor_id: &str) -> Result<Vec<User>> {
        let mut interns = Vec::new();
        let mut start_key = None;
        loop {
            let result = self
                .client
                .query()
                .table_name(&self.table_name)
                .index_name(dynamo::MENTOR_INDEX)
                .key_condition_expression("GSI2PK = :pk AND begins_with(GSI2SK, :sk_prefix)")
                .expression_attribute_values(":pk", str_value(format!("MENTOR#{}", mentor_id)))
                .expression_attribute_values(":sk_prefix", str_value("USER#"))
                .set_exclusive_start_key(start_key)
                .send()
                .await
                .map_err(|e| TaskError::Store(format!("DynamoDB query error: {}", e)))?;

            for item in result.items() {
                if let Some(user_id) = dynamo::s(item, "PK")
                    .as_deref()
                    .and_then(|pk| pk.strip_prefix("USER#"))
                {
                    interns.push(user_from_item(user_id, item));
                }
            }

            match result.last_evaluated_key() {
                Some(key) if !key.is_empty() => start_key = Some(key.clone()),
                _ => break,
            }
        }

        interns.sort_by(|a, b| a.full_name.cmp(&b.full_name));
        Ok(interns)
    }
}
