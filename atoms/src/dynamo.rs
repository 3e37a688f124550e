//! Attribute helpers shared by the DynamoDB adapters.
//!
//! Single-table layout:
//! - task:        PK = SK = `TASK#{task_id}`, GSI1PK = `ASSIGNEE#{user}`, GSI2PK = `MENTOR#{mentor}`
//! - submission:  PK = `TASK#{task_id}`, SK = `SUBMISSION#{submission_id}`
//! - assignment:  PK = `ASSIGNMENT#{template}#{user}#{period}`, SK = `ASSIGNMENT`
//! - template:    PK = `TEMPLATE`, SK = `TEMPLATE#{template_id}`
//! - user:        PK = SK = `USER#{user_id}`, GSI2PK = `MENTOR#{mentor}` for interns

use aws_sdk_dynamodb::types::AttributeValue;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

pub type Item = HashMap<String, AttributeValue>;

pub const ASSIGNEE_INDEX: &str = "GSI1";
pub const MENTOR_INDEX: &str = "GSI2";

pub fn s(item: &Item, name: &str) -> Option<String> {
    item.get(name).and_then(|v| v.as_s().ok()).map(|s| s.to_string())
}

pub fn s_or_default(item: &Item, name: &str) -> String {
    s(item, name).unwrap_or_default()
}

pub fn n<T: std::str::FromStr>(item: &Item, name: &str) -> Option<T> {
    item.get(name)
        .and_then(|v| v.as_n().ok())
        .and_then(|n| n.parse().ok())
}

pub fn b(item: &Item, name: &str) -> bool {
    item.get(name)
        .and_then(|v| v.as_bool().ok())
        .copied()
        .unwrap_or(false)
}

pub fn time(item: &Item, name: &str) -> Option<DateTime<Utc>> {
    s(item, name)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|t| t.with_timezone(&Utc))
}

pub fn str_value(value: impl Into<String>) -> AttributeValue {
    AttributeValue::S(value.into())
}

pub fn num_value(value: impl ToString) -> AttributeValue {
    AttributeValue::N(value.to_string())
}

pub fn time_value(value: &DateTime<Utc>) -> AttributeValue {
    AttributeValue::S(value.to_rfc3339())
}
