use chrono::{DateTime, Utc};

use crate::inspect::EntityMeta;
use crate::value::Value;

pub const CREATED_AT: &str = "created_at";
pub const UPDATED_AT: &str = "updated_at";

pub fn now() -> DateTime<Utc> {
    Utc::now()
}

fn set(values: &mut Vec<(String, Value)>, column: &str, at: DateTime<Utc>) {
    match values.iter_mut().find(|(name, _)| name == column) {
        Some((_, value)) => *value = Value::DateTime(at),
        None => values.push((column.to_owned(), Value::DateTime(at))),
    }
}

/// Sets `created_at` (unless given) and `updated_at` on a row about to be inserted.
pub fn stamp_insert(meta: &EntityMeta, values: &mut Vec<(String, Value)>, at: DateTime<Utc>) {
    if !meta.has_timestamps() {
        return;
    }
    let created_given = values
        .iter()
        .any(|(name, value)| name == CREATED_AT && !value.is_null());
    if meta.has_column(CREATED_AT) && !created_given {
        set(values, CREATED_AT, at);
    }
    if meta.has_column(UPDATED_AT) {
        set(values, UPDATED_AT, at);
    }
}

/// Refreshes `updated_at` on a row about to be updated.
pub fn stamp_update(meta: &EntityMeta, values: &mut Vec<(String, Value)>, at: DateTime<Utc>) {
    if meta.has_timestamps() && meta.has_column(UPDATED_AT) {
        set(values, UPDATED_AT, at);
    }
}
