use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::domain::{CollectedItem, CriteriaResult, RunFailure, RunResult};

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Check the JSON a program returned against the item contract.
///
/// The first violation wins and names the offending index and field.
pub fn validate(output: &str) -> RunResult {
    let value: Value = serde_json::from_str(output)
        .map_err(|e| RunFailure::contract(format!("program output is not valid JSON: {e}")))?;

    let entries = match value {
        Value::Array(entries) => entries,
        other => {
            return Err(RunFailure::contract(format!(
                "expected an array of items, got {}",
                type_name(&other)
            )))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(index, entry)| to_item(index, entry))
        .collect()
}

fn to_item(index: usize, entry: &Value) -> Result<CollectedItem, RunFailure> {
    let fields = entry.as_object().ok_or_else(|| {
        RunFailure::contract(format!(
            "item {index}: expected an object, got {}",
            type_name(entry)
        ))
    })?;

    let title = required(fields, index, "title")?;
    let url = required(fields, index, "url")?;

    Ok(CollectedItem {
        title,
        url,
        summary: text(fields, &["summary", "description"]),
        thumbnail_url: text(fields, &["thumbnailUrl", "thumbnail_url", "thumbnail", "image"]),
        published_at: published(fields),
        criteria_result: criteria(fields),
        metric: metric(fields),
    })
}

fn required(fields: &Map<String, Value>, index: usize, name: &str) -> Result<String, RunFailure> {
    match fields.get(name).and_then(Value::as_str).map(str::trim) {
        Some(value) if !value.is_empty() => Ok(value.to_string()),
        _ => Err(RunFailure::contract(format!(
            "item {index}: missing or empty required field '{name}'"
        ))),
    }
}

fn text(fields: &Map<String, Value>, names: &[&str]) -> Option<String> {
    names
        .iter()
        .filter_map(|name| fields.get(*name).and_then(Value::as_str))
        .map(str::trim)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

fn published(fields: &Map<String, Value>) -> Option<DateTime<Utc>> {
    ["publishedAt", "published_at", "published", "date"]
        .iter()
        .filter_map(|name| fields.get(*name))
        .find_map(|value| match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
                .ok()
                .map(|d| d.with_timezone(&Utc)),
            Value::Number(n) => n.as_i64().and_then(DateTime::from_timestamp_millis),
            _ => None,
        })
}

fn criteria(fields: &Map<String, Value>) -> Option<CriteriaResult> {
    match fields.get("criteriaResult").or_else(|| fields.get("criteria_result"))? {
        Value::Bool(true) => Some(CriteriaResult::Matched),
        Value::Bool(false) => Some(CriteriaResult::NotMatched),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn metric(fields: &Map<String, Value>) -> Option<String> {
    match fields.get("metric")? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
