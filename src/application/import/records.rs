use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};

use crate::application::import::ImportError;
use crate::domain::naming::normalize_color;

/// External records as exported by the legacy client: JSON arrays with
/// camelCase keys, epoch-second timestamps serialized as strings, and
/// colors that may still carry a leading `#` or lack an alpha component.

#[derive(Debug, Clone, Deserialize)]
pub struct TagRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaskRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagRecord {
    pub id: String,
    pub created_at: String,
    pub name: String,
    pub canonical_name: String,
    pub color: String,
    pub assigned_to: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteRecord {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub title: String,
    pub content: String,
    pub assigned_to: String,
    #[serde(default)]
    pub tags: Vec<TagRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticRecord {
    pub id: String,
    pub created_at: String,
    pub updated_at: Option<String>,
    pub icon: Option<String>,
    pub name: String,
    pub canonical_name: String,
    pub description: String,
    pub color: String,
    pub unit: String,
    pub time_type: String,
    pub assigned_to: String,
    #[serde(default)]
    pub tags: Vec<TagRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatisticValueRecord {
    pub id: String,
    pub created_at: String,
    pub started_at: String,
    pub ended_at: String,
    pub value: f64,
    pub statistic_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub completed_at: Option<String>,
    pub priority: i64,
    #[serde(deserialize_with = "truthy")]
    pub active: bool,
    pub name: String,
    pub canonical_name: String,
    pub description: String,
    pub assigned_to: String,
    /// Legacy exports mark templates by the field's mere presence, whatever
    /// its value.
    #[serde(default, deserialize_with = "present")]
    pub template: bool,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<TagRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntryRecord {
    pub id: String,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: String,
    pub ended_at: Option<String>,
    pub description: String,
    pub assigned_to: String,
    pub task: Option<TaskRef>,
    #[serde(default)]
    pub tags: Vec<TagRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampRecord {
    pub id: String,
    pub created_at: String,
    pub description: String,
    pub assigned_to: String,
    #[serde(default)]
    pub tags: Vec<TagRef>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub username: String,
    pub email: String,
}

fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    serde_json::Value::deserialize(deserializer)?;
    Ok(true)
}

/// Old exports stored booleans as 0/1 in some kinds.
fn truthy<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(flag) => flag,
        serde_json::Value::Number(number) => number.as_f64().is_some_and(|n| n != 0.0),
        serde_json::Value::Null => false,
        other => !matches!(other, serde_json::Value::String(s) if s.is_empty() || s == "0"),
    })
}

pub fn parse_epoch(raw: &str) -> Result<DateTime<Utc>, ImportError> {
    let seconds: i64 = raw
        .parse()
        .map_err(|_| ImportError::InvalidTimestamp(raw.to_string()))?;
    DateTime::from_timestamp(seconds, 0)
        .ok_or_else(|| ImportError::InvalidTimestamp(raw.to_string()))
}

pub fn parse_opt_epoch(raw: Option<&String>) -> Result<Option<DateTime<Utc>>, ImportError> {
    raw.map(|value| parse_epoch(value)).transpose()
}

pub fn parse_color(raw: &str) -> Result<String, ImportError> {
    normalize_color(raw).ok_or_else(|| ImportError::InvalidColor(raw.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epoch_timestamps_parse_from_second_strings() {
        let when = parse_epoch("946684800").unwrap();
        assert_eq!(when.to_rfc3339(), "2000-01-01T00:00:00+00:00");

        assert!(matches!(
            parse_epoch("not-a-number"),
            Err(ImportError::InvalidTimestamp(_))
        ));
    }

    #[test]
    fn legacy_colors_are_normalized_on_parse() {
        assert_eq!(parse_color("#FF0000").unwrap(), "FF000000");
        assert_eq!(parse_color("FF000000").unwrap(), "FF000000");
        assert!(matches!(
            parse_color("red"),
            Err(ImportError::InvalidColor(_))
        ));
    }

    #[test]
    fn task_records_read_presence_marked_templates_and_numeric_flags() {
        let raw = r#"{
            "id": "t-1",
            "createdAt": "946684800",
            "updatedAt": "946684800",
            "priority": 2,
            "active": 1,
            "name": "Write report",
            "canonicalName": "write report",
            "description": "",
            "assignedTo": "ada",
            "template": null,
            "tags": [{"id": "tag-1"}]
        }"#;
        let record: TaskRecord = serde_json::from_str(raw).unwrap();

        assert!(record.active);
        assert!(record.template);
        assert!(record.parent_id.is_none());
        assert_eq!(record.tags.len(), 1);

        let raw = r#"{
            "id": "t-2",
            "createdAt": "946684800",
            "updatedAt": "946684800",
            "priority": 0,
            "active": 0,
            "name": "Idle",
            "canonicalName": "idle",
            "description": "",
            "assignedTo": "ada"
        }"#;
        let record: TaskRecord = serde_json::from_str(raw).unwrap();

        assert!(!record.active);
        assert!(!record.template);
        assert!(record.tags.is_empty());
    }

    #[test]
    fn time_entry_records_tolerate_missing_end_and_task() {
        let raw = r#"{
            "id": "e-1",
            "createdAt": "946684800",
            "updatedAt": "946684800",
            "startedAt": "946684800",
            "description": "",
            "assignedTo": "ada"
        }"#;
        let record: TimeEntryRecord = serde_json::from_str(raw).unwrap();

        assert!(record.ended_at.is_none());
        assert!(record.task.is_none());
    }
}
