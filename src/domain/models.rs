use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::naming::{is_valid_color, to_canonical_name};

/// The soft-deletable entity kinds. Each maps to one table and can carry
/// tag links as a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Task,
    Timestamp,
    TimeEntry,
    Tag,
    Note,
    Statistic,
}

impl EntityKind {
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Task,
        EntityKind::Timestamp,
        EntityKind::TimeEntry,
        EntityKind::Tag,
        EntityKind::Note,
        EntityKind::Statistic,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Task => "tasks",
            EntityKind::Timestamp => "timestamps",
            EntityKind::TimeEntry => "time_entries",
            EntityKind::Tag => "tags",
            EntityKind::Note => "notes",
            EntityKind::Statistic => "statistics",
        }
    }

    pub fn from_discriminator(value: &str) -> Option<Self> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.discriminator() == value)
    }

    /// Discriminator stored in `tag_links.subject_kind`.
    pub fn discriminator(self) -> &'static str {
        match self {
            EntityKind::Task => "task",
            EntityKind::Timestamp => "timestamp",
            EntityKind::TimeEntry => "time_entry",
            EntityKind::Tag => "tag",
            EntityKind::Note => "note",
            EntityKind::Statistic => "statistic",
        }
    }
}

/// A taggable entity reference. Tag links store the resolved kind and id,
/// so an unrecognized subject kind is unrepresentable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Subject {
    Task(String),
    Timestamp(String),
    TimeEntry(String),
    Tag(String),
    Note(String),
    Statistic(String),
}

impl Subject {
    pub fn new(kind: EntityKind, id: impl Into<String>) -> Self {
        let id = id.into();
        match kind {
            EntityKind::Task => Subject::Task(id),
            EntityKind::Timestamp => Subject::Timestamp(id),
            EntityKind::TimeEntry => Subject::TimeEntry(id),
            EntityKind::Tag => Subject::Tag(id),
            EntityKind::Note => Subject::Note(id),
            EntityKind::Statistic => Subject::Statistic(id),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Subject::Task(_) => EntityKind::Task,
            Subject::Timestamp(_) => EntityKind::Timestamp,
            Subject::TimeEntry(_) => EntityKind::TimeEntry,
            Subject::Tag(_) => EntityKind::Tag,
            Subject::Note(_) => EntityKind::Note,
            Subject::Statistic(_) => EntityKind::Statistic,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Subject::Task(id)
            | Subject::Timestamp(id)
            | Subject::TimeEntry(id)
            | Subject::Tag(id)
            | Subject::Note(id)
            | Subject::Statistic(id) => id,
        }
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn validate_non_empty(value: &str, field: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field} must not be empty"));
    }
    Ok(())
}

fn validate_color(value: &str, field: &str) -> Result<(), String> {
    if !is_valid_color(value) {
        return Err(format!(
            "{field} must be exactly 8 hex characters (RGBA, no leading #)"
        ));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            username: username.into(),
            email: email.into(),
            created_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub due_at: Option<DateTime<Utc>>,
    pub name: String,
    pub canonical_name: String,
    pub description: String,
    pub priority: i64,
    pub template: bool,
    /// Currently being worked on, or a target to work on.
    pub active: bool,
    /// Estimated duration in seconds.
    pub time_estimate: Option<i64>,
    pub assigned_to: String,
    pub parent_id: Option<String>,
}

impl Task {
    pub fn new(name: impl Into<String>, assigned_to: impl Into<String>) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: new_id(),
            created_at: now,
            updated_at: now,
            completed_at: None,
            closed_at: None,
            due_at: None,
            canonical_name: to_canonical_name(&name),
            name,
            description: String::new(),
            priority: 0,
            template: false,
            active: false,
            time_estimate: None,
            assigned_to: assigned_to.into(),
            parent_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "task.id")?;
        validate_non_empty(&self.name, "task.name")?;
        validate_non_empty(&self.assigned_to, "task.assigned_to")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Timestamp {
    pub id: String,
    pub created_at: DateTime<Utc>,
    /// Free-form content, like "server reports out of memory at this time".
    pub description: String,
    pub assigned_to: String,
}

impl Timestamp {
    pub fn new(description: impl Into<String>, assigned_to: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            created_at: Utc::now(),
            description: description.into(),
            assigned_to: assigned_to.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TimeEntry {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    /// Unset while the entry is still running; an open entry contributes
    /// zero duration to totals.
    pub ended_at: Option<DateTime<Utc>>,
    pub description: String,
    pub assigned_to: String,
    pub task_id: Option<String>,
}

impl TimeEntry {
    pub fn new(
        started_at: DateTime<Utc>,
        ended_at: Option<DateTime<Utc>>,
        assigned_to: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            created_at: now,
            updated_at: now,
            started_at,
            ended_at,
            description: String::new(),
            assigned_to: assigned_to.into(),
            task_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "time_entry.id")?;
        validate_non_empty(&self.assigned_to, "time_entry.assigned_to")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tag {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub name: String,
    /// Always `to_canonical_name(name)`; the store re-derives it on every
    /// write. Unique per owner.
    pub canonical_name: String,
    /// Hex color string, RGBA, no leading marker. E.g. FF000000.
    pub color: String,
    pub assigned_to: String,
}

impl Tag {
    pub fn new(
        name: impl Into<String>,
        color: impl Into<String>,
        assigned_to: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: new_id(),
            created_at: now,
            updated_at: now,
            canonical_name: to_canonical_name(&name),
            name,
            color: color.into(),
            assigned_to: assigned_to.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "tag.id")?;
        validate_non_empty(&self.name, "tag.name")?;
        validate_non_empty(&self.assigned_to, "tag.assigned_to")?;
        validate_color(&self.color, "tag.color")?;
        if self.canonical_name != to_canonical_name(&self.name) {
            return Err("tag.canonical_name must match the normalized name".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Note {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// The date the note is about, which may differ from when it was
    /// written or last extended.
    pub for_date: Option<DateTime<Utc>>,
    pub title: String,
    pub content: String,
    pub assigned_to: String,
}

impl Note {
    pub fn new(title: impl Into<String>, assigned_to: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(),
            created_at: now,
            updated_at: now,
            for_date: None,
            title: title.into(),
            content: String::new(),
            assigned_to: assigned_to.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatisticTimeType {
    Instance,
    Interval,
}

impl StatisticTimeType {
    pub fn as_str(self) -> &'static str {
        match self {
            StatisticTimeType::Instance => "instance",
            StatisticTimeType::Interval => "interval",
        }
    }

    pub fn parse(value: &str) -> Result<Self, String> {
        match value {
            "instance" => Ok(StatisticTimeType::Instance),
            "interval" => Ok(StatisticTimeType::Interval),
            other => Err(format!("unknown statistic time type '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Statistic {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub icon: Option<String>,
    pub name: String,
    pub canonical_name: String,
    pub description: String,
    pub color: String,
    pub unit: String,
    pub time_type: StatisticTimeType,
    pub assigned_to: String,
}

impl Statistic {
    pub fn new(
        name: impl Into<String>,
        color: impl Into<String>,
        time_type: StatisticTimeType,
        assigned_to: impl Into<String>,
    ) -> Self {
        let name = name.into();
        let now = Utc::now();
        Self {
            id: new_id(),
            created_at: now,
            updated_at: now,
            icon: None,
            canonical_name: to_canonical_name(&name),
            name,
            description: String::new(),
            color: color.into(),
            unit: String::new(),
            time_type,
            assigned_to: assigned_to.into(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "statistic.id")?;
        validate_non_empty(&self.name, "statistic.name")?;
        validate_color(&self.color, "statistic.color")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatisticValue {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub value: f64,
    pub statistic_id: String,
    pub time_entry_id: Option<String>,
    pub timestamp_id: Option<String>,
}

/// An association row between a tag and one subject. At most one active
/// link may exist per (tag, subject) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagLink {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub tag_id: String,
    pub subject: Subject,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_discriminators_cover_all_kinds() {
        let expected = [
            (EntityKind::Task, "task"),
            (EntityKind::Timestamp, "timestamp"),
            (EntityKind::TimeEntry, "time_entry"),
            (EntityKind::Tag, "tag"),
            (EntityKind::Note, "note"),
            (EntityKind::Statistic, "statistic"),
        ];
        for (kind, discriminator) in expected {
            assert_eq!(kind.discriminator(), discriminator);
        }
    }

    #[test]
    fn subject_round_trips_kind_and_id() {
        for kind in EntityKind::ALL {
            let subject = Subject::new(kind, "abc");
            assert_eq!(subject.kind(), kind);
            assert_eq!(subject.id(), "abc");
        }
    }

    #[test]
    fn new_tag_derives_its_canonical_name() {
        let tag = Tag::new("  My Tag ", "FF00FFFF", "user-1");
        assert_eq!(tag.canonical_name, "my tag");
        assert!(tag.validate().is_ok());
    }

    #[test]
    fn tag_validation_rejects_bad_colors() {
        let mut tag = Tag::new("test", "FF00FF", "user-1");
        assert!(tag.validate().is_err());

        tag.color = "#FF00FFFF".to_string();
        assert!(tag.validate().is_err());

        tag.color = "FF00FFFF".to_string();
        assert!(tag.validate().is_ok());
    }

    #[test]
    fn tag_validation_rejects_stale_canonical_name() {
        let mut tag = Tag::new("test", "FF00FFFF", "user-1");
        tag.name = "renamed".to_string();
        assert!(tag.validate().is_err());
    }

    #[test]
    fn statistic_time_type_round_trips() {
        for time_type in [StatisticTimeType::Instance, StatisticTimeType::Interval] {
            assert_eq!(
                StatisticTimeType::parse(time_type.as_str()).unwrap(),
                time_type
            );
        }
        assert!(StatisticTimeType::parse("sometimes").is_err());
    }
}
