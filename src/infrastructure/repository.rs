use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use crate::domain::models::{
    EntityKind, Note, Statistic, StatisticTimeType, StatisticValue, Subject, Tag, TagLink, Task,
    TimeEntry, Timestamp, User,
};
use crate::domain::naming::to_canonical_name;
use crate::infrastructure::error::StoreError;

/// Which slice of a soft-deletable table a read should see. Passed
/// explicitly on every visibility-sensitive call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Active,
    DeletedOnly,
    All,
}

impl Visibility {
    fn clause(self) -> &'static str {
        match self {
            Visibility::Active => "deleted_at IS NULL",
            Visibility::DeletedOnly => "deleted_at IS NOT NULL",
            Visibility::All => "1 = 1",
        }
    }
}

/// SQLite-backed store for every entity kind plus the tag-link association
/// table. Holds the database path and opens a connection per operation;
/// multi-statement invariants run inside explicit transactions.
#[derive(Debug, Clone)]
pub struct Store {
    db_path: PathBuf,
}

fn to_sql(when: &DateTime<Utc>) -> String {
    when.to_rfc3339()
}

fn opt_to_sql(when: &Option<DateTime<Utc>>) -> Option<String> {
    when.as_ref().map(to_sql)
}

fn parse_dt(raw: String) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|error| {
            rusqlite::Error::FromSqlConversionFailure(
                0,
                rusqlite::types::Type::Text,
                Box::new(error),
            )
        })
}

fn parse_opt_dt(raw: Option<String>) -> rusqlite::Result<Option<DateTime<Utc>>> {
    raw.map(parse_dt).transpose()
}

fn row_to_user(row: &Row) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get("id")?,
        username: row.get("username")?,
        email: row.get("email")?,
        created_at: parse_dt(row.get("created_at")?)?,
    })
}

fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
    Ok(Task {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        updated_at: parse_dt(row.get("updated_at")?)?,
        completed_at: parse_opt_dt(row.get("completed_at")?)?,
        closed_at: parse_opt_dt(row.get("closed_at")?)?,
        due_at: parse_opt_dt(row.get("due_at")?)?,
        name: row.get("name")?,
        canonical_name: row.get("canonical_name")?,
        description: row.get("description")?,
        priority: row.get("priority")?,
        template: row.get("template")?,
        active: row.get("active")?,
        time_estimate: row.get("time_estimate")?,
        assigned_to: row.get("assigned_to")?,
        parent_id: row.get("parent_id")?,
    })
}

fn row_to_timestamp(row: &Row) -> rusqlite::Result<Timestamp> {
    Ok(Timestamp {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        description: row.get("description")?,
        assigned_to: row.get("assigned_to")?,
    })
}

fn row_to_time_entry(row: &Row) -> rusqlite::Result<TimeEntry> {
    Ok(TimeEntry {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        updated_at: parse_dt(row.get("updated_at")?)?,
        started_at: parse_dt(row.get("started_at")?)?,
        ended_at: parse_opt_dt(row.get("ended_at")?)?,
        description: row.get("description")?,
        assigned_to: row.get("assigned_to")?,
        task_id: row.get("task_id")?,
    })
}

fn row_to_tag(row: &Row) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        updated_at: parse_dt(row.get("updated_at")?)?,
        name: row.get("name")?,
        canonical_name: row.get("canonical_name")?,
        color: row.get("color")?,
        assigned_to: row.get("assigned_to")?,
    })
}

fn row_to_note(row: &Row) -> rusqlite::Result<Note> {
    Ok(Note {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        updated_at: parse_dt(row.get("updated_at")?)?,
        for_date: parse_opt_dt(row.get("for_date")?)?,
        title: row.get("title")?,
        content: row.get("content")?,
        assigned_to: row.get("assigned_to")?,
    })
}

fn row_to_statistic(row: &Row) -> rusqlite::Result<Statistic> {
    let raw_time_type: String = row.get("time_type")?;
    let time_type = StatisticTimeType::parse(&raw_time_type).map_err(|error| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            error.into(),
        )
    })?;
    Ok(Statistic {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        updated_at: parse_dt(row.get("updated_at")?)?,
        icon: row.get("icon")?,
        name: row.get("name")?,
        canonical_name: row.get("canonical_name")?,
        description: row.get("description")?,
        color: row.get("color")?,
        unit: row.get("unit")?,
        time_type,
        assigned_to: row.get("assigned_to")?,
    })
}

fn row_to_statistic_value(row: &Row) -> rusqlite::Result<StatisticValue> {
    Ok(StatisticValue {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        updated_at: parse_dt(row.get("updated_at")?)?,
        started_at: parse_dt(row.get("started_at")?)?,
        ended_at: parse_opt_dt(row.get("ended_at")?)?,
        value: row.get("value")?,
        statistic_id: row.get("statistic_id")?,
        time_entry_id: row.get("time_entry_id")?,
        timestamp_id: row.get("timestamp_id")?,
    })
}

fn row_to_tag_link(row: &Row) -> rusqlite::Result<TagLink> {
    let raw_kind: String = row.get("subject_kind")?;
    let kind = EntityKind::from_discriminator(&raw_kind).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("unknown subject kind '{raw_kind}'").into(),
        )
    })?;
    Ok(TagLink {
        id: row.get("id")?,
        created_at: parse_dt(row.get("created_at")?)?,
        tag_id: row.get("tag_id")?,
        subject: Subject::new(kind, row.get::<_, String>("subject_id")?),
        deleted_at: parse_opt_dt(row.get("deleted_at")?)?,
    })
}

fn placeholders(count: usize) -> String {
    vec!["?"; count].join(", ")
}

impl Store {
    pub fn new(db_path: impl AsRef<Path>) -> Self {
        Self {
            db_path: db_path.as_ref().to_path_buf(),
        }
    }

    fn connect(&self) -> Result<Connection, StoreError> {
        let connection = Connection::open(&self.db_path)?;
        connection.pragma_update(None, "foreign_keys", true)?;
        Ok(connection)
    }

    // ---- users ----

    pub fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO users (id, username, email, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user.id, user.username, user.email, to_sql(&user.created_at)],
        )?;
        Ok(())
    }

    pub fn user_id_by_username(&self, username: &str) -> Result<Option<String>, StoreError> {
        let connection = self.connect()?;
        let id = connection
            .query_row(
                "SELECT id FROM users WHERE username = ?1",
                params![username],
                |row| row.get(0),
            )
            .optional()?;
        Ok(id)
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<User>, StoreError> {
        let connection = self.connect()?;
        let user = connection
            .query_row(
                "SELECT * FROM users WHERE username = ?1",
                params![username],
                row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    // ---- tags ----

    pub fn insert_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO tags (id, created_at, updated_at, name, canonical_name, color, assigned_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                tag.id,
                to_sql(&tag.created_at),
                to_sql(&tag.updated_at),
                tag.name,
                to_canonical_name(&tag.name),
                tag.color,
                tag.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn update_tag(&self, tag: &Tag) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE tags SET updated_at = ?2, name = ?3, canonical_name = ?4, color = ?5,
             assigned_to = ?6 WHERE id = ?1",
            params![
                tag.id,
                to_sql(&tag.updated_at),
                tag.name,
                to_canonical_name(&tag.name),
                tag.color,
                tag.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn get_tag(&self, id: &str, visibility: Visibility) -> Result<Option<Tag>, StoreError> {
        let connection = self.connect()?;
        let query = format!("SELECT * FROM tags WHERE id = ?1 AND {}", visibility.clause());
        let tag = connection
            .query_row(&query, params![id], row_to_tag)
            .optional()?;
        Ok(tag)
    }

    // ---- tasks ----

    pub fn insert_task(&self, task: &Task) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO tasks (id, created_at, updated_at, completed_at, closed_at, due_at,
             name, canonical_name, description, priority, template, active, time_estimate,
             assigned_to, parent_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                task.id,
                to_sql(&task.created_at),
                to_sql(&task.updated_at),
                opt_to_sql(&task.completed_at),
                opt_to_sql(&task.closed_at),
                opt_to_sql(&task.due_at),
                task.name,
                task.canonical_name,
                task.description,
                task.priority,
                task.template,
                task.active,
                task.time_estimate,
                task.assigned_to,
                task.parent_id,
            ],
        )?;
        Ok(())
    }

    pub fn update_task(&self, task: &Task) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE tasks SET updated_at = ?2, completed_at = ?3, closed_at = ?4, due_at = ?5,
             name = ?6, canonical_name = ?7, description = ?8, priority = ?9, template = ?10,
             active = ?11, time_estimate = ?12, assigned_to = ?13, parent_id = ?14
             WHERE id = ?1",
            params![
                task.id,
                to_sql(&task.updated_at),
                opt_to_sql(&task.completed_at),
                opt_to_sql(&task.closed_at),
                opt_to_sql(&task.due_at),
                task.name,
                task.canonical_name,
                task.description,
                task.priority,
                task.template,
                task.active,
                task.time_estimate,
                task.assigned_to,
                task.parent_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_task(&self, id: &str, visibility: Visibility) -> Result<Option<Task>, StoreError> {
        let connection = self.connect()?;
        let query = format!("SELECT * FROM tasks WHERE id = ?1 AND {}", visibility.clause());
        let task = connection
            .query_row(&query, params![id], row_to_task)
            .optional()?;
        Ok(task)
    }

    /// Every canonical task name in the table, any visibility. Read in
    /// pages to bound memory on large tables.
    pub fn task_canonical_names(&self) -> Result<HashSet<String>, StoreError> {
        let connection = self.connect()?;
        let mut names = HashSet::new();
        let mut offset = 0usize;
        loop {
            let mut statement = connection.prepare(
                "SELECT canonical_name FROM tasks ORDER BY canonical_name LIMIT 1000 OFFSET ?1",
            )?;
            let page = statement
                .query_map(params![offset], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            names.extend(page);
        }
        Ok(names)
    }

    // ---- timestamps ----

    pub fn insert_timestamp(&self, timestamp: &Timestamp) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO timestamps (id, created_at, description, assigned_to)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                timestamp.id,
                to_sql(&timestamp.created_at),
                timestamp.description,
                timestamp.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn update_timestamp(&self, timestamp: &Timestamp) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE timestamps SET created_at = ?2, description = ?3, assigned_to = ?4
             WHERE id = ?1",
            params![
                timestamp.id,
                to_sql(&timestamp.created_at),
                timestamp.description,
                timestamp.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn get_timestamp(
        &self,
        id: &str,
        visibility: Visibility,
    ) -> Result<Option<Timestamp>, StoreError> {
        let connection = self.connect()?;
        let query = format!(
            "SELECT * FROM timestamps WHERE id = ?1 AND {}",
            visibility.clause()
        );
        let timestamp = connection
            .query_row(&query, params![id], row_to_timestamp)
            .optional()?;
        Ok(timestamp)
    }

    // ---- time entries ----

    pub fn insert_time_entry(&self, entry: &TimeEntry) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO time_entries (id, created_at, updated_at, started_at, ended_at,
             description, assigned_to, task_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                entry.id,
                to_sql(&entry.created_at),
                to_sql(&entry.updated_at),
                to_sql(&entry.started_at),
                opt_to_sql(&entry.ended_at),
                entry.description,
                entry.assigned_to,
                entry.task_id,
            ],
        )?;
        Ok(())
    }

    pub fn update_time_entry(&self, entry: &TimeEntry) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE time_entries SET updated_at = ?2, started_at = ?3, ended_at = ?4,
             description = ?5, assigned_to = ?6, task_id = ?7 WHERE id = ?1",
            params![
                entry.id,
                to_sql(&entry.updated_at),
                to_sql(&entry.started_at),
                opt_to_sql(&entry.ended_at),
                entry.description,
                entry.assigned_to,
                entry.task_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_time_entry(
        &self,
        id: &str,
        visibility: Visibility,
    ) -> Result<Option<TimeEntry>, StoreError> {
        let connection = self.connect()?;
        let query = format!(
            "SELECT * FROM time_entries WHERE id = ?1 AND {}",
            visibility.clause()
        );
        let entry = connection
            .query_row(&query, params![id], row_to_time_entry)
            .optional()?;
        Ok(entry)
    }

    // ---- notes ----

    pub fn insert_note(&self, note: &Note) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO notes (id, created_at, updated_at, for_date, title, content, assigned_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                note.id,
                to_sql(&note.created_at),
                to_sql(&note.updated_at),
                opt_to_sql(&note.for_date),
                note.title,
                note.content,
                note.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn update_note(&self, note: &Note) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE notes SET updated_at = ?2, for_date = ?3, title = ?4, content = ?5,
             assigned_to = ?6 WHERE id = ?1",
            params![
                note.id,
                to_sql(&note.updated_at),
                opt_to_sql(&note.for_date),
                note.title,
                note.content,
                note.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn get_note(&self, id: &str, visibility: Visibility) -> Result<Option<Note>, StoreError> {
        let connection = self.connect()?;
        let query = format!("SELECT * FROM notes WHERE id = ?1 AND {}", visibility.clause());
        let note = connection
            .query_row(&query, params![id], row_to_note)
            .optional()?;
        Ok(note)
    }

    // ---- statistics ----

    pub fn insert_statistic(&self, statistic: &Statistic) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO statistics (id, created_at, updated_at, icon, name, canonical_name,
             description, color, unit, time_type, assigned_to)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                statistic.id,
                to_sql(&statistic.created_at),
                to_sql(&statistic.updated_at),
                statistic.icon,
                statistic.name,
                statistic.canonical_name,
                statistic.description,
                statistic.color,
                statistic.unit,
                statistic.time_type.as_str(),
                statistic.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn update_statistic(&self, statistic: &Statistic) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE statistics SET updated_at = ?2, icon = ?3, name = ?4, canonical_name = ?5,
             description = ?6, color = ?7, unit = ?8, time_type = ?9, assigned_to = ?10
             WHERE id = ?1",
            params![
                statistic.id,
                to_sql(&statistic.updated_at),
                statistic.icon,
                statistic.name,
                statistic.canonical_name,
                statistic.description,
                statistic.color,
                statistic.unit,
                statistic.time_type.as_str(),
                statistic.assigned_to,
            ],
        )?;
        Ok(())
    }

    pub fn get_statistic(
        &self,
        id: &str,
        visibility: Visibility,
    ) -> Result<Option<Statistic>, StoreError> {
        let connection = self.connect()?;
        let query = format!(
            "SELECT * FROM statistics WHERE id = ?1 AND {}",
            visibility.clause()
        );
        let statistic = connection
            .query_row(&query, params![id], row_to_statistic)
            .optional()?;
        Ok(statistic)
    }

    // ---- statistic values ----

    pub fn insert_statistic_value(&self, value: &StatisticValue) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "INSERT INTO statistic_values (id, created_at, updated_at, started_at, ended_at,
             value, statistic_id, time_entry_id, timestamp_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                value.id,
                to_sql(&value.created_at),
                to_sql(&value.updated_at),
                to_sql(&value.started_at),
                opt_to_sql(&value.ended_at),
                value.value,
                value.statistic_id,
                value.time_entry_id,
                value.timestamp_id,
            ],
        )?;
        Ok(())
    }

    pub fn update_statistic_value(&self, value: &StatisticValue) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            "UPDATE statistic_values SET updated_at = ?2, started_at = ?3, ended_at = ?4,
             value = ?5, statistic_id = ?6, time_entry_id = ?7, timestamp_id = ?8 WHERE id = ?1",
            params![
                value.id,
                to_sql(&value.updated_at),
                to_sql(&value.started_at),
                opt_to_sql(&value.ended_at),
                value.value,
                value.statistic_id,
                value.time_entry_id,
                value.timestamp_id,
            ],
        )?;
        Ok(())
    }

    pub fn get_statistic_value(&self, id: &str) -> Result<Option<StatisticValue>, StoreError> {
        let connection = self.connect()?;
        let value = connection
            .query_row(
                "SELECT * FROM statistic_values WHERE id = ?1",
                params![id],
                row_to_statistic_value,
            )
            .optional()?;
        Ok(value)
    }

    pub fn existing_statistic_value_ids(
        &self,
        ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let connection = self.connect()?;
        let query = format!(
            "SELECT id FROM statistic_values WHERE id IN ({})",
            placeholders(ids.len())
        );
        let mut statement = connection.prepare(&query)?;
        let found = statement
            .query_map(params_from_iter(ids), |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(found)
    }

    // ---- generic lifecycle over soft-deletable kinds ----

    /// Which of `ids` already exist in `kind`'s table (any visibility).
    pub fn existing_ids(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let connection = self.connect()?;
        let query = format!(
            "SELECT id FROM {} WHERE id IN ({})",
            kind.table(),
            placeholders(ids.len())
        );
        let mut statement = connection.prepare(&query)?;
        let found = statement
            .query_map(params_from_iter(ids), |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(found)
    }

    pub fn count(&self, kind: EntityKind, visibility: Visibility) -> Result<i64, StoreError> {
        let connection = self.connect()?;
        let query = format!(
            "SELECT COUNT(*) FROM {} WHERE {}",
            kind.table(),
            visibility.clause()
        );
        let count = connection.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }

    /// `None` when the row does not exist; `Some(None)` for an active row.
    pub fn deleted_at(
        &self,
        kind: EntityKind,
        id: &str,
    ) -> Result<Option<Option<DateTime<Utc>>>, StoreError> {
        let connection = self.connect()?;
        let query = format!("SELECT deleted_at FROM {} WHERE id = ?1", kind.table());
        let raw: Option<Option<String>> = connection
            .query_row(&query, params![id], |row| row.get(0))
            .optional()?;
        match raw {
            None => Ok(None),
            Some(raw) => Ok(Some(parse_opt_dt(raw).map_err(StoreError::Sqlite)?)),
        }
    }

    /// Soft-deletes (or, with `hard`, permanently removes) one entity.
    ///
    /// Task soft-delete also soft-deletes the task's active tag links;
    /// both writes commit in one transaction or not at all. Hard deletes
    /// always remove the subject's tag links (for tasks, including links
    /// of cascaded child tasks) before the row itself goes away.
    pub fn delete(&self, kind: EntityKind, id: &str, hard: bool) -> Result<(), StoreError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        if hard {
            Self::remove_subject_links(&tx, kind, id)?;
            tx.execute(
                &format!("DELETE FROM {} WHERE id = ?1", kind.table()),
                params![id],
            )?;
        } else {
            let now = to_sql(&Utc::now());
            tx.execute(
                &format!("UPDATE {} SET deleted_at = ?2 WHERE id = ?1", kind.table()),
                params![id, now],
            )?;
            if kind == EntityKind::Task {
                tx.execute(
                    "UPDATE tag_links SET deleted_at = ?2
                     WHERE subject_kind = 'task' AND subject_id = ?1 AND deleted_at IS NULL",
                    params![id, now],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub fn restore(&self, kind: EntityKind, id: &str) -> Result<(), StoreError> {
        let connection = self.connect()?;
        connection.execute(
            &format!("UPDATE {} SET deleted_at = NULL WHERE id = ?1", kind.table()),
            params![id],
        )?;
        Ok(())
    }

    /// Bulk delete over every row a visibility view matches.
    pub fn delete_all(
        &self,
        kind: EntityKind,
        visibility: Visibility,
        hard: bool,
    ) -> Result<usize, StoreError> {
        let mut connection = self.connect()?;
        let tx = connection.transaction()?;
        let affected = if hard {
            if kind == EntityKind::Task {
                // Matched tasks take their children with them through the
                // parent FK cascade, so the whole subtree's links go too.
                tx.execute(
                    &format!(
                        "DELETE FROM tag_links WHERE subject_kind = 'task' AND subject_id IN (
                             WITH RECURSIVE subtree (id) AS (
                                 SELECT id FROM tasks WHERE {}
                                 UNION
                                 SELECT tasks.id FROM tasks
                                 JOIN subtree ON tasks.parent_id = subtree.id
                             )
                             SELECT id FROM subtree
                         )",
                        visibility.clause()
                    ),
                    [],
                )?;
            } else {
                tx.execute(
                    &format!(
                        "DELETE FROM tag_links WHERE subject_kind = ?1 AND subject_id IN
                         (SELECT id FROM {} WHERE {})",
                        kind.table(),
                        visibility.clause()
                    ),
                    params![kind.discriminator()],
                )?;
            }
            tx.execute(
                &format!("DELETE FROM {} WHERE {}", kind.table(), visibility.clause()),
                [],
            )?
        } else {
            let now = to_sql(&Utc::now());
            if kind == EntityKind::Task {
                tx.execute(
                    &format!(
                        "UPDATE tag_links SET deleted_at = ?1
                         WHERE subject_kind = 'task' AND deleted_at IS NULL AND subject_id IN
                         (SELECT id FROM tasks WHERE {})",
                        visibility.clause()
                    ),
                    params![now],
                )?;
            }
            tx.execute(
                &format!(
                    "UPDATE {} SET deleted_at = ?1 WHERE {}",
                    kind.table(),
                    visibility.clause()
                ),
                params![now],
            )?
        };
        tx.commit()?;
        Ok(affected)
    }

    pub fn restore_all(&self, kind: EntityKind) -> Result<usize, StoreError> {
        let connection = self.connect()?;
        let affected = connection.execute(
            &format!(
                "UPDATE {} SET deleted_at = NULL WHERE deleted_at IS NOT NULL",
                kind.table()
            ),
            [],
        )?;
        Ok(affected)
    }

    fn remove_subject_links(
        tx: &rusqlite::Transaction<'_>,
        kind: EntityKind,
        id: &str,
    ) -> Result<(), StoreError> {
        if kind == EntityKind::Task {
            // Child tasks go away through the parent FK cascade, so their
            // links must be cleaned up here as well.
            tx.execute(
                "DELETE FROM tag_links WHERE subject_kind = 'task' AND subject_id IN (
                     WITH RECURSIVE subtree (id) AS (
                         SELECT ?1
                         UNION
                         SELECT tasks.id FROM tasks JOIN subtree ON tasks.parent_id = subtree.id
                     )
                     SELECT id FROM subtree
                 )",
                params![id],
            )?;
        } else {
            tx.execute(
                "DELETE FROM tag_links WHERE subject_kind = ?1 AND subject_id = ?2",
                params![kind.discriminator(), id],
            )?;
        }
        Ok(())
    }

    // ---- tag links ----

    /// Inserts an active link unless one already exists for this (tag,
    /// subject) pair. Returns whether a row was created; a conflict with
    /// the partial unique index means "already linked".
    pub fn insert_tag_link(&self, tag_id: &str, subject: &Subject) -> Result<bool, StoreError> {
        let connection = self.connect()?;
        let inserted = connection.execute(
            "INSERT INTO tag_links (created_at, tag_id, subject_kind, subject_id)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (tag_id, subject_kind, subject_id) WHERE deleted_at IS NULL
             DO NOTHING",
            params![
                to_sql(&Utc::now()),
                tag_id,
                subject.kind().discriminator(),
                subject.id(),
            ],
        )?;
        Ok(inserted > 0)
    }

    /// The subset of `tag_ids` already actively linked to `subject`.
    pub fn active_link_tag_ids(
        &self,
        subject: &Subject,
        tag_ids: &[String],
    ) -> Result<HashSet<String>, StoreError> {
        if tag_ids.is_empty() {
            return Ok(HashSet::new());
        }
        let connection = self.connect()?;
        let query = format!(
            "SELECT tag_id FROM tag_links
             WHERE subject_kind = ?1 AND subject_id = ?2 AND deleted_at IS NULL
             AND tag_id IN ({})",
            placeholders(tag_ids.len())
        );
        let mut statement = connection.prepare(&query)?;
        let mut values: Vec<&str> = vec![subject.kind().discriminator(), subject.id()];
        values.extend(tag_ids.iter().map(String::as_str));
        let found = statement
            .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
            .collect::<Result<HashSet<_>, _>>()?;
        Ok(found)
    }

    pub fn count_links_for_tag(
        &self,
        tag_id: &str,
        visibility: Visibility,
    ) -> Result<i64, StoreError> {
        let connection = self.connect()?;
        let query = format!(
            "SELECT COUNT(*) FROM tag_links WHERE tag_id = ?1 AND {}",
            visibility.clause()
        );
        let count = connection.query_row(&query, params![tag_id], |row| row.get(0))?;
        Ok(count)
    }

    pub fn count_links(&self, visibility: Visibility) -> Result<i64, StoreError> {
        let connection = self.connect()?;
        let query = format!("SELECT COUNT(*) FROM tag_links WHERE {}", visibility.clause());
        let count = connection.query_row(&query, [], |row| row.get(0))?;
        Ok(count)
    }

    pub fn links_for_subject(
        &self,
        subject: &Subject,
        visibility: Visibility,
    ) -> Result<Vec<TagLink>, StoreError> {
        let connection = self.connect()?;
        let query = format!(
            "SELECT * FROM tag_links WHERE subject_kind = ?1 AND subject_id = ?2 AND {}
             ORDER BY id",
            visibility.clause()
        );
        let mut statement = connection.prepare(&query)?;
        let links = statement
            .query_map(
                params![subject.kind().discriminator(), subject.id()],
                row_to_tag_link,
            )?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    pub fn all_links(&self, visibility: Visibility) -> Result<Vec<TagLink>, StoreError> {
        let connection = self.connect()?;
        let query = format!(
            "SELECT * FROM tag_links WHERE {} ORDER BY id",
            visibility.clause()
        );
        let mut statement = connection.prepare(&query)?;
        let links = statement
            .query_map([], row_to_tag_link)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(links)
    }

    /// Permanently removes every link whose subject is one of `ids`. Used
    /// by the importer to rebuild associations from scratch.
    pub fn remove_links_for_subjects(
        &self,
        kind: EntityKind,
        ids: &[String],
    ) -> Result<usize, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }
        let connection = self.connect()?;
        let query = format!(
            "DELETE FROM tag_links WHERE subject_kind = ? AND subject_id IN ({})",
            placeholders(ids.len())
        );
        let mut values: Vec<&str> = vec![kind.discriminator()];
        values.extend(ids.iter().map(String::as_str));
        let removed = connection.execute(&query, params_from_iter(values))?;
        Ok(removed)
    }

    /// One page of active time entries reached through active links of a
    /// tag, ordered by link id so pagination is stable.
    pub fn linked_time_entries_page(
        &self,
        tag_id: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<TimeEntry>, StoreError> {
        let connection = self.connect()?;
        let mut statement = connection.prepare(
            "SELECT time_entries.* FROM time_entries
             JOIN tag_links ON tag_links.subject_kind = 'time_entry'
                 AND tag_links.subject_id = time_entries.id
             WHERE tag_links.tag_id = ?1
                 AND tag_links.deleted_at IS NULL
                 AND time_entries.deleted_at IS NULL
             ORDER BY tag_links.id
             LIMIT ?2 OFFSET ?3",
        )?;
        let entries = statement
            .query_map(params![tag_id, limit, offset], row_to_time_entry)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }
}
