use std::collections::HashSet;

use chrono::Utc;

use crate::application::import::consolidator::{TagConsolidator, UserCache};
use crate::application::import::records::{
    parse_color, parse_epoch, parse_opt_epoch, NoteRecord, StatisticRecord, StatisticValueRecord,
    TagRecord, TagRef, TaskRecord, TimeEntryRecord, TimestampRecord, UserRecord,
};
use crate::application::import::ImportError;
use crate::domain::models::{
    EntityKind, Note, Statistic, StatisticTimeType, StatisticValue, Subject, Tag, Task, TimeEntry,
    Timestamp, User,
};
use crate::domain::naming::to_canonical_name;
use crate::infrastructure::repository::{Store, Visibility};

pub const CHUNK_SIZE: usize = 500;

/// One import run's mutable state: the store handle, the tag-id merge map
/// filled in by duplicate resolution, the username cache, and the set of
/// task canonical names seen so far (seeded lazily from the whole table).
pub struct ImportContext<'a> {
    store: &'a Store,
    pub consolidator: TagConsolidator,
    users: UserCache,
    known_task_names: Option<HashSet<String>>,
}

impl<'a> ImportContext<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            consolidator: TagConsolidator::new(),
            users: UserCache::new(),
            known_task_names: None,
        }
    }

    /// Upserts note records and rebuilds their tag links from scratch.
    pub fn reconcile_notes(&mut self, records: &[NoteRecord]) -> Result<(), ImportError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let existing = self.remove_links_of_existing(
                EntityKind::Note,
                chunk.iter().map(|record| record.id.clone()).collect(),
            )?;

            for record in chunk {
                let assigned_to = self.users.user_id(self.store, &record.assigned_to)?;
                if existing.contains(&record.id) {
                    if let Some(mut note) = self.store.get_note(&record.id, Visibility::All)? {
                        note.updated_at = parse_epoch(&record.updated_at)?;
                        note.title = record.title.clone();
                        note.content = record.content.clone();
                        note.assigned_to = assigned_to;
                        self.store.update_note(&note)?;
                    }
                } else {
                    self.store.insert_note(&Note {
                        id: record.id.clone(),
                        created_at: parse_epoch(&record.created_at)?,
                        updated_at: parse_epoch(&record.updated_at)?,
                        for_date: None,
                        title: record.title.clone(),
                        content: record.content.clone(),
                        assigned_to,
                    })?;
                }
                self.rebuild_links(&Subject::Note(record.id.clone()), &record.tags)?;
            }
        }
        Ok(())
    }

    pub fn reconcile_statistics(&mut self, records: &[StatisticRecord]) -> Result<(), ImportError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let existing = self.remove_links_of_existing(
                EntityKind::Statistic,
                chunk.iter().map(|record| record.id.clone()).collect(),
            )?;

            for record in chunk {
                let assigned_to = self.users.user_id(self.store, &record.assigned_to)?;
                let updated_at =
                    parse_opt_epoch(record.updated_at.as_ref())?.unwrap_or_else(Utc::now);
                let time_type = StatisticTimeType::parse(&record.time_type)
                    .map_err(ImportError::InvalidRecord)?;
                if existing.contains(&record.id) {
                    if let Some(mut statistic) =
                        self.store.get_statistic(&record.id, Visibility::All)?
                    {
                        statistic.updated_at = updated_at;
                        statistic.icon = record.icon.clone();
                        statistic.name = record.name.clone();
                        statistic.canonical_name = to_canonical_name(&record.canonical_name);
                        statistic.description = record.description.clone();
                        statistic.color = parse_color(&record.color)?;
                        statistic.unit = record.unit.clone();
                        statistic.time_type = time_type;
                        statistic.assigned_to = assigned_to;
                        self.store.update_statistic(&statistic)?;
                    }
                } else {
                    self.store.insert_statistic(&Statistic {
                        id: record.id.clone(),
                        created_at: parse_epoch(&record.created_at)?,
                        updated_at,
                        icon: record.icon.clone(),
                        name: record.name.clone(),
                        canonical_name: to_canonical_name(&record.canonical_name),
                        description: record.description.clone(),
                        color: parse_color(&record.color)?,
                        unit: record.unit.clone(),
                        time_type,
                        assigned_to,
                    })?;
                }
                self.rebuild_links(&Subject::Statistic(record.id.clone()), &record.tags)?;
            }
        }
        Ok(())
    }

    /// Statistic values carry no tag links and no owner of their own.
    pub fn reconcile_statistic_values(
        &mut self,
        records: &[StatisticValueRecord],
    ) -> Result<(), ImportError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let ids: Vec<String> = chunk.iter().map(|record| record.id.clone()).collect();
            let existing = self.store.existing_statistic_value_ids(&ids)?;

            for record in chunk {
                if existing.contains(&record.id) {
                    if let Some(mut value) = self.store.get_statistic_value(&record.id)? {
                        value.updated_at = Utc::now();
                        value.started_at = parse_epoch(&record.started_at)?;
                        value.ended_at = Some(parse_epoch(&record.ended_at)?);
                        value.value = record.value;
                        value.statistic_id = record.statistic_id.clone();
                        self.store.update_statistic_value(&value)?;
                    }
                } else {
                    let created_at = parse_epoch(&record.created_at)?;
                    self.store.insert_statistic_value(&StatisticValue {
                        id: record.id.clone(),
                        created_at,
                        updated_at: created_at,
                        started_at: parse_epoch(&record.started_at)?,
                        ended_at: Some(parse_epoch(&record.ended_at)?),
                        value: record.value,
                        statistic_id: record.statistic_id.clone(),
                        time_entry_id: None,
                        timestamp_id: None,
                    })?;
                }
            }
        }
        Ok(())
    }

    /// Upserts tag records. A record whose id already lost a duplicate-name
    /// resolution is dropped instead of inserted; its references were
    /// redirected to the survivor.
    pub fn reconcile_tags(&mut self, records: &[TagRecord]) -> Result<(), ImportError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let ids: Vec<String> = chunk.iter().map(|record| record.id.clone()).collect();
            let existing = self.store.existing_ids(EntityKind::Tag, &ids)?;

            for record in chunk {
                let assigned_to = self.users.user_id(self.store, &record.assigned_to)?;
                if existing.contains(&record.id) {
                    if let Some(mut tag) = self.store.get_tag(&record.id, Visibility::All)? {
                        tag.updated_at = Utc::now();
                        tag.name = record.name.clone();
                        tag.canonical_name = to_canonical_name(&record.name);
                        tag.color = parse_color(&record.color)?;
                        tag.assigned_to = assigned_to;
                        self.store.update_tag(&tag)?;
                    }
                } else {
                    if self.consolidator.is_mapped(&record.id) {
                        continue;
                    }
                    let created_at = parse_epoch(&record.created_at)?;
                    self.store.insert_tag(&Tag {
                        id: record.id.clone(),
                        created_at,
                        updated_at: created_at,
                        canonical_name: to_canonical_name(&record.name),
                        name: record.name.clone(),
                        color: parse_color(&record.color)?,
                        assigned_to,
                    })?;
                }
            }
        }
        Ok(())
    }

    pub fn reconcile_tasks(&mut self, records: &[TaskRecord]) -> Result<(), ImportError> {
        let mut known_names = match self.known_task_names.take() {
            Some(names) => names,
            None => self.store.task_canonical_names()?,
        };
        let result = self.reconcile_task_records(records, &mut known_names);
        self.known_task_names = Some(known_names);
        result
    }

    fn reconcile_task_records(
        &mut self,
        records: &[TaskRecord],
        known_names: &mut HashSet<String>,
    ) -> Result<(), ImportError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let existing = self.remove_links_of_existing(
                EntityKind::Task,
                chunk.iter().map(|record| record.id.clone()).collect(),
            )?;

            for record in chunk {
                let assigned_to = self.users.user_id(self.store, &record.assigned_to)?;
                if existing.contains(&record.id) {
                    if let Some(mut task) = self.store.get_task(&record.id, Visibility::All)? {
                        // The task's previous name is not a collision with
                        // itself.
                        known_names.remove(&task.canonical_name);
                        task.updated_at = parse_epoch(&record.updated_at)?;
                        task.completed_at = parse_opt_epoch(record.completed_at.as_ref())?;
                        task.priority = record.priority;
                        task.active = record.active;
                        task.name = record.name.clone();
                        task.canonical_name = to_canonical_name(&record.canonical_name);
                        task.description = record.description.clone();
                        task.assigned_to = assigned_to;
                        task.template = record.template;
                        task.parent_id = record.parent_id.clone();
                        ensure_unique_task_name(&mut task, known_names);
                        self.store.update_task(&task)?;
                    }
                } else {
                    let mut task = Task {
                        id: record.id.clone(),
                        created_at: parse_epoch(&record.created_at)?,
                        updated_at: parse_epoch(&record.updated_at)?,
                        completed_at: parse_opt_epoch(record.completed_at.as_ref())?,
                        closed_at: None,
                        due_at: None,
                        name: record.name.clone(),
                        canonical_name: record.canonical_name.clone(),
                        description: record.description.clone(),
                        priority: record.priority,
                        template: record.template,
                        active: record.active,
                        time_estimate: None,
                        assigned_to,
                        parent_id: record.parent_id.clone(),
                    };
                    ensure_unique_task_name(&mut task, known_names);
                    self.store.insert_task(&task)?;
                }
                self.rebuild_links(&Subject::Task(record.id.clone()), &record.tags)?;
            }
        }
        Ok(())
    }

    pub fn reconcile_time_entries(
        &mut self,
        records: &[TimeEntryRecord],
    ) -> Result<(), ImportError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let existing = self.remove_links_of_existing(
                EntityKind::TimeEntry,
                chunk.iter().map(|record| record.id.clone()).collect(),
            )?;

            for record in chunk {
                let assigned_to = self.users.user_id(self.store, &record.assigned_to)?;
                let task_id = record.task.as_ref().map(|task| task.id.clone());
                if existing.contains(&record.id) {
                    if let Some(mut entry) =
                        self.store.get_time_entry(&record.id, Visibility::All)?
                    {
                        entry.updated_at = parse_epoch(&record.updated_at)?;
                        entry.started_at = parse_epoch(&record.started_at)?;
                        entry.ended_at = parse_opt_epoch(record.ended_at.as_ref())?;
                        entry.description = record.description.clone();
                        entry.assigned_to = assigned_to;
                        entry.task_id = task_id;
                        self.store.update_time_entry(&entry)?;
                    }
                } else {
                    self.store.insert_time_entry(&TimeEntry {
                        id: record.id.clone(),
                        created_at: parse_epoch(&record.created_at)?,
                        updated_at: parse_epoch(&record.updated_at)?,
                        started_at: parse_epoch(&record.started_at)?,
                        ended_at: parse_opt_epoch(record.ended_at.as_ref())?,
                        description: record.description.clone(),
                        assigned_to,
                        task_id,
                    })?;
                }
                self.rebuild_links(&Subject::TimeEntry(record.id.clone()), &record.tags)?;
            }
        }
        Ok(())
    }

    // Not dispatched by the runner yet; timestamp files are skipped with a
    // warning until exports settle on a timestamp format.
    pub fn reconcile_timestamps(&mut self, records: &[TimestampRecord]) -> Result<(), ImportError> {
        for chunk in records.chunks(CHUNK_SIZE) {
            let existing = self.remove_links_of_existing(
                EntityKind::Timestamp,
                chunk.iter().map(|record| record.id.clone()).collect(),
            )?;

            for record in chunk {
                let assigned_to = self.users.user_id(self.store, &record.assigned_to)?;
                if existing.contains(&record.id) {
                    if let Some(mut timestamp) =
                        self.store.get_timestamp(&record.id, Visibility::All)?
                    {
                        timestamp.created_at = parse_epoch(&record.created_at)?;
                        timestamp.description = record.description.clone();
                        timestamp.assigned_to = assigned_to;
                        self.store.update_timestamp(&timestamp)?;
                    }
                } else {
                    self.store.insert_timestamp(&Timestamp {
                        id: record.id.clone(),
                        created_at: parse_epoch(&record.created_at)?,
                        description: record.description.clone(),
                        assigned_to,
                    })?;
                }
                self.rebuild_links(&Subject::Timestamp(record.id.clone()), &record.tags)?;
            }
        }
        Ok(())
    }

    /// Creates users that do not exist yet; existing usernames are left
    /// untouched.
    pub fn reconcile_users(&mut self, records: &[UserRecord]) -> Result<(), ImportError> {
        for record in records {
            if self.store.user_id_by_username(&record.username)?.is_none() {
                let user = User::new(record.username.clone(), record.email.clone());
                self.store.insert_user(&user)?;
            }
        }
        Ok(())
    }

    /// Drops the links of the chunk's already-present subjects so they can
    /// be rebuilt from the records, and returns which ids were present.
    fn remove_links_of_existing(
        &mut self,
        kind: EntityKind,
        ids: Vec<String>,
    ) -> Result<HashSet<String>, ImportError> {
        let existing = self.store.existing_ids(kind, &ids)?;
        let present: Vec<String> = ids
            .into_iter()
            .filter(|id| existing.contains(id))
            .collect();
        self.store.remove_links_for_subjects(kind, &present)?;
        Ok(existing)
    }

    fn rebuild_links(&mut self, subject: &Subject, tags: &[TagRef]) -> Result<(), ImportError> {
        for tag in tags {
            let tag_id = self.consolidator.get_target_id(&tag.id);
            self.store.insert_tag_link(&tag_id, subject)?;
        }
        Ok(())
    }
}

/// Suffixes `__1`, `__2`, … onto the task's name and canonical name until
/// the canonical name is unique, truncating to stay under the 255-character
/// limit and prepending the original names to the description as provenance.
fn ensure_unique_task_name(task: &mut Task, known_names: &mut HashSet<String>) {
    let name = task.name.clone();
    let canonical_name = task.canonical_name.clone();
    let description = task.description.clone();

    let mut counter: u64 = 1;
    while known_names.contains(&task.canonical_name) {
        task.description = format!(
            "Original name: {name}. Original canonical name: {canonical_name}\n{description}"
        );

        let append_len = counter.to_string().len() + 2;
        if name.chars().count() >= 255 - append_len {
            task.name = format!("{}__{counter}", drop_last_chars(&name, append_len));
            task.canonical_name =
                format!("{}__{counter}", drop_last_chars(&canonical_name, append_len));
        } else {
            task.name = format!("{name}__{counter}");
            task.canonical_name = format!("{canonical_name}__{counter}");
        }

        counter += 1;
    }

    known_names.insert(task.canonical_name.clone());
}

fn drop_last_chars(value: &str, count: usize) -> &str {
    let keep = value.chars().count().saturating_sub(count);
    match value.char_indices().nth(keep) {
        Some((index, _)) => &value[..index],
        None => value,
    }
}
