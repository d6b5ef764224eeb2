use std::collections::HashMap;

use chrono::{Duration, NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::domain::intervals::split_across_days;
use crate::domain::models::{Subject, Tag};
use crate::domain::naming::to_canonical_name;
use crate::infrastructure::error::StoreError;
use crate::infrastructure::repository::{Store, Visibility};

/// Page size for walking a tag's linked time entries.
pub const DEFAULT_PAGE_SIZE: usize = 500;

#[derive(Debug, Error)]
pub enum TagError {
    #[error("tag not found")]
    NotFound,
    #[error("tag belongs to a different user")]
    Forbidden,
    #[error("a tag named '{0}' already exists")]
    NameTaken(String),
    #[error("invalid tag: {0}")]
    Invalid(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Per-day durations for one tag, keyed by the calendar day each segment
/// fell on. `skipped` counts entries whose range could not be split.
#[derive(Debug, Default)]
pub struct TimeReport {
    pub by_day: HashMap<NaiveDate, Duration>,
    pub skipped: usize,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TagTotals {
    pub references: i64,
    /// Total tracked seconds across all linked, ended time entries.
    pub total_time: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct TimeReportRow {
    pub date: String,
    pub seconds: i64,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct FormattedTimeReport {
    pub report: Vec<TimeReportRow>,
    pub total: i64,
}

/// Tag CRUD plus the aggregate views built on tag links.
#[derive(Debug, Clone)]
pub struct TagService {
    store: Store,
}

impl TagService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub fn create_tag(&self, user_id: &str, name: &str, color: &str) -> Result<Tag, TagError> {
        let tag = Tag::new(name, color, user_id);
        tag.validate().map_err(TagError::Invalid)?;
        match self.store.insert_tag(&tag) {
            Ok(()) => Ok(tag),
            Err(error) if error.is_constraint_violation() => {
                Err(TagError::NameTaken(tag.canonical_name))
            }
            Err(error) => Err(error.into()),
        }
    }

    pub fn update_tag(
        &self,
        tag_id: &str,
        user_id: &str,
        name: Option<&str>,
        color: Option<&str>,
    ) -> Result<Tag, TagError> {
        let mut tag = self.owned_tag(tag_id, user_id)?;
        if let Some(name) = name {
            tag.name = name.to_string();
            tag.canonical_name = to_canonical_name(name);
        }
        if let Some(color) = color {
            tag.color = color.to_string();
        }
        tag.updated_at = Utc::now();
        tag.validate().map_err(TagError::Invalid)?;
        match self.store.update_tag(&tag) {
            Ok(()) => Ok(tag),
            Err(error) if error.is_constraint_violation() => {
                Err(TagError::NameTaken(tag.canonical_name))
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Links every tag in `tags` to `subject`, skipping pairs already
    /// actively linked. Returns how many links were created.
    pub fn tag_object(&self, subject: &Subject, tags: &[Tag]) -> Result<usize, StoreError> {
        let tag_ids: Vec<String> = tags.iter().map(|tag| tag.id.clone()).collect();
        let mut linked = self.store.active_link_tag_ids(subject, &tag_ids)?;
        let mut created = 0;
        for tag in tags {
            if linked.contains(&tag.id) {
                continue;
            }
            if self.store.insert_tag_link(&tag.id, subject)? {
                created += 1;
            }
            linked.insert(tag.id.clone());
        }
        Ok(created)
    }

    /// How many active subjects carry this tag.
    pub fn total_references(&self, tag_id: &str) -> Result<i64, StoreError> {
        self.store.count_links_for_tag(tag_id, Visibility::Active)
    }

    pub fn total_time(&self, tag_id: &str) -> Result<Duration, StoreError> {
        self.total_time_paged(tag_id, DEFAULT_PAGE_SIZE)
    }

    /// Sums the durations of the tag's linked, ended time entries, reading
    /// `page_size` entries at a time. Open entries contribute nothing.
    pub fn total_time_paged(
        &self,
        tag_id: &str,
        page_size: usize,
    ) -> Result<Duration, StoreError> {
        let mut total = Duration::zero();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .linked_time_entries_page(tag_id, page_size, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for entry in &page {
                if let Some(ended_at) = entry.ended_at {
                    total += ended_at - entry.started_at;
                }
            }
            if page.len() < page_size {
                break;
            }
        }
        Ok(total)
    }

    pub fn time_report(&self, tag_id: &str) -> Result<TimeReport, StoreError> {
        self.time_report_paged(tag_id, DEFAULT_PAGE_SIZE)
    }

    /// Accumulates the tag's tracked time per calendar day. Entries spanning
    /// midnight are split so each day receives only its own share; entries
    /// with an end before their start are counted in `skipped` and logged.
    pub fn time_report_paged(
        &self,
        tag_id: &str,
        page_size: usize,
    ) -> Result<TimeReport, StoreError> {
        let mut report = TimeReport::default();
        let mut offset = 0;
        loop {
            let page = self
                .store
                .linked_time_entries_page(tag_id, page_size, offset)?;
            if page.is_empty() {
                break;
            }
            offset += page.len();
            for entry in &page {
                let Some(ended_at) = entry.ended_at else {
                    continue;
                };
                match split_across_days(&entry.started_at, &ended_at) {
                    Ok(points) => {
                        for pair in points.chunks(2) {
                            let day = pair[0].date_naive();
                            *report.by_day.entry(day).or_insert_with(Duration::zero) +=
                                pair[1] - pair[0];
                        }
                    }
                    Err(error) => {
                        tracing::warn!(
                            entry_id = %entry.id,
                            %error,
                            "skipping time entry with an invalid range"
                        );
                        report.skipped += 1;
                    }
                }
            }
            if page.len() < page_size {
                break;
            }
        }
        Ok(report)
    }

    pub fn tag_totals(&self, tag_id: &str, user_id: &str) -> Result<TagTotals, TagError> {
        let tag = self.owned_tag(tag_id, user_id)?;
        Ok(TagTotals {
            references: self.total_references(&tag.id)?,
            total_time: self.total_time(&tag.id)?.num_seconds(),
        })
    }

    /// The per-day report shaped for serialization: date-sorted rows plus
    /// the grand total, all in whole seconds.
    pub fn formatted_time_report(
        &self,
        tag_id: &str,
        user_id: &str,
    ) -> Result<FormattedTimeReport, TagError> {
        let tag = self.owned_tag(tag_id, user_id)?;
        let by_day = self.time_report(&tag.id)?.by_day;

        let mut days: Vec<(NaiveDate, Duration)> = by_day.into_iter().collect();
        days.sort_by_key(|(day, _)| *day);

        let mut total = 0;
        let report = days
            .into_iter()
            .map(|(day, duration)| {
                let seconds = duration.num_seconds();
                total += seconds;
                TimeReportRow {
                    date: day.to_string(),
                    seconds,
                }
            })
            .collect();
        Ok(FormattedTimeReport { report, total })
    }

    fn owned_tag(&self, tag_id: &str, user_id: &str) -> Result<Tag, TagError> {
        let tag = self
            .store
            .get_tag(tag_id, Visibility::Active)?
            .ok_or(TagError::NotFound)?;
        if tag.assigned_to != user_id {
            return Err(TagError::Forbidden);
        }
        Ok(tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{EntityKind, Note, Task};
    use crate::test_support::{seed_tag, seed_time_entry, seed_user, TempWorkspace};
    use chrono::{DateTime, TimeZone};
    use proptest::prelude::*;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
    }

    #[test]
    fn tagging_links_every_given_tag_once() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tags = vec![
            seed_tag(&store, "work", &user),
            seed_tag(&store, "deep", &user),
            seed_tag(&store, "billable", &user),
        ];
        let task = Task::new("write report", user.id.clone());
        store.insert_task(&task).unwrap();
        let subject = Subject::Task(task.id.clone());

        assert_eq!(service.tag_object(&subject, &tags).unwrap(), 3);
        assert_eq!(store.links_for_subject(&subject, Visibility::Active).unwrap().len(), 3);

        // Repeating the call creates nothing new.
        assert_eq!(service.tag_object(&subject, &tags).unwrap(), 0);
        assert_eq!(store.count_links(Visibility::Active).unwrap(), 3);
    }

    #[test]
    fn tagging_skips_already_linked_tags_but_adds_new_ones() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let first = seed_tag(&store, "work", &user);
        let second = seed_tag(&store, "deep", &user);
        let note = Note::new("standup", user.id.clone());
        store.insert_note(&note).unwrap();
        let subject = Subject::Note(note.id.clone());

        assert_eq!(service.tag_object(&subject, &[first.clone()]).unwrap(), 1);
        assert_eq!(service.tag_object(&subject, &[first, second]).unwrap(), 1);
        assert_eq!(store.count_links(Visibility::Active).unwrap(), 2);
    }

    #[test]
    fn duplicate_tags_in_one_call_link_once() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let entry = seed_time_entry(&store, &user, utc(2000, 1, 1, 9, 0), None);
        let subject = Subject::TimeEntry(entry.id.clone());

        let created = service
            .tag_object(&subject, &[tag.clone(), tag.clone(), tag])
            .unwrap();

        assert_eq!(created, 1);
        assert_eq!(store.count_links(Visibility::Active).unwrap(), 1);
    }

    #[test]
    fn tags_can_tag_other_tags() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let meta = seed_tag(&store, "meta", &user);
        let target = seed_tag(&store, "work", &user);
        let subject = Subject::Tag(target.id.clone());

        assert_eq!(service.tag_object(&subject, &[meta]).unwrap(), 1);
        assert_eq!(service.total_references(&target.id).unwrap(), 0);
    }

    #[test]
    fn total_references_counts_active_links_across_kinds() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let task = Task::new("write report", user.id.clone());
        store.insert_task(&task).unwrap();
        let entry = seed_time_entry(&store, &user, utc(2000, 1, 1, 9, 0), None);

        service
            .tag_object(&Subject::Task(task.id.clone()), std::slice::from_ref(&tag))
            .unwrap();
        service
            .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
            .unwrap();
        assert_eq!(service.total_references(&tag.id).unwrap(), 2);

        // Soft-deleting the task retires its link.
        store.delete(EntityKind::Task, &task.id, false).unwrap();
        assert_eq!(service.total_references(&tag.id).unwrap(), 1);
    }

    #[test]
    fn total_time_sums_linked_ended_entries() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let start = utc(2000, 1, 1, 9, 0);
        let first = seed_time_entry(&store, &user, start, Some(start + Duration::seconds(10)));
        let second = seed_time_entry(&store, &user, start, Some(start + Duration::seconds(10)));
        for entry in [&first, &second] {
            service
                .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
                .unwrap();
        }

        assert_eq!(service.total_time(&tag.id).unwrap(), Duration::seconds(20));

        // Retired entries fall out of the total.
        store
            .delete(EntityKind::TimeEntry, &second.id, false)
            .unwrap();
        assert_eq!(service.total_time(&tag.id).unwrap(), Duration::seconds(10));
    }

    #[test]
    fn open_entries_contribute_zero_time() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let entry = seed_time_entry(&store, &user, utc(2000, 1, 1, 9, 0), None);
        service
            .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
            .unwrap();

        assert_eq!(service.total_time(&tag.id).unwrap(), Duration::zero());
        assert_eq!(service.total_references(&tag.id).unwrap(), 1);
    }

    #[test]
    fn total_time_is_the_same_for_any_page_size() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let start = utc(2000, 1, 1, 9, 0);
        for minutes in 1..=5 {
            let entry =
                seed_time_entry(&store, &user, start, Some(start + Duration::minutes(minutes)));
            service
                .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
                .unwrap();
        }

        let expected = Duration::minutes(1 + 2 + 3 + 4 + 5);
        for page_size in [1, 2, 3, 5, DEFAULT_PAGE_SIZE] {
            assert_eq!(
                service.total_time_paged(&tag.id, page_size).unwrap(),
                expected
            );
        }
    }

    #[test]
    fn time_report_is_empty_without_entries() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);

        let report = service.time_report(&tag.id).unwrap();

        assert!(report.by_day.is_empty());
        assert_eq!(report.skipped, 0);
    }

    #[test]
    fn time_report_accumulates_entries_on_one_day() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let start = utc(2000, 1, 1, 9, 0);
        for minutes in [40, 20, 10] {
            let entry =
                seed_time_entry(&store, &user, start, Some(start + Duration::minutes(minutes)));
            service
                .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
                .unwrap();
        }

        let report = service.time_report(&tag.id).unwrap();

        assert_eq!(report.by_day.len(), 1);
        assert_eq!(
            report.by_day[&start.date_naive()],
            Duration::hours(1) + Duration::minutes(10)
        );
    }

    #[test]
    fn a_thirteen_hour_entry_splits_twelve_and_one() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let entry = seed_time_entry(
            &store,
            &user,
            utc(2000, 1, 1, 12, 0),
            Some(utc(2000, 1, 2, 1, 0)),
        );
        service
            .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
            .unwrap();

        let report = service.time_report(&tag.id).unwrap();

        assert_eq!(
            report.by_day[&utc(2000, 1, 1, 0, 0).date_naive()],
            Duration::hours(12)
        );
        assert_eq!(
            report.by_day[&utc(2000, 1, 2, 0, 0).date_naive()],
            Duration::hours(1)
        );
    }

    #[test]
    fn time_report_splits_overnight_entries_between_days() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);

        // 22:30 to 02:30 the next day, plus a full 21 hours on day one.
        let overnight = seed_time_entry(
            &store,
            &user,
            utc(2000, 1, 1, 22, 30),
            Some(utc(2000, 1, 2, 2, 30)),
        );
        let daytime = seed_time_entry(
            &store,
            &user,
            utc(2000, 1, 1, 1, 0),
            Some(utc(2000, 1, 1, 22, 0)),
        );
        for entry in [&overnight, &daytime] {
            service
                .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
                .unwrap();
        }

        let report = service.time_report(&tag.id).unwrap();

        assert_eq!(report.by_day.len(), 2);
        assert_eq!(
            report.by_day[&utc(2000, 1, 1, 0, 0).date_naive()],
            Duration::hours(22) + Duration::minutes(30)
        );
        assert_eq!(
            report.by_day[&utc(2000, 1, 2, 0, 0).date_naive()],
            Duration::hours(2) + Duration::minutes(30)
        );
    }

    #[test]
    fn time_report_skips_and_counts_invalid_ranges() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let start = utc(2000, 1, 1, 9, 0);
        let good = seed_time_entry(&store, &user, start, Some(start + Duration::minutes(30)));
        let bad = seed_time_entry(&store, &user, start, Some(start - Duration::hours(1)));
        for entry in [&good, &bad] {
            service
                .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
                .unwrap();
        }

        let report = service.time_report(&tag.id).unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.by_day[&start.date_naive()], Duration::minutes(30));
    }

    #[test]
    fn tag_totals_serialize_in_camel_case() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let start = utc(2000, 1, 1, 9, 0);
        let entry = seed_time_entry(&store, &user, start, Some(start + Duration::seconds(90)));
        service
            .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
            .unwrap();

        let totals = service.tag_totals(&tag.id, &user.id).unwrap();
        assert_eq!(
            serde_json::to_value(&totals).unwrap(),
            serde_json::json!({ "references": 1, "totalTime": 90 })
        );
    }

    #[test]
    fn formatted_time_report_is_date_sorted_with_a_total() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = seed_tag(&store, "work", &user);
        let later = seed_time_entry(
            &store,
            &user,
            utc(2000, 1, 5, 9, 0),
            Some(utc(2000, 1, 5, 9, 30)),
        );
        let earlier = seed_time_entry(
            &store,
            &user,
            utc(2000, 1, 2, 9, 0),
            Some(utc(2000, 1, 2, 10, 0)),
        );
        for entry in [&later, &earlier] {
            service
                .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
                .unwrap();
        }

        let formatted = service.formatted_time_report(&tag.id, &user.id).unwrap();

        assert_eq!(
            formatted.report,
            vec![
                TimeReportRow {
                    date: "2000-01-02".to_string(),
                    seconds: 3600,
                },
                TimeReportRow {
                    date: "2000-01-05".to_string(),
                    seconds: 1800,
                },
            ]
        );
        assert_eq!(formatted.total, 5400);
    }

    #[test]
    fn create_tag_rejects_a_duplicate_canonical_name() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        service.create_tag(&user.id, "Work", "FF00FFFF").unwrap();

        let conflict = service.create_tag(&user.id, "  WORK ", "00FF00FF");

        assert!(matches!(conflict, Err(TagError::NameTaken(name)) if name == "work"));
    }

    #[test]
    fn same_tag_name_is_fine_for_different_users() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let ada = seed_user(&store, "ada");
        let grace = seed_user(&store, "grace");

        service.create_tag(&ada.id, "work", "FF00FFFF").unwrap();
        service.create_tag(&grace.id, "work", "FF00FFFF").unwrap();
    }

    #[test]
    fn update_tag_recomputes_the_canonical_name() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let user = seed_user(&store, "ada");
        let tag = service.create_tag(&user.id, "work", "FF00FFFF").unwrap();

        let renamed = service
            .update_tag(&tag.id, &user.id, Some("  Deep Work "), None)
            .unwrap();

        assert_eq!(renamed.canonical_name, "deep work");
        let stored = store.get_tag(&tag.id, Visibility::Active).unwrap().unwrap();
        assert_eq!(stored.canonical_name, "deep work");
        assert_eq!(stored.color, "FF00FFFF");
    }

    #[test]
    fn tag_access_checks_ownership_and_existence() {
        let workspace = TempWorkspace::new();
        let store = workspace.store();
        let service = TagService::new(store.clone());
        let ada = seed_user(&store, "ada");
        let grace = seed_user(&store, "grace");
        let tag = seed_tag(&store, "work", &ada);

        assert!(matches!(
            service.tag_totals(&tag.id, &grace.id),
            Err(TagError::Forbidden)
        ));
        assert!(matches!(
            service.tag_totals("missing", &ada.id),
            Err(TagError::NotFound)
        ));

        // A soft-deleted tag is invisible through the service.
        store.delete(EntityKind::Tag, &tag.id, false).unwrap();
        assert!(matches!(
            service.formatted_time_report(&tag.id, &ada.id),
            Err(TagError::NotFound)
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(8))]

        #[test]
        fn totals_do_not_depend_on_the_page_size(
            durations in prop::collection::vec(1i64..7_200, 1..12),
            page_size in 1usize..6,
        ) {
            let workspace = TempWorkspace::new();
            let store = workspace.store();
            let service = TagService::new(store.clone());
            let user = seed_user(&store, "ada");
            let tag = seed_tag(&store, "work", &user);
            let start = utc(2000, 1, 1, 9, 0);
            for &seconds in &durations {
                let entry = seed_time_entry(
                    &store,
                    &user,
                    start,
                    Some(start + Duration::seconds(seconds)),
                );
                service
                    .tag_object(&Subject::TimeEntry(entry.id.clone()), &[tag.clone()])
                    .unwrap();
            }

            let expected = Duration::seconds(durations.iter().sum());
            prop_assert_eq!(service.total_time_paged(&tag.id, page_size).unwrap(), expected);

            let report = service.time_report_paged(&tag.id, page_size).unwrap();
            prop_assert_eq!(report.by_day.len(), 1);
            prop_assert_eq!(report.by_day[&start.date_naive()], expected);
        }
    }
}
