use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Utc};

use crate::domain::models::{Tag, TimeEntry, User};
use crate::infrastructure::repository::Store;
use crate::infrastructure::storage::initialize_database;

static NEXT_TEMP_WORKSPACE: AtomicUsize = AtomicUsize::new(0);

pub struct TempWorkspace {
    pub path: PathBuf,
}

impl TempWorkspace {
    pub fn new() -> Self {
        let sequence = NEXT_TEMP_WORKSPACE.fetch_add(1, Ordering::Relaxed);
        let path = std::env::temp_dir().join(format!(
            "tracklog-tests-{}-{}",
            std::process::id(),
            sequence
        ));
        fs::create_dir_all(&path).expect("create temp workspace");
        Self { path }
    }

    pub fn store(&self) -> Store {
        let db_path = self.path.join("tracklog.sqlite");
        initialize_database(&db_path).expect("initialize database");
        Store::new(db_path)
    }
}

impl Drop for TempWorkspace {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub fn seed_user(store: &Store, username: &str) -> User {
    let user = User::new(username, format!("{username}@example.com"));
    store.insert_user(&user).expect("insert user");
    user
}

pub fn seed_tag(store: &Store, name: &str, user: &User) -> Tag {
    let tag = Tag::new(name, "FF00FFFF", user.id.clone());
    store.insert_tag(&tag).expect("insert tag");
    tag
}

pub fn seed_time_entry(
    store: &Store,
    user: &User,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
) -> TimeEntry {
    let entry = TimeEntry::new(started_at, ended_at, user.id.clone());
    store.insert_time_entry(&entry).expect("insert time entry");
    entry
}
