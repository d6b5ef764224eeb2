use std::collections::HashMap;

use crate::application::import::ImportError;
use crate::infrastructure::repository::Store;

/// Maps tag ids that lost a duplicate-name resolution to the id that
/// survived. Scoped to one import run.
#[derive(Debug, Default)]
pub struct TagConsolidator {
    old_id_to_new_id: HashMap<String, String>,
}

impl TagConsolidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Points `old_id` at `new_id`. Merges are not transitive on their own:
    /// if some id already resolved to `old_id`, it must follow along now, so
    /// every key mapped to `old_id` is re-pointed as well. After any sequence
    /// of merges a single lookup reaches the current survivor.
    pub fn add(&mut self, old_id: &str, new_id: &str) {
        let mut keys_to_change = vec![old_id.to_string()];
        for (key, value) in &self.old_id_to_new_id {
            if value == old_id {
                keys_to_change.push(key.clone());
            }
        }

        for key in keys_to_change {
            self.old_id_to_new_id.insert(key, new_id.to_string());
        }
    }

    /// The id to use in place of `id`; unmapped ids come back unchanged.
    pub fn get_target_id(&self, id: &str) -> String {
        self.old_id_to_new_id
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    pub fn is_mapped(&self, id: &str) -> bool {
        self.old_id_to_new_id.contains_key(id)
    }
}

/// Username to user id lookups, cached after the first store hit. Scoped
/// to one import run.
#[derive(Debug, Default)]
pub struct UserCache {
    username_to_id: HashMap<String, String>,
}

impl UserCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user_id(&mut self, store: &Store, username: &str) -> Result<String, ImportError> {
        if let Some(id) = self.username_to_id.get(username) {
            return Ok(id.clone());
        }

        let id = store
            .user_id_by_username(username)?
            .ok_or_else(|| ImportError::UnknownUser(username.to_string()))?;
        self.username_to_id
            .insert(username.to_string(), id.clone());
        Ok(id)
    }
}
