use std::collections::HashMap;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;

use crate::application::import::consolidator::TagConsolidator;
use crate::application::import::reconciler::ImportContext;
use crate::application::import::records::TagRecord;
use crate::application::import::ImportError;
use crate::domain::naming::to_canonical_name;
use crate::infrastructure::repository::Store;

/// One side of a duplicate-tag collision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCandidate {
    pub id: String,
    pub name: String,
    pub color: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Survivor {
    Existing,
    Incoming,
}

/// Decides which of two tags with the same canonical name survives a
/// merge. The import binary asks on stdin; tests plug in fakes.
pub trait SurvivorChooser {
    fn choose(&mut self, existing: &TagCandidate, incoming: &TagCandidate) -> Survivor;
}

pub struct StdinChooser;

impl SurvivorChooser for StdinChooser {
    fn choose(&mut self, existing: &TagCandidate, incoming: &TagCandidate) -> Survivor {
        println!(
            "Tag '{}' -> '{}' already exists as '{}'",
            incoming.name,
            to_canonical_name(&incoming.name),
            existing.name
        );
        println!("Which one do you want to keep?");
        println!("1. '{}': {}", existing.name, existing.color);
        println!("2. '{}': {}", incoming.name, incoming.color);

        loop {
            print!("Keep: ");
            let _ = io::stdout().flush();
            let mut line = String::new();
            if io::stdin().lock().read_line(&mut line).unwrap_or(0) == 0 {
                // Closed stdin keeps the existing tag.
                return Survivor::Existing;
            }
            match line.trim() {
                "1" => return Survivor::Existing,
                "2" => return Survivor::Incoming,
                _ => println!("Unknown input, please enter 1 or 2"),
            }
        }
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, ImportError> {
    let raw = fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|source| ImportError::Json {
        path: path.to_path_buf(),
        source,
    })
}

/// The file's kind, read from its name up to the last underscore
/// ("tags_0.json" imports as "tags").
fn file_name_to_file_type(name: &str) -> Option<&str> {
    name.rfind('_').map(|index| &name[..index])
}

/// Scans every tags file before any mutation, asks the chooser to resolve
/// each canonical-name collision, and records the losers in the
/// consolidator.
pub fn resolve_duplicate_tags(
    directory: &Path,
    consolidator: &mut TagConsolidator,
    chooser: &mut dyn SurvivorChooser,
) -> Result<(), ImportError> {
    let mut tag_paths: Vec<PathBuf> = fs::read_dir(directory)?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("tags_"))
        })
        .collect();
    tag_paths.sort();

    let mut seen: HashMap<String, TagCandidate> = HashMap::new();
    for path in &tag_paths {
        let records: Vec<TagRecord> = read_json(path)?;
        for record in records {
            let canonical = to_canonical_name(&record.name);
            let incoming = TagCandidate {
                id: record.id,
                name: record.name,
                color: record.color,
            };
            let existing = match seen.get(&canonical) {
                Some(candidate) => candidate.clone(),
                None => {
                    seen.insert(canonical, incoming);
                    continue;
                }
            };
            match chooser.choose(&existing, &incoming) {
                Survivor::Existing => consolidator.add(&incoming.id, &existing.id),
                Survivor::Incoming => {
                    consolidator.add(&existing.id, &incoming.id);
                    seen.insert(canonical, incoming);
                }
            }
        }
    }
    Ok(())
}

/// Imports every file listed in the directory's `order.json`, in order.
/// Duplicate tag names are resolved up front; each file then dispatches on
/// its name prefix.
pub fn run_import(
    store: &Store,
    directory: &Path,
    chooser: &mut dyn SurvivorChooser,
) -> Result<(), ImportError> {
    if !directory.is_dir() {
        return Err(ImportError::NotADirectory(directory.to_path_buf()));
    }
    let order_path = directory.join("order.json");
    if !order_path.exists() {
        return Err(ImportError::MissingOrderFile(directory.to_path_buf()));
    }
    let file_order: Vec<String> = read_json(&order_path)?;

    let mut context = ImportContext::new(store);
    resolve_duplicate_tags(directory, &mut context.consolidator, chooser)?;

    for file_name in &file_order {
        let path = directory.join(file_name);
        if !path.exists() {
            return Err(ImportError::MissingDataFile(path));
        }

        tracing::info!(file = %file_name, "importing");
        match file_name_to_file_type(file_name) {
            Some("notes") => {
                let records: Vec<_> = read_json(&path)?;
                context.reconcile_notes(&records)?;
            }
            Some("statistics") => {
                let records: Vec<_> = read_json(&path)?;
                context.reconcile_statistics(&records)?;
            }
            Some("statistic_values") => {
                let records: Vec<_> = read_json(&path)?;
                context.reconcile_statistic_values(&records)?;
            }
            Some("tags") => {
                let records: Vec<_> = read_json(&path)?;
                context.reconcile_tags(&records)?;
            }
            Some("tasks") => {
                let records: Vec<_> = read_json(&path)?;
                context.reconcile_tasks(&records)?;
            }
            Some("time_entries") => {
                let records: Vec<_> = read_json(&path)?;
                context.reconcile_time_entries(&records)?;
            }
            Some("timestamps") => {
                tracing::warn!(file = %file_name, "timestamp import is disabled; skipping file");
            }
            Some("users") => {
                let records: Vec<_> = read_json(&path)?;
                context.reconcile_users(&records)?;
            }
            _ => return Err(ImportError::UnknownFileType(file_name.clone())),
        }
    }

    Ok(())
}
