use crate::models::{ConfigDiff, DatabaseDiff, FileDiff};
use crate::store::ConfigSnapshot;
use crate::tools::archive::ArchiveEntry;
use crate::tools::DatabaseSummary;
use serde::Serialize;
use std::collections::BTreeMap;

fn keyed<T: Serialize>(collection: &str, items: &[T], id: impl Fn(&T) -> i64) -> BTreeMap<String, serde_json::Value> {
    items
        .iter()
        .map(|item| {
            let value = serde_json::to_value(item).unwrap_or(serde_json::Value::Null);
            (format!("{}:{}", collection, id(item)), value)
        })
        .collect()
}

fn snapshot_entries(snapshot: &ConfigSnapshot) -> BTreeMap<String, serde_json::Value> {
    let mut entries = keyed("users", &snapshot.users, |u| u.id);
    entries.extend(keyed("categories", &snapshot.categories, |c| c.id));
    entries.extend(keyed("products", &snapshot.products, |p| p.id));
    entries
}

/// Records added, removed or changed between two config exports
pub fn diff_config(old: &ConfigSnapshot, new: &ConfigSnapshot) -> ConfigDiff {
    let before = snapshot_entries(old);
    let after = snapshot_entries(new);
    let mut diff = ConfigDiff::default();

    for (key, value) in &after {
        match before.get(key) {
            None => diff.settings_added.push(key.clone()),
            Some(prev) if prev != value => diff.settings_modified.push(key.clone()),
            Some(_) => {}
        }
    }
    diff.settings_removed = before
        .keys()
        .filter(|k| !after.contains_key(*k))
        .cloned()
        .collect();
    diff
}

/// A file counts as modified when its size or mtime differs
pub fn diff_files(
    old: &BTreeMap<String, ArchiveEntry>,
    new: &BTreeMap<String, ArchiveEntry>,
) -> FileDiff {
    let mut diff = FileDiff::default();
    for (path, entry) in new {
        match old.get(path) {
            None => diff.files_added.push(path.clone()),
            Some(prev) if prev != entry => diff.files_modified.push(path.clone()),
            Some(_) => {}
        }
    }
    diff.files_removed = old.keys().filter(|p| !new.contains_key(*p)).cloned().collect();
    diff
}

/// Tables added or removed, plus non-zero row deltas where both counts are known
pub fn diff_database(old: &DatabaseSummary, new: &DatabaseSummary) -> DatabaseDiff {
    let mut diff = DatabaseDiff::default();
    for (table, rows) in &new.tables {
        match old.tables.get(table) {
            None => diff.tables_added.push(table.clone()),
            Some(prev) => {
                if let (Some(before), Some(after)) = (prev, rows) {
                    let delta = *after as i64 - *before as i64;
                    if delta != 0 {
                        diff.rows_changed.insert(table.clone(), delta);
                    }
                }
            }
        }
    }
    diff.tables_removed = old
        .tables
        .keys()
        .filter(|t| !new.tables.contains_key(*t))
        .cloned()
        .collect();
    diff
}
