//! Change extraction between two revisions of the tracked files.
//!
//! Units are aligned by key, never by position: reordering or re-wrapping a
//! file does not register as a change.

use std::collections::{BTreeMap, HashMap, HashSet};

use tracing::{debug, warn};

use crate::errors::ExtractError;
use crate::format::TranslationFormat;
use crate::models::{ChangedFields, Revision, StringUnit, UnitChange};
use crate::vcs::VcsBackend;

/// Upstream changes of one tracked file.
#[derive(Debug, Clone)]
pub struct FileChanges {
    pub path: String,
    /// Units at the sync point, in file order.
    pub base: Vec<StringUnit>,
    /// Units at the remote revision, in file order.
    pub remote: Vec<StringUnit>,
    /// Change per key, for every key present on either side.
    pub changes: BTreeMap<String, UnitChange>,
}

impl FileChanges {
    /// Number of keys that changed.
    pub fn changed_count(&self) -> usize {
        self.changes.values().filter(|c| !c.is_unchanged()).count()
    }

    pub fn base_unit(&self, key: &str) -> Option<&StringUnit> {
        self.base.iter().find(|u| u.key == key)
    }
}

/// Align two unit lists by key.
///
/// Keys only in `new` are `Added`, keys only in `old` are `Removed`, keys on
/// both sides are compared field by field. Within one list the first
/// occurrence of a duplicated key wins.
pub fn diff_units(path: &str, old: &[StringUnit], new: &[StringUnit]) -> BTreeMap<String, UnitChange> {
    let old = index_by_key(path, old);
    let new = index_by_key(path, new);
    let mut changes = BTreeMap::new();

    for (key, old_unit) in &old {
        let change = match new.get(key) {
            None => UnitChange::Removed((*old_unit).clone()),
            Some(new_unit) => {
                let fields = ChangedFields::between(old_unit, new_unit);
                if fields.any() {
                    UnitChange::Changed {
                        old: (*old_unit).clone(),
                        new: (*new_unit).clone(),
                        fields,
                    }
                } else {
                    UnitChange::Unchanged
                }
            }
        };
        changes.insert((*key).to_string(), change);
    }
    for (key, new_unit) in &new {
        if !old.contains_key(key) {
            changes.insert((*key).to_string(), UnitChange::Added((*new_unit).clone()));
        }
    }
    changes
}

fn index_by_key<'a>(path: &str, units: &'a [StringUnit]) -> HashMap<&'a str, &'a StringUnit> {
    let mut map = HashMap::with_capacity(units.len());
    for unit in units {
        if map.contains_key(unit.key.as_str()) {
            warn!(path, key = %unit.key, "duplicate key, keeping first occurrence");
            continue;
        }
        map.insert(unit.key.as_str(), unit);
    }
    map
}

/// Read and parse `path` at `rev`. A missing file has no units.
pub async fn load_units(
    vcs: &dyn VcsBackend,
    format: &dyn TranslationFormat,
    rev: &Revision,
    path: &str,
) -> Result<Vec<StringUnit>, ExtractError> {
    match vcs.read_file(rev, path).await? {
        Some(bytes) => Ok(format.parse(path, &bytes)?),
        None => {
            debug!(path, revision = %rev.short(), "file absent at revision");
            Ok(Vec::new())
        }
    }
}

/// Compute the upstream changes of one file between its sync point and the
/// remote revision.
///
/// `touched` is the set of paths the VCS reports as changed between the two
/// revisions; a file outside it is parsed once and reported unchanged.
pub async fn extract_file(
    vcs: &dyn VcsBackend,
    format: &dyn TranslationFormat,
    path: &str,
    sync_point: &Revision,
    remote: &Revision,
    touched: &HashSet<String>,
) -> Result<FileChanges, ExtractError> {
    let remote_units = load_units(vcs, format, remote, path).await?;

    if sync_point == remote || !touched.contains(path) {
        let changes = remote_units
            .iter()
            .map(|u| (u.key.clone(), UnitChange::Unchanged))
            .collect();
        return Ok(FileChanges {
            path: path.to_string(),
            base: remote_units.clone(),
            remote: remote_units,
            changes,
        });
    }

    let base_units = load_units(vcs, format, sync_point, path).await?;
    let changes = diff_units(path, &base_units, &remote_units);
    let file = FileChanges {
        path: path.to_string(),
        base: base_units,
        remote: remote_units,
        changes,
    };
    debug!(path, changed = file.changed_count(), "extracted upstream changes");
    Ok(file)
}
