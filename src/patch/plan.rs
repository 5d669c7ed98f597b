//! The hook plan of one patch cycle.

use std::{
    collections::{btree_map, BTreeMap, BTreeSet},
    sync::Arc,
};

use crate::metadata::index::MethodRecord;

/// One function to redirect.
#[derive(Debug, Clone)]
pub struct HookEntry {
    /// The loaded function
    pub baseline: Arc<MethodRecord>,
    /// Its replacement in the candidate
    pub candidate: Arc<MethodRecord>,
    /// `false` if the body is unchanged and the function only shares a source document with a
    /// changed one
    pub il_changed: bool,
}

/// Functions to redirect, keyed by full name (`Owner::signature`).
///
/// The diff engine builds the plan; later stages only read it.
#[derive(Debug, Clone, Default)]
pub struct HookPlan {
    entries: BTreeMap<String, HookEntry>,
}

impl HookPlan {
    pub(crate) fn insert(&mut self, entry: HookEntry) {
        self.entries.insert(entry.candidate.full_name(), entry);
    }

    /// Look up an entry by full name.
    #[must_use]
    pub fn get(&self, full_name: &str) -> Option<&HookEntry> {
        self.entries.get(full_name)
    }

    /// Returns `true` if `full_name` is planned.
    #[must_use]
    pub fn contains(&self, full_name: &str) -> bool {
        self.entries.contains_key(full_name)
    }

    /// Number of planned functions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing needs to be redirected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries ordered by full name.
    pub fn iter(&self) -> btree_map::Iter<'_, String, HookEntry> {
        self.entries.iter()
    }

    /// Full names of the planned functions.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries whose body changed.
    pub fn changed(&self) -> impl Iterator<Item = &HookEntry> {
        self.entries.values().filter(|entry| entry.il_changed)
    }

    /// Source documents of the changed functions.
    #[must_use]
    pub fn changed_documents(&self) -> BTreeSet<&str> {
        self.changed()
            .filter_map(|entry| entry.candidate.document.as_deref())
            .collect()
    }
}

impl<'a> IntoIterator for &'a HookPlan {
    type Item = (&'a String, &'a HookEntry);
    type IntoIter = btree_map::Iter<'a, String, HookEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
