//! Local-vs-remote comparison producing a change-set.
//!
//! Fingerprint equality is the only reason to skip a file. Sizes and
//! timestamps are never consulted.

use crate::types::{ChangeAction, ChangeEntry, ChangeSet, LocalFile, Manifest};
use std::collections::HashSet;

/// Compares local files against the remote manifest.
///
/// Entries come out sorted by key regardless of input order. Remote keys
/// without a local file are reported as orphans and never turned into
/// mutations here.
pub fn diff(local: &[LocalFile], remote: &Manifest) -> ChangeSet {
    let mut sorted: Vec<&LocalFile> = local.iter().collect();
    sorted.sort_by(|a, b| a.key.cmp(&b.key));

    let entries = sorted
        .into_iter()
        .map(|file| {
            let previous = remote.get(&file.key).cloned();
            let action = match &previous {
                Some(obj) if obj.fingerprint.matches(&file.fingerprint) => ChangeAction::Skip,
                _ => ChangeAction::Upload,
            };
            ChangeEntry {
                action,
                local: file.clone(),
                previous,
            }
        })
        .collect();

    let local_keys: HashSet<&str> = local.iter().map(|f| f.key.as_str()).collect();
    let orphans = remote
        .values()
        .filter(|obj| !local_keys.contains(obj.key.as_str()))
        .cloned()
        .collect();

    ChangeSet {
        entries,
        orphans,
        unreadable: Vec::new(),
    }
}
