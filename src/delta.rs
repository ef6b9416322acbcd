//! Delta planner: classify the current observation set against the previous
//! manifest.

use std::collections::BTreeSet;

use crate::manifest::Manifest;

/// The four disjoint outcomes of a plan. Paths are repo-relative.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeltaPlan {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
}

impl DeltaPlan {
    pub fn has_work(&self) -> bool {
        !(self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty())
    }

    /// Paths that need parsing this run.
    pub fn to_parse(&self) -> impl Iterator<Item = &str> {
        self.added
            .iter()
            .chain(self.modified.iter())
            .map(String::as_str)
    }

    /// Paths whose previously-stored entities must be deleted.
    pub fn to_delete(&self) -> impl Iterator<Item = &str> {
        self.deleted
            .iter()
            .chain(self.modified.iter())
            .map(String::as_str)
    }
}

/// Compare `(path, hash)` observations with the previous manifest.
///
/// With `force` set, everything currently on disk is `added` and everything
/// previously known is `deleted` — the store is rebuilt wholesale while
/// stale rows are still removed by primary key.
pub fn plan<'a, I>(previous: &Manifest, current: I, force: bool) -> DeltaPlan
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut out = DeltaPlan::default();
    let mut seen: BTreeSet<&str> = BTreeSet::new();

    for (path, hash) in current {
        seen.insert(path);
        if force {
            out.added.push(path.to_string());
            continue;
        }
        match previous.entries.get(path) {
            None => out.added.push(path.to_string()),
            Some(entry) if entry.hash == hash => out.unchanged.push(path.to_string()),
            Some(_) => out.modified.push(path.to_string()),
        }
    }

    for path in previous.entries.keys() {
        if force || !seen.contains(path.as_str()) {
            out.deleted.push(path.clone());
        }
    }

    out.added.sort();
    out.modified.sort();
    out.deleted.sort();
    out.unchanged.sort();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{ManifestEntry, OwnedIds};

    fn manifest(entries: &[(&str, &str)]) -> Manifest {
        let mut m = Manifest::default();
        for (path, hash) in entries {
            m.entries.insert(
                path.to_string(),
                ManifestEntry {
                    hash: hash.to_string(),
                    file_id: format!("id-{path}"),
                    entity_ids: OwnedIds::default(),
                },
            );
        }
        m
    }

    #[test]
    fn classifies_all_four_ways() {
        let prev = manifest(&[("a.go", "h1"), ("b.go", "h2"), ("c.go", "h3")]);
        let cur = vec![("a.go", "h1"), ("b.go", "CHANGED"), ("d.go", "h4")];

        let plan = plan(&prev, cur, false);
        assert_eq!(plan.unchanged, vec!["a.go"]);
        assert_eq!(plan.modified, vec!["b.go"]);
        assert_eq!(plan.deleted, vec!["c.go"]);
        assert_eq!(plan.added, vec!["d.go"]);
    }

    #[test]
    fn empty_both_sides_is_a_noop() {
        let plan = plan(&Manifest::default(), Vec::<(&str, &str)>::new(), false);
        assert!(!plan.has_work());
        assert!(plan.unchanged.is_empty());
    }

    #[test]
    fn second_run_over_identical_input_is_all_unchanged() {
        let prev = manifest(&[("a.go", "h1"), ("b.go", "h2")]);
        let cur = vec![("a.go", "h1"), ("b.go", "h2")];
        let plan = plan(&prev, cur, false);
        assert!(!plan.has_work());
        assert_eq!(plan.unchanged.len(), 2);
    }

    #[test]
    fn force_mode_rebuilds_everything() {
        let prev = manifest(&[("a.go", "h1")]);
        let cur = vec![("a.go", "h1"), ("b.go", "h2")];
        let plan = plan(&prev, cur, true);
        assert_eq!(plan.added, vec!["a.go", "b.go"]);
        assert_eq!(plan.deleted, vec!["a.go"]);
        assert!(plan.unchanged.is_empty());
        assert!(plan.modified.is_empty());
    }

    #[test]
    fn modified_paths_appear_in_both_worklists() {
        let prev = manifest(&[("a.go", "h1")]);
        let plan = plan(&prev, vec![("a.go", "new")], false);
        assert_eq!(plan.to_parse().collect::<Vec<_>>(), vec!["a.go"]);
        assert_eq!(plan.to_delete().collect::<Vec<_>>(), vec!["a.go"]);
    }
}
