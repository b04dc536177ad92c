use std::collections::HashSet;

use layerpack_domain::{Layer, PathEntry, PathOptions, PermRule, RewriteRule};
use tracing::info;

/// Turns ranked store path names into the entries that will be packaged.
///
/// Every permission rule naming a path is attached in rule order; of the
/// rewrite rules naming a path only the last one is kept. A path is then
/// dropped when it is `exclude`, or when a structurally equal entry (same
/// path, same options) is already packaged by one of the `parents`.
#[must_use]
pub fn resolve_paths(
    store_paths: &[String],
    parents: &[Layer],
    perms: &[PermRule],
    rewrites: &[RewriteRule],
    exclude: Option<&str>,
) -> Vec<PathEntry> {
    let inherited: HashSet<&PathEntry> = parents.iter().flat_map(|layer| &layer.paths).collect();
    let mut entries = Vec::with_capacity(store_paths.len());
    for store_path in store_paths {
        let options = PathOptions {
            perms: perms
                .iter()
                .filter(|rule| rule.path == *store_path)
                .map(|rule| rule.perm.clone())
                .collect(),
            rewrite: rewrites
                .iter()
                .rev()
                .find(|rule| rule.path == *store_path)
                .map(|rule| rule.rewrite.clone()),
        };
        let entry = PathEntry::new(store_path.as_str()).with_options(options);

        if exclude == Some(store_path.as_str()) {
            info!(path = %store_path, "excluding path from layers");
            continue;
        }
        if inherited.contains(&entry) {
            info!(path = %store_path, "excluding path already present in a parent layer");
            continue;
        }
        entries.push(entry);
    }
    entries
}
