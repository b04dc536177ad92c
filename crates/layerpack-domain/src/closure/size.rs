use super::StorePath;

/// Orders store paths by descending NAR size.
///
/// Paths of equal size are ordered lexicographically so the result never
/// depends on the order of the closure file.
#[must_use]
pub fn sorted_paths_by_nar_size(store_paths: &[StorePath]) -> Vec<String> {
    let mut sized: Vec<(&str, u64)> = store_paths
        .iter()
        .map(|store_path| (store_path.path.as_str(), store_path.nar_size))
        .collect();
    sized.sort_by(|(a_path, a_size), (b_path, b_size)| {
        b_size.cmp(a_size).then_with(|| a_path.cmp(b_path))
    });
    sized.into_iter().map(|(path, _)| path.to_string()).collect()
}
