//! Message text helpers.

/// Joins `path` onto `base` with exactly one `/` between them. An empty base leaves `path`
/// unchanged.
pub fn join_url(base: &str, path: &str) -> String {
    if base.is_empty() {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
