//! File name sanitization for staged bundles

/// Reduce a client-supplied name to a bare file name
///
/// Both `/` and `\` count as separators and trailing separators are ignored,
/// so `../../etc/passwd` becomes `passwd` and `assets/` becomes `assets`.
/// Returns `None` when nothing usable is left (`""`, `"."`, `".."`).
pub fn sanitize_file_name(name: &str) -> Option<String> {
    let trimmed = name.trim_end_matches(['/', '\\']);
    let base = trimmed.rsplit(['/', '\\']).next().unwrap_or_default();

    match base {
        "" | "." | ".." => None,
        other if other.contains('\0') => None,
        other => Some(other.to_string()),
    }
}
