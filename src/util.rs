//! Small string helpers shared by logging and chat formatting.

/// Truncate `s` to at most `max_chars` characters, appending "..." when
/// anything was cut. Counts chars, not bytes.
pub fn truncate_with_ellipsis(s: &str, max_chars: usize) -> String {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", s[..idx].trim_end()),
        None => s.to_string(),
    }
}

/// Collapse whitespace runs so multi-line chat text fits on one log line.
pub fn single_line(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}
