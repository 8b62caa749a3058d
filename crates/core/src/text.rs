/// Truncate `s` to at most `max_chars` Unicode scalar values, returning a
/// sub-slice.  Used when building prompt excerpts and log previews.
pub fn truncate_str(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}
