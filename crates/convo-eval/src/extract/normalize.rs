//! Text cleanup applied before any structured parse.

/// Strip code-fence debris and escaped quotes from a raw model response.
///
/// Removes `\"` and `\'` sequences, every occurrence of `json`, and every
/// backtick, then trims.
pub fn normalize(raw: &str) -> String {
    raw.trim()
        .replace("\\\"", "")
        .replace("json", "")
        .replace('`', "")
        .replace("\\'", "")
        .trim()
        .to_string()
}

/// Swap single-quote delimiters for double quotes when single quotes
/// dominate.
///
/// Existing double quotes are dropped first so the remapped text has one
/// delimiter kind. Text with at least as many double quotes as single quotes
/// is returned unchanged.
pub fn repair_quotes(text: &str) -> String {
    let singles = text.matches('\'').count();
    let doubles = text.matches('"').count();
    if singles > doubles {
        text.replace('"', "").replace('\'', "\"")
    } else {
        text.to_string()
    }
}

/// Remove `(a)` / `(b)` option markers and trim.
pub fn strip_option_markers(text: &str) -> String {
    text.replace("(a)", "").replace("(b)", "").trim().to_string()
}

/// Drop a leading `answer:` label, case-insensitively.
pub fn strip_answer_label(text: &str) -> &str {
    match text.split_once(':') {
        Some((label, rest)) if label.trim().eq_ignore_ascii_case("answer") => rest.trim(),
        _ => text.trim(),
    }
}
