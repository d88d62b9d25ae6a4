use regex::Regex;
use std::sync::LazyLock;

/// Matches the suffix a sync client inserts before the extension of a conflicting copy,
/// e.g. ` (Name Clash 1)`, ` (# Name clash 2024-05-01 laptop #)` or ` (Name Clash 1 #Device#)`.
static CLASH_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r" \((?:# )?(?i:name clash) [^#)]+(?: #(?:[^#)]*#)?)?\)")
        .expect("Invalid clash marker regex")
});

/// Returns true if the file name carries at least one clash marker.
pub fn is_clash_marked(file_name: &str) -> bool {
    CLASH_MARKER.is_match(file_name)
}

/// Strips every clash marker from the file name, returning the base file name.
/// Returns `None` when the name carries no marker.
pub fn strip_clash_marker(file_name: &str) -> Option<String> {
    if !is_clash_marked(file_name) {
        return None;
    }
    Some(CLASH_MARKER.replace_all(file_name, "").into_owned())
}
