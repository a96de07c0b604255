/// Sentinel returned when model output contains no JSON object.
pub const EMPTY_OBJECT: &str = "{}";

/// Extract the first balanced `{...}` block from free-form model output.
///
/// Model replies may wrap the object in prose or markdown fences. Braces inside
/// string literals (including escaped quotes) do not affect the balance. A `{`
/// that never closes is skipped and the scan resumes at the next one. When no
/// complete object exists the empty-object sentinel is returned, so the caller's
/// parse fails on a predictable input instead of on arbitrary text.
pub fn clean_json_response(text: &str) -> String {
    text.match_indices('{')
        .find_map(|(start, _)| balanced_object(&text[start..]))
        .unwrap_or(EMPTY_OBJECT)
        .to_string()
}

/// The balanced object at the start of `text`, if it closes.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[..=offset]);
                }
            }
            _ => {}
        }
    }
    None
}
