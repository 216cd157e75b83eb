//! Balanced-JSON extraction from model output text
//!
//! Providers wrap JSON in markdown fences or pad it with prose despite being
//! asked for strict JSON. Rather than stripping known decorations, scan for
//! the first balanced `{...}` object — string-aware, so braces inside string
//! values don't break the depth count.

/// Extract the first balanced JSON object from `text`.
///
/// Returns `None` when there is no `{` or the braces never balance.
/// The returned slice still has to survive serde parsing; this only finds
/// the candidate span.
pub fn extract_json(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in text.bytes().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    // `{` and `}` are single-byte, so the slice is char-aligned
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
