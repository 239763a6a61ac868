/// Extracts the first balanced `{...}` object from free text.
///
/// Fenced code blocks (```json ... ```) are unwrapped first when present; otherwise the
/// whole text is scanned. Braces inside JSON string literals are ignored.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let body = strip_code_fence(raw).unwrap_or(raw);
    balanced_object(body).or_else(|| {
        // A fence can wrap prose while the object sits outside it.
        if body.len() != raw.len() {
            balanced_object(raw)
        } else {
            None
        }
    })
}

fn strip_code_fence(raw: &str) -> Option<&str> {
    let open = raw.find("```")?;
    let after_open = &raw[open + 3..];
    // Skip the info string ("json", "JSON", ...) up to the end of the fence line.
    let content_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let content = &after_open[content_start..];
    let close = content.find("```").unwrap_or(content.len());
    Some(&content[..close])
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }

        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
