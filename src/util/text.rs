use std::borrow::Cow;

/// Removes ASCII control characters and ANSI escape sequences from feed text.
///
/// Tab, newline and carriage return are kept. Returns `Cow::Borrowed` when
/// there is nothing to strip, which is the common case.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let is_control = |c: char| {
        c == '\u{1b}' || c == '\u{7f}' || (c < '\u{20}' && !matches!(c, '\t' | '\n' | '\r'))
    };

    if !s.chars().any(is_control) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\u{1b}' {
            match chars.peek() {
                // CSI: ESC [ params... final byte in 0x40..=0x7e
                Some('[') => {
                    chars.next();
                    for c in chars.by_ref() {
                        if ('\u{40}'..='\u{7e}').contains(&c) {
                            break;
                        }
                    }
                }
                // OSC: ESC ] ... terminated by BEL or ESC \
                Some(']') => {
                    chars.next();
                    while let Some(c) = chars.next() {
                        if c == '\u{07}' {
                            break;
                        }
                        if c == '\u{1b}' && chars.peek() == Some(&'\\') {
                            chars.next();
                            break;
                        }
                    }
                }
                _ => {}
            }
        } else if !is_control(c) {
            out.push(c);
        }
    }

    Cow::Owned(out)
}

/// Strips control characters and surrounding whitespace, mapping blank text to `None`.
pub fn clean_text(s: &str) -> Option<String> {
    let stripped = strip_control_chars(s);
    let trimmed = stripped.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Truncates to at most `max_chars` characters, respecting UTF-8 boundaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> Cow<'_, str> {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => Cow::Owned(s[..idx].to_string()),
        None => Cow::Borrowed(s),
    }
}
