//! Substitution table protecting comment delimiters, braces and escape sequences from BPE.

/// Placeholders and the markup they stand for.
pub const ESCAPES: [(&str, &str); 14] = [
    ("STOKEN00", "//"),
    ("STOKEN01", "/*"),
    ("STOKEN02", "*/"),
    ("STOKEN03", "/**"),
    ("STOKEN04", "**/"),
    ("STOKEN05", "\"\"\""),
    ("STOKEN06", "\\n"),
    ("STOKEN07", "\\r"),
    ("STOKEN08", ";"),
    ("STOKEN09", "{"),
    ("STOKEN10", "}"),
    ("STOKEN11", "\\'"),
    ("STOKEN12", "\\\""),
    ("STOKEN13", "\\\\"),
];

/// Longest markup matching at the start of `text`, with its placeholder.
fn markup_at(text: &str) -> Option<(&'static str, &'static str)> {
    ESCAPES
        .iter()
        .filter(|(_, markup)| text.starts_with(markup))
        .max_by_key(|(_, markup)| markup.len())
        .copied()
}

/// Replaces every markup sequence in `text` with its placeholder surrounded by spaces.
/// Longer sequences win over their prefixes, so `/**` is never read as `/*` followed by `*`.
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(c) = rest.chars().next() {
        match markup_at(rest) {
            Some((placeholder, markup)) => {
                out.push(' ');
                out.push_str(placeholder);
                out.push(' ');
                rest = &rest[markup.len()..];
            }
            None => {
                out.push(c);
                rest = &rest[c.len_utf8()..];
            }
        }
    }
    out
}

/// Gets the markup a placeholder stands for, or `None` if `token` is not a placeholder.
pub fn unescape(token: &str) -> Option<&'static str> {
    ESCAPES
        .iter()
        .find(|(placeholder, _)| *placeholder == token)
        .map(|(_, markup)| *markup)
}
