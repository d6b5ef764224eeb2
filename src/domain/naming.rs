/// Normalizes a free-text name into the comparison key used for tag, task,
/// and statistic identity. Lowercases and trims the edges; internal
/// whitespace is preserved.
pub fn to_canonical_name(name: &str) -> String {
    name.to_lowercase().trim().to_string()
}

pub fn is_valid_color(color: &str) -> bool {
    color.len() == 8 && color.chars().all(|c| c.is_ascii_hexdigit())
}

/// Fixes up colors from legacy exports: strips a leading `#` and appends an
/// opaque-zero alpha component to 6-digit values. Returns `None` when the
/// value is not a 6 or 8 digit hex string.
pub fn normalize_color(color: &str) -> Option<String> {
    let color = color.strip_prefix('#').unwrap_or(color);
    if !color.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }

    match color.len() {
        6 => Some(format!("{color}00")),
        8 => Some(color.to_string()),
        _ => None,
    }
}
