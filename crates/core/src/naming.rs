use chrono::{DateTime, SecondsFormat, Utc};

/// ISO-8601 instant with `:` and `.` replaced so it is safe in a file name.
pub fn format_artifact_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Keeps ASCII alphanumerics, `-`, `_` and `.`; everything else becomes `_`.
pub fn sanitize_name(name: &str) -> String {
    let mut sanitized: String = name
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.starts_with('.') {
        sanitized.replace_range(..1, "_");
    }
    if sanitized.is_empty() {
        sanitized.push_str("database");
    }
    sanitized
}

/// `{sanitized_name}-{timestamp}[-{attempt}].{extension}`
///
/// `attempt` is zero for the first candidate; later attempts are used when the
/// first name is already taken on disk.
pub fn artifact_file_name(
    name: &str,
    now: DateTime<Utc>,
    extension: &str,
    attempt: u32,
) -> String {
    let base = format!("{}-{}", sanitize_name(name), format_artifact_timestamp(now));
    if attempt == 0 {
        format!("{base}.{extension}")
    } else {
        format!("{base}-{attempt}.{extension}")
    }
}
