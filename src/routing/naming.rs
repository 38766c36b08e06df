//! Aggregated tool naming.
//!
//! Every downstream tool is exposed upstream as
//! `sanitize(destination) + "__" + sanitize(tool)`, truncated to 64 characters.

/// Separator between destination and tool in aggregated names.
pub const TOOL_NAME_SEPARATOR: &str = "__";

/// Longest aggregated name handed to upstream callers.
pub const MAX_TOOL_NAME_LENGTH: usize = 64;

/// Replace every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Build the aggregated name for `tool` on `destination`.
pub fn create_tool_name(destination: &str, tool: &str) -> String {
    let mut name = format!("{}{}{}", sanitize(destination), TOOL_NAME_SEPARATOR, sanitize(tool));
    // Sanitized output is pure ASCII, so byte truncation is char-safe.
    name.truncate(MAX_TOOL_NAME_LENGTH);
    name
}

/// Split an aggregated name on the first separator.
///
/// Returns `None` when the separator is missing or either side is empty.
pub fn parse_tool_name(name: &str) -> Option<(&str, &str)> {
    let (destination, tool) = name.split_once(TOOL_NAME_SEPARATOR)?;
    if destination.is_empty() || tool.is_empty() {
        return None;
    }
    Some((destination, tool))
}
