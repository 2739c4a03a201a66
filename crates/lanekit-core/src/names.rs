//! Name normalization.
//!
//! Extruder, unit and group names arrive from config sections and macro
//! parameters in several spellings ("AMS_extruder4", "OAMS oams1",
//! "Tool T4"). These helpers reduce them to the canonical key used for
//! comparisons and map lookups.

/// Canonical extruder key: trimmed, lowercased, with a leading `ams_` stripped.
///
/// Returns `None` for blank input.
pub fn normalize_extruder_name(name: &str) -> Option<String> {
    let lowered = name.trim().to_lowercase();
    if lowered.is_empty() {
        return None;
    }
    let stripped = lowered.strip_prefix("ams_").unwrap_or(&lowered).trim();
    if stripped.is_empty() {
        return None;
    }
    Some(stripped.to_string())
}

/// Hardware unit name without its section prefix.
///
/// `"OAMS unit_1"` becomes `"unit_1"`. Blank input yields `default`.
pub fn normalize_unit_name(name: &str, default: &str) -> String {
    let trimmed = name.trim();
    match trimmed.split_whitespace().last() {
        Some(last) => last.to_string(),
        None => default.to_string(),
    }
}

/// Group key: the last whitespace token of the name.
///
/// Returns `None` for blank input.
pub fn normalize_group_name(name: &str) -> Option<String> {
    name.split_whitespace().last().map(str::to_string)
}

/// Compare two extruder names by their canonical form.
///
/// Two names that both fail to normalize are never equal.
pub fn same_extruder(a: &str, b: &str) -> bool {
    match (normalize_extruder_name(a), normalize_extruder_name(b)) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}
