//! Session-name rules.
//!
//! A session name forms the filesystem identity of its checkpoint, so it must
//! not contain `<>:"/\|?*` and must not collide with a reserved device name.
//! `sanitize_file_stem` maps those characters (and spaces) to `_` when
//! deriving the on-disk file name.

use crate::CoreError;

const FORBIDDEN: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Reserved device names (checked case-insensitively against the whole name
/// and against the stem before any dot).
const RESERVED: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];

/// Validate a user-supplied session name.
pub fn validate_session_name(name: &str) -> Result<(), CoreError> {
    if name.trim().is_empty() {
        return Err(CoreError::EmptySessionName);
    }
    if let Some(c) = name.chars().find(|c| FORBIDDEN.contains(c)) {
        return Err(CoreError::ForbiddenNameChar(c));
    }
    let stem = name.split('.').next().unwrap_or(name);
    let upper = stem.trim().to_ascii_uppercase();
    if RESERVED.contains(&upper.as_str()) {
        return Err(CoreError::ReservedDeviceName(name.to_string()));
    }
    Ok(())
}

/// Map forbidden characters and spaces to `_` for use as a file stem.
pub fn sanitize_file_stem(name: &str) -> String {
    name.chars()
        .map(|c| {
            if FORBIDDEN.contains(&c) || c == ' ' {
                '_'
            } else {
                c
            }
        })
        .collect()
}
