//! Utility functions for file naming, path manipulation and external commands

use crate::types::ContainerFormat;
use std::path::{Path, PathBuf};

/// Exit status of an external command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// The command exited successfully (exit code 0)
    Success,
    /// The command exited with a non-zero exit code
    Failure,
}

impl ExitStatus {
    /// Returns `true` if the exit status represents success
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

impl From<bool> for ExitStatus {
    fn from(success: bool) -> Self {
        if success {
            Self::Success
        } else {
            Self::Failure
        }
    }
}

/// Characters that are not allowed in a Windows path component
const RESERVED_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// Maximum length of a sanitized path component
const MAX_COMPONENT_LEN: usize = 120;

/// Make a catalog display name safe to use as a single directory name
///
/// Reserved characters and control characters become `_`, trailing dots and
/// spaces are trimmed, and overly long names are truncated on a character
/// boundary. An empty result becomes `"unnamed"`.
///
/// # Examples
///
/// ```
/// use offline_servicing::utils::sanitize_component;
///
/// assert_eq!(
///     sanitize_component("2024-05 Update: KB5037768 (x64)."),
///     "2024-05 Update_ KB5037768 (x64)"
/// );
/// ```
#[must_use]
pub fn sanitize_component(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| {
            if RESERVED_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .take(MAX_COMPONENT_LEN)
        .collect();

    let trimmed = replaced.trim().trim_end_matches(['.', ' ']);
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '.') {
        "unnamed".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Extract a file name from a URL or catalog content path
///
/// Query strings and fragments are ignored and percent-encoding is decoded.
/// Returns `None` when the locator ends in a separator.
pub fn file_name_from_locator(locator: &str) -> Option<String> {
    let without_query = locator
        .split(['?', '#'])
        .next()
        .unwrap_or(locator);
    let last = without_query.rsplit(['/', '\\']).next()?;
    if last.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(last)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| last.to_string());
    Some(decoded)
}

/// Path of `path` relabeled to the given container format
///
/// Only the extension changes; the container bytes are untouched.
pub fn relabeled_path(path: &Path, format: ContainerFormat) -> PathBuf {
    path.with_extension(format.extension())
}

/// Both names a cached file may carry on disk
///
/// A `.cab` may have been relabeled to `.msu` by an earlier apply, so the
/// cache treats both as the same artifact. Other names map to themselves.
pub fn cached_name_variants(file_name: &str) -> Vec<String> {
    match ContainerFormat::from_file_name(file_name) {
        Some(ContainerFormat::Cab) => {
            let relabeled = relabeled_path(Path::new(file_name), ContainerFormat::Msu);
            vec![
                file_name.to_string(),
                relabeled.to_string_lossy().into_owned(),
            ]
        }
        _ => vec![file_name.to_string()],
    }
}
