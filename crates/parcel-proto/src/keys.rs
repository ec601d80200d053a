//! Blob key derivation.
//!
//! Keys are laid out as `[prefix/]namespace/function/YYYY/MM/DD/HHMMSS/uuid.json`
//! so that stored objects sort by time and stay browsable by function.
//! The function segment is always a single non-empty path segment, whatever
//! name the caller used.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub const RESULTS_NAMESPACE: &str = "results";
pub const PROXY_NAMESPACE: &str = "proxy";

/// Stands in for characters that can't appear in a key segment.
const SEGMENT_FILL: char = '_';

/// Map a function name onto one path segment that object stores accept.
///
/// `/` and control characters become `_`; an empty, `.` or `..` name is
/// padded so it is never empty or a relative path component.
fn key_segment(function: &str) -> String {
    let segment: String = function
        .chars()
        .map(|c| if c == '/' || c.is_control() { SEGMENT_FILL } else { c })
        .collect();

    match segment.as_str() {
        "" | "." | ".." => format!("{segment}{SEGMENT_FILL}"),
        _ => segment,
    }
}

/// Result and proxy keys for one call. Both share the same suffix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageKeys {
    pub result: String,
    pub proxy: String,
}

impl MessageKeys {
    /// Fresh keys for a call to `function`, unique per call.
    pub fn generate(function: &str) -> Self {
        Self::generate_at(None, function, Utc::now(), Uuid::new_v4())
    }

    pub fn generate_with_prefix(prefix: Option<&str>, function: &str) -> Self {
        Self::generate_at(prefix, function, Utc::now(), Uuid::new_v4())
    }

    pub fn generate_at(
        prefix: Option<&str>,
        function: &str,
        now: DateTime<Utc>,
        id: Uuid,
    ) -> Self {
        let suffix = format!(
            "{}/{}/{id}.json",
            key_segment(function),
            now.format("%Y/%m/%d/%H%M%S")
        );
        let prefix = prefix
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(|p| format!("{p}/"))
            .unwrap_or_default();

        Self {
            result: format!("{prefix}{RESULTS_NAMESPACE}/{suffix}"),
            proxy: format!("{prefix}{PROXY_NAMESPACE}/{suffix}"),
        }
    }
}
