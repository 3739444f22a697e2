//! Device-name patterns used to bind handlers to devices.
//!
//! Patterns use [`regex`] syntax and must match the *whole* device name;
//! the pattern is wrapped as `^(?:pattern)$` before compiling.  To match a
//! substring, surround it with `.*`, e.g. `.*VID_046D.*`.
//!
//! # Supported syntax
//!
//! The commonly used subset is guaranteed: `.`, `*`, `+`, `?`, character
//! classes such as `[0-9A-F]`, anchors, grouping and alternation.  Anything
//! else the `regex` crate accepts also works, but look-around and
//! back-references are not available.

use std::fmt;

use regex::Regex;
use thiserror::Error;

/// A handler-registration pattern failed to compile.
#[derive(Debug, Error)]
#[error("invalid device pattern {pattern:?}: {reason}")]
pub struct PatternError {
    pub pattern: String,
    pub reason: String,
}

/// A compiled device-name pattern.
#[derive(Clone)]
pub struct DevicePattern {
    source: String,
    regex: Regex,
}

impl DevicePattern {
    /// Compiles `pattern` once.
    ///
    /// # Errors
    ///
    /// Returns [`PatternError`] if the pattern is malformed.
    pub fn compile(pattern: &str) -> Result<Self, PatternError> {
        let regex = Regex::new(&format!("^(?:{pattern})$")).map_err(|e| PatternError {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            source: pattern.to_string(),
            regex,
        })
    }

    /// The pattern text as the application supplied it.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn matches(&self, device_name: &str) -> bool {
        self.regex.is_match(device_name)
    }
}

impl PartialEq for DevicePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for DevicePattern {}

impl fmt::Debug for DevicePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DevicePattern").field(&self.source).finish()
    }
}
