//! Bind mount parsing.
//!
//! Parses the `--volume source:target` strings accepted on the command line
//! into structured mounts for the container's host configuration.

use crate::container::{Result, SandboxError};
use bollard::models::{Mount, MountTypeEnum};
use serde::Serialize;

/// A host directory bound into the session container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MountSpec {
    /// Host path
    pub source: String,
    /// Path inside the container
    pub target: String,
    /// Mount read-only
    pub read_only: bool,
}

impl MountSpec {
    /// Create a read-write bind mount.
    pub fn new<S: Into<String>, T: Into<String>>(source: S, target: T) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            read_only: false,
        }
    }

    /// Engine representation of this mount.
    pub fn to_mount(&self) -> Mount {
        Mount {
            source: Some(self.source.clone()),
            target: Some(self.target.clone()),
            typ: Some(MountTypeEnum::BIND),
            read_only: Some(self.read_only),
            ..Default::default()
        }
    }
}

/// Parse one `source:target` entry.
///
/// # Errors
///
/// Returns [`SandboxError::MountSpecInvalid`] unless the entry splits into
/// exactly two non-empty segments.
pub fn parse_mount_spec(raw: &str) -> Result<MountSpec> {
    let invalid = || SandboxError::MountSpecInvalid {
        spec: raw.to_string(),
    };

    let (source, target) = raw.split_once(':').ok_or_else(invalid)?;
    if source.is_empty() || target.is_empty() || target.contains(':') {
        return Err(invalid());
    }

    Ok(MountSpec::new(source, target))
}

/// Parse every entry, keeping input order.
///
/// # Errors
///
/// Fails on the first invalid entry.
pub fn parse_mount_specs<S: AsRef<str>>(raw: &[S]) -> Result<Vec<MountSpec>> {
    raw.iter().map(|s| parse_mount_spec(s.as_ref())).collect()
}
