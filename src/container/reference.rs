//! Commit tag generation.

use uuid::Uuid;

/// Source of unique commit tag suffixes.
pub trait ReferenceGenerator: Send + Sync {
    /// A fresh suffix, never returned before.
    fn next_suffix(&self) -> String;
}

/// Random v4 UUIDs in simple (hyphen-free) form.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidReferenceGenerator;

impl ReferenceGenerator for UuidReferenceGenerator {
    fn next_suffix(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }
}

/// Image reference `<name>:<suffix>` for a committed session.
pub fn commit_reference(name: &str, suffix: &str) -> String {
    format!("{}:{}", name, suffix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_suffixes_are_unique() {
        let generator = UuidReferenceGenerator;
        let suffixes: HashSet<_> = (0..64).map(|_| generator.next_suffix()).collect();
        assert_eq!(suffixes.len(), 64);
    }

    #[test]
    fn test_suffix_is_valid_tag() {
        let suffix = UuidReferenceGenerator.next_suffix();
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(commit_reference("box", &suffix), format!("box:{}", suffix));
    }
}
