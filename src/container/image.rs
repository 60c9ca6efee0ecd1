//! Local image lookup.
//!
//! The session never pulls: the base image must already be on the host, and
//! that is verified before anything is created.

use crate::container::{Result, SandboxError};
use serde::Serialize;
use tracing::debug;

/// Image information.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImageInfo {
    /// Image ID
    pub id: String,
    /// Repository tags, possibly empty for dangling images
    pub repo_tags: Vec<String>,
    /// Size in bytes
    pub size: i64,
    /// Creation timestamp
    pub created: i64,
}

impl ImageInfo {
    /// Image with the given tags and no other details.
    pub fn tagged<I, S>(tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            repo_tags: tags.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// Whether one of the tags is exactly `reference`.
    pub fn has_tag(&self, reference: &str) -> bool {
        self.repo_tags.iter().any(|tag| tag == reference)
    }
}

/// Check that `reference` names a locally present image.
///
/// Matching is exact against every `repo:tag` of every image; untagged images
/// are skipped.
///
/// # Errors
///
/// Returns [`SandboxError::ImageNotFoundLocally`] if no image carries the tag.
pub fn ensure_image_present(reference: &str, images: &[ImageInfo]) -> Result<()> {
    let found = images
        .iter()
        .filter(|img| !img.repo_tags.is_empty())
        .any(|img| img.has_tag(reference));

    if found {
        debug!("Image {} found locally", reference);
        Ok(())
    } else {
        Err(SandboxError::ImageNotFoundLocally {
            image: reference.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> Vec<ImageInfo> {
        vec![
            ImageInfo::tagged(Vec::<String>::new()),
            ImageInfo::tagged(["alpine:latest", "alpine:3.20"]),
            ImageInfo::tagged(["ubuntu:22.04"]),
        ]
    }

    #[test]
    fn test_matches_any_tag_of_any_image() {
        assert!(ensure_image_present("alpine:3.20", &fixture()).is_ok());
        assert!(ensure_image_present("ubuntu:22.04", &fixture()).is_ok());
    }

    #[test]
    fn test_match_is_exact() {
        let err = ensure_image_present("alpine", &fixture()).unwrap_err();
        assert_eq!(
            err,
            SandboxError::ImageNotFoundLocally {
                image: "alpine".to_string()
            }
        );
    }

    #[test]
    fn test_untagged_images_only() {
        let images = vec![ImageInfo::tagged(Vec::<String>::new())];
        assert!(ensure_image_present("alpine:latest", &images).is_err());
        assert!(ensure_image_present("alpine:latest", &[]).is_err());
    }
}
