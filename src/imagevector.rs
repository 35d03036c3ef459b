//! Image Vector
//!
//! Table of container images deployed by the extension, keyed by symbolic
//! name. The default table is embedded at build time; individual entries can
//! be replaced by a file named in `IMAGEVECTOR_OVERWRITE`.

use crate::domain::ports::{ImageReference, ImageResolver};
use crate::error::{Error, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};

/// Environment variable naming an image vector overwrite file
pub const OVERWRITE_ENV: &str = "IMAGEVECTOR_OVERWRITE";

const EMBEDDED_IMAGES: &str = include_str!("../charts/images.yaml");

/// One entry of the image vector
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageSource {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_repository: Option<String>,
    pub repository: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ImageVectorFile {
    #[serde(default)]
    images: Vec<ImageSource>,
}

/// Image table implementing [`ImageResolver`]
#[derive(Debug, Clone, Default)]
pub struct ImageVector {
    images: IndexMap<String, ImageSource>,
}

impl ImageVector {
    /// Parse an image vector document
    pub fn from_yaml(content: &str) -> Result<Self> {
        let file: ImageVectorFile = serde_yaml::from_str(content)
            .map_err(|e| Error::Configuration(format!("invalid image vector: {}", e)))?;

        let mut vector = Self::default();
        for image in file.images {
            vector.images.insert(image.name.clone(), image);
        }
        Ok(vector)
    }

    /// The image vector embedded in the binary
    pub fn embedded() -> Result<Self> {
        Self::from_yaml(EMBEDDED_IMAGES)
    }

    /// The embedded image vector with the overwrite file from the
    /// environment applied, if one is configured.
    pub fn load() -> Result<Self> {
        let mut vector = Self::embedded()?;
        if let Ok(path) = std::env::var(OVERWRITE_ENV) {
            info!("Applying image vector overwrite from {}", path);
            vector.overwrite_from_file(&path)?;
        }
        Ok(vector)
    }

    /// Replace entries with those from an overwrite file
    pub fn overwrite_from_file(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("failed to read {}: {}", path.display(), e))
        })?;
        self.overwrite(Self::from_yaml(&content)?);
        Ok(())
    }

    /// Replace entries with those of another vector
    pub fn overwrite(&mut self, other: ImageVector) {
        for (name, image) in other.images {
            debug!(image = %name, repository = %image.repository, "Overwriting image");
            self.images.insert(name, image);
        }
    }

    /// Number of images in the vector
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// Whether the vector is empty
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}

impl ImageResolver for ImageVector {
    fn resolve(&self, name: &str) -> Result<ImageReference> {
        let image = self.images.get(name).ok_or_else(|| Error::ImageResolution {
            name: name.to_string(),
            reason: format!("could not find image {:?}", name),
        })?;

        Ok(ImageReference {
            name: image.name.clone(),
            repository: image.repository.clone(),
            tag: image.tag.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::images;
    use assert_matches::assert_matches;
    use std::io::Write;

    #[test]
    fn test_embedded_vector_has_all_driver_images() {
        let vector = ImageVector::embedded().unwrap();
        for name in images::ALL {
            assert!(vector.resolve(name).is_ok(), "missing image {}", name);
        }
    }

    #[test]
    fn test_unknown_image_fails() {
        let vector = ImageVector::embedded().unwrap();
        assert_matches!(
            vector.resolve("does-not-exist"),
            Err(Error::ImageResolution { name, .. }) if name == "does-not-exist"
        );
    }

    #[test]
    fn test_overwrite_replaces_entry() {
        let mut vector = ImageVector::embedded().unwrap();
        let before = vector.len();

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "images:\n- name: csi-driver-lvm\n  repository: registry.example.com/csi-driver-lvm\n  tag: v9.9.9"
        )
        .unwrap();
        vector.overwrite_from_file(file.path()).unwrap();

        assert_eq!(vector.len(), before);
        assert_eq!(
            vector.resolve("csi-driver-lvm").unwrap().to_string(),
            "registry.example.com/csi-driver-lvm:v9.9.9"
        );
    }
}
