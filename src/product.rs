use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{CodecError, StageError, StageResult};
use crate::io::{ImageArtifact, ObjectUrl, ObjectUrlRegistry};

/// Size hint for the placed product, clamped to `[0.5, 1.5]`.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct ScaleFactor(f64);

impl ScaleFactor {
    pub const MIN: f64 = 0.5;
    pub const MAX: f64 = 1.5;

    /// Out-of-range values are clamped; NaN falls back to 1.0.
    pub fn new(value: f64) -> Self {
        if value.is_nan() {
            Self(1.0)
        } else {
            Self(value.clamp(Self::MIN, Self::MAX))
        }
    }

    pub fn get(self) -> f64 {
        self.0
    }

    pub fn percent(self) -> f64 {
        self.0 * 100.0
    }
}

impl Default for ScaleFactor {
    fn default() -> Self {
        Self(1.0)
    }
}

impl From<f64> for ScaleFactor {
    fn from(value: f64) -> Self {
        Self::new(value)
    }
}

impl From<ScaleFactor> for f64 {
    fn from(scale: ScaleFactor) -> Self {
        scale.0
    }
}

/// Where a product's image comes from.
#[derive(Debug)]
pub enum ProductImage {
    /// Static catalog asset on disk.
    Catalog(PathBuf),
    /// Uploaded during this session; owns its object reference.
    Blob(ObjectUrl),
}

/// A placeable product.
///
/// Not `Clone`: a blob-backed product owns its object reference and must be
/// handed back through [`Product::release`] when replaced or torn down.
#[derive(Debug)]
pub struct Product {
    pub id: Uuid,
    pub name: String,
    pub image: ProductImage,
}

impl Product {
    pub fn from_catalog(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            image: ProductImage::Catalog(path.into()),
        }
    }

    /// Wrap an uploaded image. The display name defaults to the file stem.
    pub fn from_upload(artifact: &ImageArtifact, registry: &mut ObjectUrlRegistry) -> Self {
        let name = artifact
            .filename()
            .rsplit_once('.')
            .map_or(artifact.filename(), |(stem, _)| stem)
            .to_string();
        Self {
            id: Uuid::new_v4(),
            name: if name.is_empty() { "Product".to_string() } else { name },
            image: ProductImage::Blob(registry.create(artifact)),
        }
    }

    pub fn is_blob_backed(&self) -> bool {
        matches!(self.image, ProductImage::Blob(_))
    }

    /// What to put in an `<img src>`-like slot.
    pub fn display_source(&self) -> String {
        match &self.image {
            ProductImage::Catalog(path) => path.display().to_string(),
            ProductImage::Blob(url) => url.to_string(),
        }
    }

    /// Materialize the product image for a request.
    pub fn load_artifact(&self, registry: &ObjectUrlRegistry) -> StageResult<ImageArtifact> {
        match &self.image {
            ProductImage::Catalog(path) => ImageArtifact::from_path(path).map_err(|e| match e {
                CodecError::Io(io) => StageError::Io(io),
                other => StageError::MalformedArtifact(other),
            }),
            ProductImage::Blob(url) => registry
                .resolve(url.as_str())
                .cloned()
                .ok_or(StageError::IncompleteSelection("product image")),
        }
    }

    /// Give the object reference back, if this product holds one.
    pub fn release(self, registry: &mut ObjectUrlRegistry) {
        if let ProductImage::Blob(url) = self.image {
            registry.release(url);
        }
    }
}
