//! Enrollment image sources.
//!
//! An [`ImageSource`] yields `(label, images)` pairs. The directory source
//! follows the register-folder convention: one sub-directory per identity,
//! image files inside.

use image::RgbImage;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions picked up from an identity directory (case-insensitive).
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageLoadError {
    #[error("image not found: {0}")]
    NotFound(PathBuf),
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot decode image: {0}")]
    Decode(#[from] image::ImageError),
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid identity label {0:?}")]
    InvalidLabel(String),
    #[error("no image directory for {0}")]
    IdentityNotFound(String),
    #[error("no images found for {0}")]
    NoImages(String),
    #[error("cannot list {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A single enrollment image, loaded lazily.
#[derive(Clone)]
pub enum ImageRef {
    File(PathBuf),
    Encoded(Vec<u8>),
    Decoded(RgbImage),
}

impl ImageRef {
    pub fn load(&self) -> Result<RgbImage, ImageLoadError> {
        match self {
            ImageRef::File(path) => {
                if !path.exists() {
                    return Err(ImageLoadError::NotFound(path.clone()));
                }
                let bytes = std::fs::read(path).map_err(|source| ImageLoadError::Io {
                    path: path.clone(),
                    source,
                })?;
                decode_image(&bytes)
            }
            ImageRef::Encoded(bytes) => decode_image(bytes),
            ImageRef::Decoded(image) => Ok(image.clone()),
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageRef::File(path) => write!(f, "{}", path.display()),
            ImageRef::Encoded(bytes) => write!(f, "<{} encoded bytes>", bytes.len()),
            ImageRef::Decoded(image) => write!(f, "<{}x{} frame>", image.width(), image.height()),
        }
    }
}

/// Decode an encoded image (any format the `image` crate understands) to RGB.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, ImageLoadError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Images resolved for one identity.
#[derive(Debug, Clone)]
pub struct IdentityImages {
    pub label: String,
    pub images: Vec<ImageRef>,
}

pub trait ImageSource {
    /// Every identity the source knows about.
    fn identities(&self) -> Result<Vec<IdentityImages>, SourceError>;

    /// Resolve a single identity by label.
    fn identity(&self, label: &str) -> Result<IdentityImages, SourceError>;
}

/// Register folder laid out as `<root>/<label>/<image files>`.
#[derive(Debug, Clone)]
pub struct DirectoryImageSource {
    root: PathBuf,
}

impl DirectoryImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn images_in(dir: &Path) -> Result<Vec<ImageRef>, SourceError> {
        let entries = std::fs::read_dir(dir).map_err(|source| SourceError::Io {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_image_extension(path))
            .collect();
        paths.sort();

        Ok(paths.into_iter().map(ImageRef::File).collect())
    }
}

impl ImageSource for DirectoryImageSource {
    fn identities(&self) -> Result<Vec<IdentityImages>, SourceError> {
        if !self.root.is_dir() {
            tracing::warn!(root = %self.root.display(), "register folder not found");
            return Ok(Vec::new());
        }

        let entries = std::fs::read_dir(&self.root).map_err(|source| SourceError::Io {
            path: self.root.clone(),
            source,
        })?;

        let mut dirs: Vec<(String, PathBuf)> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.path().is_dir())
            .filter_map(|entry| {
                let label = entry.file_name().to_str()?.to_string();
                Some((label, entry.path()))
            })
            .collect();
        dirs.sort();

        let mut identities = Vec::with_capacity(dirs.len());
        for (label, dir) in dirs {
            let images = Self::images_in(&dir)?;
            identities.push(IdentityImages { label, images });
        }
        Ok(identities)
    }

    fn identity(&self, label: &str) -> Result<IdentityImages, SourceError> {
        if !is_valid_label(label) {
            return Err(SourceError::InvalidLabel(label.to_string()));
        }

        let dir = self.root.join(label);
        if !dir.is_dir() {
            return Err(SourceError::IdentityNotFound(label.to_string()));
        }

        let images = Self::images_in(&dir)?;
        if images.is_empty() {
            return Err(SourceError::NoImages(label.to_string()));
        }

        Ok(IdentityImages {
            label: label.to_string(),
            images,
        })
    }
}

/// A label must name a single directory entry under the register folder.
fn is_valid_label(label: &str) -> bool {
    !label.trim().is_empty()
        && label != "."
        && !label.contains("..")
        && !label.contains('/')
        && !label.contains('\\')
        && !label.contains('\0')
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;

    fn png_bytes() -> Vec<u8> {
        let img = RgbImage::from_pixel(4, 4, Rgb([10, 20, 30]));
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, image::ImageFormat::Png).unwrap();
        buf.into_inner()
    }

    fn register_folder() -> tempfile::TempDir {
        let tmp = tempfile::TempDir::new().unwrap();
        let alice = tmp.path().join("alice");
        let bob = tmp.path().join("bob");
        let empty = tmp.path().join("carol");
        std::fs::create_dir_all(&alice).unwrap();
        std::fs::create_dir_all(&bob).unwrap();
        std::fs::create_dir_all(&empty).unwrap();

        std::fs::write(alice.join("1.png"), png_bytes()).unwrap();
        std::fs::write(alice.join("2.JPG"), b"not really a jpeg").unwrap();
        std::fs::write(alice.join("notes.txt"), b"ignored").unwrap();
        std::fs::write(bob.join("a.jpeg"), png_bytes()).unwrap();
        std::fs::write(tmp.path().join("stray.png"), png_bytes()).unwrap();
        tmp
    }

    #[test]
    fn test_identities_sorted_with_image_files_only() {
        let tmp = register_folder();
        let source = DirectoryImageSource::new(tmp.path());
        let ids = source.identities().unwrap();

        let labels: Vec<&str> = ids.iter().map(|i| i.label.as_str()).collect();
        assert_eq!(labels, vec!["alice", "bob", "carol"]);
        assert_eq!(ids[0].images.len(), 2);
        assert_eq!(ids[1].images.len(), 1);
        assert!(ids[2].images.is_empty());
    }

    #[test]
    fn test_missing_root_lists_nothing() {
        let source = DirectoryImageSource::new("/nonexistent/rollcall/register");
        assert!(source.identities().unwrap().is_empty());
    }

    #[test]
    fn test_identity_lookup() {
        let tmp = register_folder();
        let source = DirectoryImageSource::new(tmp.path());

        assert_eq!(source.identity("alice").unwrap().images.len(), 2);
        assert!(matches!(source.identity("dave"), Err(SourceError::IdentityNotFound(_))));
        assert!(matches!(source.identity("carol"), Err(SourceError::NoImages(_))));
    }

    #[test]
    fn test_identity_rejects_path_labels() {
        let tmp = register_folder();
        let source = DirectoryImageSource::new(tmp.path());
        for label in ["", "  ", "..", "../alice", "a/b", "a\\b", "."] {
            assert!(
                matches!(source.identity(label), Err(SourceError::InvalidLabel(_))),
                "label {label:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_image_ref_load() {
        let decoded = ImageRef::Encoded(png_bytes()).load().unwrap();
        assert_eq!(decoded.dimensions(), (4, 4));
        assert_eq!(decoded.get_pixel(0, 0), &Rgb([10, 20, 30]));

        assert!(matches!(
            ImageRef::Encoded(b"garbage".to_vec()).load(),
            Err(ImageLoadError::Decode(_))
        ));
        assert!(matches!(
            ImageRef::File(PathBuf::from("/nonexistent/x.png")).load(),
            Err(ImageLoadError::NotFound(_))
        ));
    }
}
