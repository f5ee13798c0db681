//! Proof-of-delivery photos: multipart intake, acceptance rules and disk
//! storage under the upload directory.

use std::path::{Path, PathBuf};

use axum::{body::Bytes, extract::Multipart};
use tap::TapFallible;
use time::OffsetDateTime;

use crate::error::{Error, PhotoRejection};

pub const MAX_PHOTO_SIZE: usize = 5 * 1024 * 1024;

/// Request body limit of the deliver route. Larger than [`MAX_PHOTO_SIZE`]
/// so an oversized photo is still read and rejected with a precise reason.
pub const UPLOAD_BODY_LIMIT: usize = 8 * 1024 * 1024;

pub const PHOTO_FIELD: &str = "file";

#[derive(Debug, Clone)]
pub struct Photo {
    pub content_type: Option<String>,
    pub bytes: Bytes,
}

impl Photo {
    /// Returns the file extension the photo is stored with.
    pub fn check(&self) -> Result<&'static str, PhotoRejection> {
        let extension = match self.content_type.as_deref() {
            Some("image/jpeg") | Some("image/jpg") => ".jpg",
            Some("image/png") => ".png",
            other => {
                return Err(PhotoRejection::UnsupportedType(
                    other.unwrap_or("none").to_string(),
                ))
            }
        };

        if self.bytes.len() > MAX_PHOTO_SIZE {
            return Err(PhotoRejection::TooLarge {
                size: self.bytes.len(),
                max: MAX_PHOTO_SIZE,
            });
        }

        Ok(extension)
    }
}

/// Reads the `file` field, skipping any other field of the form.
pub async fn read_photo(mut multipart: Multipart) -> Result<Photo, Error> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(PHOTO_FIELD) {
            continue;
        }

        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;

        return Ok(Photo {
            content_type,
            bytes,
        });
    }

    Err(PhotoRejection::Missing.into())
}

#[derive(Debug, Clone)]
pub struct PhotoStorage {
    dir: PathBuf,
}

impl PhotoStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn file_name(extension: &str) -> String {
        let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;

        format!(
            "{}-{}{}",
            millis,
            rand::random::<u32>() % 1_000_000_000,
            extension
        )
    }

    /// Writes the photo and returns the generated file name.
    pub async fn store(&self, photo: &Photo, extension: &str) -> Result<String, Error> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let file_name = Self::file_name(extension);
        tokio::fs::write(self.dir.join(&file_name), &photo.bytes)
            .await
            .tap_err(|err| tracing::error!("failed writing photo {}: {}", file_name, err))?;

        tracing::debug!(%file_name, size = photo.bytes.len(), "stored photo");
        Ok(file_name)
    }

    /// Best-effort removal of a photo whose order update did not apply.
    pub async fn discard(&self, file_name: &str) {
        if let Err(err) = tokio::fs::remove_file(self.dir.join(file_name)).await {
            tracing::warn!(file_name, "failed removing orphaned photo: {}", err);
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn photo(content_type: Option<&str>, size: usize) -> Photo {
        Photo {
            content_type: content_type.map(str::to_string),
            bytes: Bytes::from(vec![0u8; size]),
        }
    }

    #[test]
    fn test_check() {
        assert_eq!(photo(Some("image/png"), 10).check(), Ok(".png"));
        assert_eq!(photo(Some("image/jpeg"), 10).check(), Ok(".jpg"));
        assert_eq!(photo(Some("image/jpg"), MAX_PHOTO_SIZE).check(), Ok(".jpg"));

        assert_matches!(
            photo(Some("application/pdf"), 10).check(),
            Err(PhotoRejection::UnsupportedType(it)) if it == "application/pdf"
        );
        assert_matches!(
            photo(None, 10).check(),
            Err(PhotoRejection::UnsupportedType(_))
        );
        assert_matches!(
            photo(Some("image/png"), MAX_PHOTO_SIZE + 1).check(),
            Err(PhotoRejection::TooLarge { size, .. }) if size == MAX_PHOTO_SIZE + 1
        );
    }

    #[tokio::test]
    async fn test_store_and_discard() {
        let dir = tempfile::tempdir().unwrap();
        let storage = PhotoStorage::new(dir.path().join("nested"));

        let file_name = storage
            .store(&photo(Some("image/png"), 16), ".png")
            .await
            .unwrap();
        assert!(file_name.ends_with(".png"));

        let path = storage.dir().join(&file_name);
        assert_eq!(tokio::fs::read(&path).await.unwrap().len(), 16);

        storage.discard(&file_name).await;
        assert!(!path.exists());

        // already gone, only logged
        storage.discard(&file_name).await;
    }
}
