use std::path::PathBuf;

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

pub const ACCEPTED_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "bmp", "webp"];
const DEFAULT_EXTENSION: &str = "jpg";

pub const UPLOADS_URL_PREFIX: &str = "/uploads";
pub const ANNOTATED_URL_PREFIX: &str = "/annotated";

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("File must be an image")]
    InvalidFormat,
    #[error("Uploaded file is empty")]
    Empty,
    #[error("File too large. Limit is {limit_mb} MB")]
    FileTooLarge { limit_mb: usize },
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Accepts a declared `image/*` content type, or failing that a known image extension.
pub fn is_accepted_image(content_type: Option<&str>, filename: Option<&str>) -> bool {
    if content_type.is_some_and(|ct| ct.trim().to_lowercase().starts_with("image/")) {
        return true;
    }
    filename.is_some_and(|name| {
        let lower = name.to_lowercase();
        ACCEPTED_EXTENSIONS
            .iter()
            .any(|ext| lower.ends_with(&format!(".{}", ext)))
    })
}

/// Extension kept for the stored copy: the original's last dot segment, lower-cased,
/// when it is an accepted image extension; `jpg` otherwise.
pub fn stored_extension(filename: Option<&str>) -> String {
    filename
        .and_then(|name| name.rsplit_once('.'))
        .map(|(_, ext)| ext.to_lowercase())
        .filter(|ext| ACCEPTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// `<YYYYmmddHHMMSS>_<uuid>.<ext>`; the uuid keeps same-second uploads apart.
pub fn generate_stored_filename(original: Option<&str>) -> String {
    format!(
        "{}_{}.{}",
        Utc::now().format("%Y%m%d%H%M%S"),
        Uuid::new_v4().simple(),
        stored_extension(original)
    )
}

pub fn upload_url(stored_filename: &str) -> String {
    format!("{}/{}", UPLOADS_URL_PREFIX, stored_filename)
}

pub fn annotated_url(annotated_filename: &str) -> String {
    format!("{}/{}", ANNOTATED_URL_PREFIX, annotated_filename)
}

#[derive(Debug, Clone)]
pub struct StoredImage {
    pub filename: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct ImageStorage {
    upload_dir: PathBuf,
    annotated_dir: PathBuf,
    max_bytes: usize,
}

impl ImageStorage {
    pub fn new(upload_dir: PathBuf, annotated_dir: PathBuf, max_bytes: usize) -> Self {
        Self {
            upload_dir,
            annotated_dir,
            max_bytes,
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.upload_dir)?;
        std::fs::create_dir_all(&self.annotated_dir)?;
        Ok(())
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub fn too_large(&self) -> StorageError {
        StorageError::FileTooLarge {
            limit_mb: self.max_bytes / (1024 * 1024),
        }
    }

    pub fn validate_image_size(&self, image_data: &[u8]) -> Result<(), StorageError> {
        if image_data.is_empty() {
            return Err(StorageError::Empty);
        }
        if image_data.len() > self.max_bytes {
            return Err(self.too_large());
        }
        Ok(())
    }

    /// Writes the upload under a fresh name. `create_new` guarantees an existing file is
    /// never overwritten.
    pub async fn save(
        &self,
        original_filename: Option<&str>,
        image_data: &[u8],
    ) -> Result<StoredImage, StorageError> {
        self.validate_image_size(image_data)?;

        let filename = generate_stored_filename(original_filename);
        let path = self.upload_dir.join(&filename);
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;
        file.write_all(image_data).await?;
        file.flush().await?;

        log::debug!("Saved {} bytes to {}", image_data.len(), path.display());
        Ok(StoredImage { filename, path })
    }

    /// Deletes a stored upload and its annotated rendering, if any. Failures are logged.
    pub async fn discard(&self, stored: &StoredImage, annotated_filename: Option<&str>) {
        let annotated = annotated_filename.map(|name| self.annotated_dir.join(name));
        for path in std::iter::once(stored.path.clone()).chain(annotated) {
            if let Err(e) = tokio::fs::remove_file(&path).await {
                log::warn!("Failed to remove orphaned {}: {}", path.display(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_type_or_extension_makes_an_image() {
        assert!(is_accepted_image(Some("image/jpeg"), None));
        assert!(is_accepted_image(Some("IMAGE/PNG"), Some("photo")));
        assert!(is_accepted_image(Some("application/octet-stream"), Some("shot.png")));
        assert!(is_accepted_image(None, Some("SHOT.WEBP")));
        assert!(!is_accepted_image(Some("text/plain"), Some("notes.txt")));
        assert!(!is_accepted_image(None, None));
        assert!(!is_accepted_image(Some("application/octet-stream"), Some("png")));
    }

    #[test]
    fn extension_defaults_to_jpg() {
        assert_eq!(stored_extension(Some("photo.PNG")), "png");
        assert_eq!(stored_extension(Some("photo.final.JPEG")), "jpeg");
        assert_eq!(stored_extension(Some("archive.tar.gz")), "jpg");
        assert_eq!(stored_extension(Some("page.html")), "jpg");
        assert_eq!(stored_extension(Some("vector.svg")), "jpg");
        assert_eq!(stored_extension(Some("photo")), "jpg");
        assert_eq!(stored_extension(Some("photo.")), "jpg");
        assert_eq!(stored_extension(Some("x./../evil")), "jpg");
        assert_eq!(stored_extension(None), "jpg");
    }

    #[test]
    fn generated_names_are_unique_and_keep_extension() {
        let a = generate_stored_filename(Some("a.webp"));
        let b = generate_stored_filename(Some("a.webp"));
        assert_ne!(a, b);
        assert!(a.ends_with(".webp"));
        let (stamp, rest) = a.split_once('_').unwrap();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
        assert_eq!(rest.len(), 32 + ".webp".len());
    }

    #[test]
    fn urls_use_serving_prefixes() {
        assert_eq!(upload_url("a.jpg"), "/uploads/a.jpg");
        assert_eq!(annotated_url("boxed_a.jpg"), "/annotated/boxed_a.jpg");
    }

    #[tokio::test]
    async fn save_writes_bytes_and_enforces_limits() {
        let dir = tempfile::tempdir().unwrap();
        let storage = ImageStorage::new(dir.path().to_path_buf(), dir.path().join("annotated"), 8);
        storage.ensure_dirs().unwrap();

        let stored = storage.save(Some("x.png"), b"12345").await.unwrap();
        assert_eq!(std::fs::read(&stored.path).unwrap(), b"12345");
        assert!(stored.filename.ends_with(".png"));

        assert!(matches!(
            storage.save(Some("x.png"), b"").await,
            Err(StorageError::Empty)
        ));
        assert!(matches!(
            storage.save(Some("x.png"), b"123456789").await,
            Err(StorageError::FileTooLarge { .. })
        ));

        storage.discard(&stored, None).await;
        assert!(!stored.path.exists());
    }
}
