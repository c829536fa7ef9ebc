//! Content-addressable storage for screenshot bytes.
//!
//! Every image is stored under the report directory's image namespace as
//! `<sha256-hex>.<ext>`, so byte-identical screenshots captured any number of
//! times, by any worker, share one fingerprint and one file. Writes go to a
//! temporary name and are renamed into place, so a reader never observes a
//! torn image. Hash collisions are outside the error model.

use std::fs;
use std::path::{Path, PathBuf};

use base64::Engine;
use sha2::{Digest, Sha256};

/// Extensions the store may write; `load` scans these in order
const KNOWN_EXTENSIONS: &[&str] = &["png", "jpg", "gif"];

/// Handle to a stored image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredImage {
    /// SHA-256 hex digest of the image bytes
    pub fingerprint: String,

    /// File name within the image directory (e.g. "ab12....png")
    pub file_name: String,
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Error types for store operations
#[derive(Debug)]
pub enum StoreError {
    /// No stored file exists for the fingerprint
    NotFound(String),

    /// Payload could not be decoded (bad base64 from the browser wrapper)
    Decode(String),

    /// I/O error reading or writing the store
    Io(std::io::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::NotFound(fingerprint) => {
                write!(f, "no stored image for fingerprint {}", fingerprint)
            }
            StoreError::Decode(msg) => write!(f, "Decode error: {}", msg),
            StoreError::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::NotFound(_) | StoreError::Decode(_) => None,
            StoreError::Io(err) => Some(err),
        }
    }
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<base64::DecodeError> for StoreError {
    fn from(err: base64::DecodeError) -> Self {
        StoreError::Decode(err.to_string())
    }
}

/// Content-addressed image storage rooted at one directory
#[derive(Debug, Clone)]
pub struct ImageStore {
    dir: PathBuf,
}

impl ImageStore {
    /// Open (creating if needed) the store at the given directory
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Directory the store writes into
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Store image bytes, returning the content fingerprint.
    ///
    /// Idempotent: a repeated store of identical bytes is an existence check,
    /// not a re-write.
    pub fn store(&self, bytes: &[u8]) -> StoreResult<StoredImage> {
        let fingerprint = fingerprint_bytes(bytes);
        let file_name = format!("{}.{}", fingerprint, sniff_extension(bytes));
        let path = self.dir.join(&file_name);

        if !path.exists() {
            // Temp name includes the pid so concurrent workers storing the
            // same bytes never interleave writes into one temp file.
            let tmp = self
                .dir
                .join(format!(".{}.{}.tmp", fingerprint, std::process::id()));
            fs::write(&tmp, bytes)?;
            fs::rename(&tmp, &path)?;
        }

        Ok(StoredImage { fingerprint, file_name })
    }

    /// Store a base64-encoded payload, as delivered by webdriver screenshot APIs
    pub fn store_base64(&self, data: &str) -> StoreResult<StoredImage> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(data.trim())?;
        self.store(&bytes)
    }

    /// Load previously stored content by fingerprint
    pub fn load(&self, fingerprint: &str) -> StoreResult<Vec<u8>> {
        for ext in KNOWN_EXTENSIONS {
            let path = self.dir.join(format!("{}.{}", fingerprint, ext));
            if path.exists() {
                return Ok(fs::read(path)?);
            }
        }
        Err(StoreError::NotFound(fingerprint.to_string()))
    }

    /// Whether a file exists for the fingerprint
    pub fn contains(&self, fingerprint: &str) -> bool {
        KNOWN_EXTENSIONS
            .iter()
            .any(|ext| self.dir.join(format!("{}.{}", fingerprint, ext)).exists())
    }
}

/// SHA-256 hex digest of a byte payload
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Pick a file extension from the payload's magic bytes.
///
/// Browsers hand us PNG almost always; unrecognized payloads fall back to
/// "png" and remain loadable either way.
fn sniff_extension(bytes: &[u8]) -> &'static str {
    match image::guess_format(bytes) {
        Ok(image::ImageFormat::Jpeg) => "jpg",
        Ok(image::ImageFormat::Gif) => "gif",
        _ => "png",
    }
}
