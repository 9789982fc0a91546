use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;

use axum::body::Bytes;
use futures_util::{Stream, StreamExt};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::{fs, io::AsyncWriteExt};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::server::constants::{MAX_EXTENSION_LENGTH, PARTIAL_UPLOAD_DIR};

/// A blob in the upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub name: String,
    pub extension: Option<String>,
    pub size_bytes: u64,
    pub modified_at: Option<OffsetDateTime>,
}

#[derive(Debug, Error)]
pub enum FileStoreError {
    #[error("'{0}' is not a valid file name")]
    InvalidName(String),
    #[error("File '{0}' was not found")]
    NotFound(String),
    #[error("Upload exceeds the {limit} byte limit")]
    PayloadTooLarge { limit: u64 },
    #[error("Upload was empty")]
    EmptyUpload,
    #[error("File storage error: {0}")]
    Storage(#[from] std::io::Error),
    #[error("Upload stream failed: {0}")]
    Stream(String),
}

/// Flat namespace of uploaded files under a single directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
    max_upload_bytes: u64,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>, max_upload_bytes: u64) -> Self {
        Self {
            root: root.into(),
            max_upload_bytes,
        }
    }

    #[cfg(test)]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Point-in-time listing of stored files, oldest upload first.
    ///
    /// Hidden entries (including the in-progress upload area) and directories are skipped, so a
    /// partially written upload is never listed.
    pub async fn list_files(&self) -> Result<Vec<StoredFile>, FileStoreError> {
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut files = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let Ok(name) = entry.file_name().into_string() else {
                debug!(target: "files", path = %entry.path().display(), "skipping non UTF-8 file name");
                continue;
            };
            if name.starts_with('.') {
                continue;
            }

            // Entries can vanish between read_dir and metadata under concurrent deletes.
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(err.into()),
            };
            if !metadata.is_file() {
                continue;
            }

            files.push(StoredFile {
                extension: extension_of(&name),
                size_bytes: metadata.len(),
                modified_at: metadata.modified().ok().map(to_offset_datetime),
                name,
            });
        }

        files.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(files)
    }

    /// Stream an upload to disk under a generated `<ulid>.<ext>` name.
    ///
    /// Bytes land in the hidden partial area first and are fsynced before being renamed into
    /// place. Exceeding the size limit or any I/O failure removes the partial file.
    pub async fn save_stream<S>(
        &self,
        original_name: Option<&str>,
        chunks: S,
    ) -> Result<StoredFile, FileStoreError>
    where
        S: Stream<Item = Result<Bytes, FileStoreError>>,
    {
        let name = generate_stored_name(original_name);
        let partial_dir = self.root.join(PARTIAL_UPLOAD_DIR);
        fs::create_dir_all(&partial_dir).await?;

        let temp_path = partial_dir.join(&name);
        let final_path = self.root.join(&name);

        let mut file = fs::File::create(&temp_path).await?;
        let written = match self.write_chunks(&mut file, chunks).await {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                discard_partial(&temp_path).await;
                return Err(err);
            }
        };
        drop(file);

        if written == 0 {
            discard_partial(&temp_path).await;
            return Err(FileStoreError::EmptyUpload);
        }

        if let Err(err) = fs::rename(&temp_path, &final_path).await {
            discard_partial(&temp_path).await;
            return Err(err.into());
        }

        Ok(StoredFile {
            extension: extension_of(&name),
            name,
            size_bytes: written,
            modified_at: Some(OffsetDateTime::now_utc()),
        })
    }

    async fn write_chunks<S>(&self, file: &mut fs::File, chunks: S) -> Result<u64, FileStoreError>
    where
        S: Stream<Item = Result<Bytes, FileStoreError>>,
    {
        let mut chunks = std::pin::pin!(chunks);
        let mut written: u64 = 0;

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if chunk.is_empty() {
                continue;
            }

            written = written.saturating_add(chunk.len() as u64);
            if written > self.max_upload_bytes {
                return Err(FileStoreError::PayloadTooLarge {
                    limit: self.max_upload_bytes,
                });
            }

            file.write_all(&chunk).await?;
        }

        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }

    /// Remove a stored file by its bare name.
    pub async fn delete_file(&self, name: &str) -> Result<(), FileStoreError> {
        let path = self.resolve(name)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(FileStoreError::NotFound(name.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Open a stored file for reading along with its listing metadata.
    pub async fn open_file(&self, name: &str) -> Result<(fs::File, StoredFile), FileStoreError> {
        let path = self.resolve(name)?;
        let file = match fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(FileStoreError::NotFound(name.to_string()))
            }
            Err(err) => return Err(err.into()),
        };

        let metadata = file.metadata().await?;
        if !metadata.is_file() {
            return Err(FileStoreError::NotFound(name.to_string()));
        }

        let stored = StoredFile {
            name: name.to_string(),
            extension: extension_of(name),
            size_bytes: metadata.len(),
            modified_at: metadata.modified().ok().map(to_offset_datetime),
        };
        Ok((file, stored))
    }

    fn resolve(&self, name: &str) -> Result<PathBuf, FileStoreError> {
        validate_stored_name(name)?;
        Ok(self.root.join(name))
    }
}

/// Accept only a bare, visible file name: no separators, no `.`/`..`, no NUL bytes.
pub fn validate_stored_name(name: &str) -> Result<(), FileStoreError> {
    let invalid = || FileStoreError::InvalidName(name.to_string());

    if name.is_empty()
        || name.starts_with('.')
        || name.contains(['/', '\\', '\0'])
        || name.contains("..")
    {
        return Err(invalid());
    }

    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) if part == name => Ok(()),
        _ => Err(invalid()),
    }
}

/// Build a collision-resistant stored name that keeps the original extension.
pub fn generate_stored_name(original_name: Option<&str>) -> String {
    let id = Ulid::new().to_string().to_ascii_lowercase();
    match original_name.and_then(sanitize_extension) {
        Some(extension) => format!("{id}.{extension}"),
        None => id,
    }
}

fn sanitize_extension(original_name: &str) -> Option<String> {
    let base = original_name.rsplit(['/', '\\']).next()?;
    let (stem, extension) = base.rsplit_once('.')?;
    if stem.is_empty()
        || extension.is_empty()
        || extension.len() > MAX_EXTENSION_LENGTH
        || !extension.chars().all(|c| c.is_ascii_alphanumeric())
    {
        return None;
    }
    Some(extension.to_ascii_lowercase())
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_string)
}

fn to_offset_datetime(time: SystemTime) -> OffsetDateTime {
    OffsetDateTime::from(time)
}

async fn discard_partial(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => {
            warn!(target: "upload", %err, path = %path.display(), "failed to remove partial upload");
        }
    }
}
