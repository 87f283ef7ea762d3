//! Durable local buffer for uploads not yet persisted remotely
//!
//! Uploaded files land here first. The directory mirrors the remote key
//! namespace. Writes go through a temp file in the destination directory
//! and a rename, so the sync worker never picks up a half-written file.
//!
//! While the sync worker uploads a file it holds a *claim*: the file is
//! renamed to a hidden sibling (`.tmpsync-<name>`) so that a new upload of
//! the same key lands beside it instead of replacing the bytes in flight.
//! Claimed files are still served by [`UploadStaging::read`]. Only one sync
//! worker may drain a staging directory.

use crate::error::{EdgeError, Result};
use crate::key::{key_to_path, path_to_key, TEMP_FILE_PREFIX};
use bytes::Bytes;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tracing::{debug, info, warn};

/// File name prefix of a staged file claimed by the sync worker
pub const CLAIM_PREFIX: &str = ".tmpsync-";

/// A file waiting in the staging directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub key: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

/// Upload staging directory
#[derive(Debug, Clone)]
pub struct UploadStaging {
    dir: PathBuf,
}

impl UploadStaging {
    /// Open the staging directory, creating it if needed
    pub async fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).await.map_err(|e| {
            EdgeError::IoError(format!(
                "Failed to create upload directory {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        key_to_path(&self.dir, key)
    }

    /// Stage `data` under `key`, replacing any previously staged file
    ///
    /// # Returns
    /// The number of bytes staged
    pub async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let path = self.path_for(key);
        let size = data.len() as u64;

        tokio::task::spawn_blocking(move || write_atomic(&path, &data))
            .await
            .map_err(|e| EdgeError::InternalError(format!("Staging write task failed: {}", e)))??;

        debug!(key = key, size = size, "Staged upload");
        Ok(size)
    }

    /// Path of the claimed copy of `key`
    pub fn claim_path_for(&self, key: &str) -> PathBuf {
        let path = self.path_for(key);
        let name = key.rsplit('/').next().unwrap_or(key);
        path.with_file_name(format!("{}{}", CLAIM_PREFIX, name))
    }

    /// Read the staged copy of `key`, if any
    ///
    /// Falls back to the claimed copy while the key is being synced.
    pub async fn read(&self, key: &str) -> Result<Option<Bytes>> {
        if let Some(data) = read_staged(&self.path_for(key)).await? {
            return Ok(Some(data));
        }
        read_staged(&self.claim_path_for(key)).await
    }

    pub async fn contains(&self, key: &str) -> bool {
        is_file(&self.path_for(key)).await || is_file(&self.claim_path_for(key)).await
    }

    /// Remove the staged copy of `key`, claimed or not
    ///
    /// # Returns
    /// `true` if a file was removed
    pub async fn remove(&self, key: &str) -> Result<bool> {
        let staged = remove_if_present(&self.path_for(key)).await?;
        let claimed = remove_if_present(&self.claim_path_for(key)).await?;
        Ok(staged || claimed)
    }

    /// Claim the staged file of `key` for upload
    ///
    /// Renames it to its claim path. Until the claim is released or
    /// discarded, the file no longer shows up in [`UploadStaging::list`] and
    /// a new write of `key` stages a separate file.
    ///
    /// # Returns
    /// The claimed path, or `None` if nothing is staged under `key`
    pub async fn claim(&self, key: &str) -> Result<Option<PathBuf>> {
        let path = self.path_for(key);
        let claimed = self.claim_path_for(key);
        match fs::rename(&path, &claimed).await {
            Ok(()) => Ok(Some(claimed)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(EdgeError::IoError(format!(
                "Failed to claim staged file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Put a claimed file back so the next cycle retries it
    ///
    /// If `key` was staged again while claimed, the newer file wins and the
    /// claimed copy is deleted.
    pub async fn release(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        let claimed = self.claim_path_for(key);
        tokio::task::spawn_blocking(move || restore_claim(&claimed, &path))
            .await
            .map_err(|e| EdgeError::InternalError(format!("Staging release task failed: {}", e)))?
    }

    /// Delete the claimed copy of `key`
    pub async fn discard_claim(&self, key: &str) -> Result<()> {
        remove_if_present(&self.claim_path_for(key)).await?;
        Ok(())
    }

    /// Release every claim left behind by an interrupted sync
    ///
    /// # Returns
    /// The number of claims released
    pub async fn recover_claims(&self) -> Result<usize> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || recover_claims(&dir))
            .await
            .map_err(|e| EdgeError::InternalError(format!("Claim recovery task failed: {}", e)))?
    }

    /// List every staged file
    ///
    /// Temp files of in-flight writes and claimed files are not listed.
    pub async fn list(&self) -> Result<Vec<StagedFile>> {
        let dir = self.dir.clone();
        tokio::task::spawn_blocking(move || list_files(&dir))
            .await
            .map_err(|e| EdgeError::InternalError(format!("Staging listing task failed: {}", e)))?
    }
}

async fn read_staged(path: &Path) -> Result<Option<Bytes>> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(Bytes::from(data))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        // A directory where a file is expected means the key is absent
        Err(e) if path.is_dir() => {
            debug!(path = %path.display(), "Staging path is a directory: {}", e);
            Ok(None)
        }
        Err(e) => Err(EdgeError::IoError(format!(
            "Failed to read staged file {}: {}",
            path.display(),
            e
        ))),
    }
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

async fn remove_if_present(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Move `claimed` back to `path` unless a file already exists there
///
/// A hard link never replaces an existing file, so a write that races the
/// release cannot be overwritten by the older claimed content.
fn restore_claim(claimed: &Path, path: &Path) -> Result<()> {
    match std::fs::hard_link(claimed, path) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            debug!(path = %path.display(), "Newer upload staged, dropping claimed copy");
        }
        Err(e) => {
            return Err(EdgeError::IoError(format!(
                "Failed to release claim on {}: {}",
                path.display(),
                e
            )))
        }
    }
    match std::fs::remove_file(claimed) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn recover_claims(root: &Path) -> Result<usize> {
    let mut released = 0;
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            EdgeError::IoError(format!("Could not read upload directory {}: {}", dir.display(), e))
        })?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                pending.push(path);
                continue;
            }
            let name = entry.file_name();
            let Some(original) = name.to_str().and_then(|n| n.strip_prefix(CLAIM_PREFIX)) else {
                continue;
            };
            match restore_claim(&path, &dir.join(original)) {
                Ok(()) => released += 1,
                Err(e) => warn!(path = %path.display(), "Could not release claim: {}", e),
            }
        }
    }

    if released > 0 {
        info!(count = released, "Released claims left by an interrupted sync");
    }
    Ok(released)
}

fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        EdgeError::InvalidKey(format!("no parent directory for {}", path.display()))
    })?;
    std::fs::create_dir_all(parent).map_err(|e| {
        EdgeError::IoError(format!(
            "Failed to create directory {}: {}",
            parent.display(),
            e
        ))
    })?;

    let mut tmp = tempfile::Builder::new()
        .prefix(TEMP_FILE_PREFIX)
        .tempfile_in(parent)
        .map_err(|e| EdgeError::IoError(format!("Failed to create the upload file: {}", e)))?;
    tmp.write_all(data)
        .map_err(|e| EdgeError::IoError(format!("Failed to write to file {}: {}", path.display(), e)))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| EdgeError::IoError(format!("Failed to sync file {}: {}", path.display(), e)))?;
    tmp.persist(path).map_err(|e| {
        EdgeError::IoError(format!("Failed to persist upload file {}: {}", path.display(), e))
    })?;
    Ok(())
}

fn list_files(root: &Path) -> Result<Vec<StagedFile>> {
    let mut files = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let entries = std::fs::read_dir(&dir).map_err(|e| {
            EdgeError::IoError(format!("Could not read upload directory {}: {}", dir.display(), e))
        })?;

        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(path = %path.display(), "Skipping staged file: {}", e);
                    continue;
                }
            };

            if metadata.is_dir() {
                pending.push(path);
            } else if metadata.is_file() {
                if let Some(key) = path_to_key(root, &path) {
                    files.push(StagedFile {
                        key,
                        path,
                        size: metadata.len(),
                        modified: metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                    });
                }
            }
        }
    }

    files.sort_by(|a, b| a.key.cmp(&b.key));
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_write_read_overwrite() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path().join("upload")).await.unwrap();

        assert_eq!(staging.read("a/b.txt").await.unwrap(), None);
        assert!(!staging.contains("a/b.txt").await);

        staging.write("a/b.txt", Bytes::from_static(b"first")).await.unwrap();
        staging.write("a/b.txt", Bytes::from_static(b"second")).await.unwrap();

        assert!(staging.contains("a/b.txt").await);
        assert_eq!(
            staging.read("a/b.txt").await.unwrap(),
            Some(Bytes::from_static(b"second"))
        );
    }

    #[tokio::test]
    async fn test_list_skips_temp_files() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path()).await.unwrap();

        staging.write("z.bin", Bytes::from(vec![1u8; 3])).await.unwrap();
        staging.write("dir/nested/a.bin", Bytes::from(vec![1u8; 5])).await.unwrap();
        std::fs::write(temp_dir.path().join(".tmpPartial"), b"half").unwrap();

        let listed = staging.list().await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["dir/nested/a.bin", "z.bin"]);
        assert_eq!(listed[0].size, 5);
        assert_eq!(listed[0].path, temp_dir.path().join("dir").join("nested").join("a.bin"));
    }

    #[tokio::test]
    async fn test_remove() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path()).await.unwrap();

        staging.write("k", Bytes::from_static(b"v")).await.unwrap();
        assert!(staging.remove("k").await.unwrap());
        assert!(!staging.remove("k").await.unwrap());
        assert!(staging.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_directory_is_not_a_staged_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path()).await.unwrap();

        staging.write("dir/file", Bytes::from_static(b"v")).await.unwrap();
        assert_eq!(staging.read("dir").await.unwrap(), None);
        assert!(!staging.contains("dir").await);
    }

    #[tokio::test]
    async fn test_claim_hides_file_but_keeps_it_readable() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path()).await.unwrap();

        staging.write("a/clip.mp4", Bytes::from_static(b"v1")).await.unwrap();
        let claimed = staging.claim("a/clip.mp4").await.unwrap().unwrap();
        assert_eq!(claimed, temp_dir.path().join("a").join(".tmpsync-clip.mp4"));

        assert!(staging.list().await.unwrap().is_empty());
        assert!(staging.contains("a/clip.mp4").await);
        assert_eq!(
            staging.read("a/clip.mp4").await.unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
        assert_eq!(staging.claim("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_write_while_claimed_stages_beside_claim() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path()).await.unwrap();

        staging.write("k", Bytes::from_static(b"v1")).await.unwrap();
        let claimed = staging.claim("k").await.unwrap().unwrap();
        staging.write("k", Bytes::from_static(b"v2")).await.unwrap();

        assert_eq!(std::fs::read(&claimed).unwrap(), b"v1");
        assert_eq!(staging.read("k").await.unwrap(), Some(Bytes::from_static(b"v2")));

        // The newer upload wins on release
        staging.release("k").await.unwrap();
        assert!(!claimed.exists());
        assert_eq!(staging.read("k").await.unwrap(), Some(Bytes::from_static(b"v2")));
        assert_eq!(staging.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_release_restores_claimed_file() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path()).await.unwrap();

        staging.write("k", Bytes::from_static(b"v1")).await.unwrap();
        staging.claim("k").await.unwrap().unwrap();
        staging.release("k").await.unwrap();

        let listed = staging.list().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, "k");
        assert!(!staging.claim_path_for("k").exists());

        // Releasing with nothing claimed is a no-op
        staging.release("k").await.unwrap();
        assert_eq!(staging.read("k").await.unwrap(), Some(Bytes::from_static(b"v1")));
    }

    #[tokio::test]
    async fn test_recover_claims_after_interrupted_sync() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let staging = UploadStaging::new(temp_dir.path()).await.unwrap();

        staging.write("dir/a.bin", Bytes::from_static(b"old")).await.unwrap();
        staging.claim("dir/a.bin").await.unwrap().unwrap();
        staging.write("b.bin", Bytes::from_static(b"b")).await.unwrap();
        staging.claim("b.bin").await.unwrap().unwrap();
        staging.write("b.bin", Bytes::from_static(b"newer")).await.unwrap();

        assert_eq!(staging.recover_claims().await.unwrap(), 2);

        let keys: Vec<String> = staging.list().await.unwrap().into_iter().map(|f| f.key).collect();
        assert_eq!(keys, vec!["b.bin".to_string(), "dir/a.bin".to_string()]);
        assert_eq!(staging.read("b.bin").await.unwrap(), Some(Bytes::from_static(b"newer")));
        assert_eq!(staging.recover_claims().await.unwrap(), 0);
    }
}
