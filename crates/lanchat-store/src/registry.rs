use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use chrono::Local;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use lanchat_shared::{FileId, FileRecord};

use crate::error::{Result, StoreError};

/// Reduce a user-supplied name to a bare file name.
///
/// Anything before the last path separator is dropped so an upload can
/// never escape the session directory.
pub fn sanitize_file_name(raw: &str) -> Result<String> {
    let base = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .trim();
    if base.is_empty() || base == "." || base == ".." || base.contains('\0') {
        return Err(StoreError::InvalidFileName(raw.to_string()));
    }
    Ok(base.to_string())
}

/// Files shared during this session, keyed by [`FileId`].
///
/// Local records own a copy of their bytes under `dir`, named
/// `<fileId>_<fileName>` so identical upload names never collide.
#[derive(Debug)]
pub struct SessionRegistry {
    dir: PathBuf,
    max_file_size: u64,
    files: RwLock<HashMap<FileId, FileRecord>>,
}

impl SessionRegistry {
    /// Open the registry, creating the session directory if missing.
    pub async fn open(dir: impl Into<PathBuf>, max_file_size: u64) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;

        info!(path = %dir.display(), max_file_size, "Session storage initialized");

        Ok(Self {
            dir,
            max_file_size,
            files: RwLock::new(HashMap::new()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Copy `source` into session storage and record it as owned by `owner`.
    ///
    /// The size limit is checked before any byte is copied.
    pub async fn register(&self, file_name: &str, owner: &str, source: &Path) -> Result<FileRecord> {
        let file_name = sanitize_file_name(file_name)?;
        let size = fs::metadata(source).await?.len();
        self.check_size(size)?;

        let file_id = FileId::new();
        let path = self.storage_path(&file_id, &file_name);

        let copied = match fs::copy(source, &path).await {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                return Err(e.into());
            }
        };

        let record = self.insert_local(file_id, file_name, owner, path, copied).await;
        debug!(id = %record.file_id, size = copied, "Registered local file");
        Ok(record)
    }

    /// Stream exactly `len` bytes from `reader` into session storage.
    pub async fn register_stream<R>(
        &self,
        file_name: &str,
        owner: &str,
        reader: R,
        len: u64,
    ) -> Result<FileRecord>
    where
        R: AsyncRead + Unpin,
    {
        let file_name = sanitize_file_name(file_name)?;
        self.check_size(len)?;

        let file_id = FileId::new();
        let path = self.storage_path(&file_id, &file_name);

        let written = match write_exact(reader, len, &path).await {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&path).await;
                return Err(e.into());
            }
        };

        let record = self.insert_local(file_id, file_name, owner, path, written).await;
        debug!(id = %record.file_id, size = written, "Registered streamed file");
        Ok(record)
    }

    /// Record a file announced by another participant.
    ///
    /// Idempotent: if `file_id` is already known the existing record is
    /// returned unchanged together with `false`.
    pub async fn register_remote(
        &self,
        file_id: FileId,
        file_name: &str,
        owner: &str,
        size_bytes: u64,
        origin: Option<IpAddr>,
    ) -> (FileRecord, bool) {
        let mut files = self.files.write().await;
        if let Some(existing) = files.get(&file_id) {
            return (existing.clone(), false);
        }

        let record = FileRecord {
            file_id,
            file_name: file_name.to_string(),
            storage_path: None,
            owner: owner.to_string(),
            size_bytes,
            announced_at: Local::now(),
            origin,
        };
        files.insert(file_id, record.clone());
        debug!(id = %file_id, origin = ?origin, "Registered remote file");
        (record, true)
    }

    pub async fn get(&self, file_id: &FileId) -> Result<FileRecord> {
        self.files
            .read()
            .await
            .get(file_id)
            .cloned()
            .ok_or(StoreError::NotFound(*file_id))
    }

    /// Snapshot of every record, oldest first.
    pub async fn list(&self) -> Vec<FileRecord> {
        let mut records: Vec<FileRecord> = self.files.read().await.values().cloned().collect();
        records.sort_by_key(|r| r.announced_at);
        records
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    /// Resolve a record to bytes that are present on local disk.
    pub async fn local_path(&self, file_id: &FileId) -> Result<(FileRecord, PathBuf)> {
        let record = self.get(file_id).await?;
        let path = record
            .storage_path
            .clone()
            .ok_or(StoreError::MissingBytes(*file_id))?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StoreError::MissingBytes(*file_id));
        }
        Ok((record, path))
    }

    /// Drop one record and delete its local bytes, if any.
    pub async fn remove(&self, file_id: &FileId) -> Result<FileRecord> {
        let record = self
            .files
            .write()
            .await
            .remove(file_id)
            .ok_or(StoreError::NotFound(*file_id))?;
        if let Some(path) = &record.storage_path {
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        debug!(id = %file_id, "Removed file");
        Ok(record)
    }

    /// Drop every record owned by `owner` and delete its bytes.
    ///
    /// Not atomic: a failed delete is logged and the remaining records are
    /// still processed. Returns the number of records removed.
    pub async fn clear_owned_by(&self, owner: &str) -> usize {
        let removed: Vec<FileRecord> = {
            let mut files = self.files.write().await;
            let ids: Vec<FileId> = files
                .values()
                .filter(|r| r.owner == owner)
                .map(|r| r.file_id)
                .collect();
            ids.iter().filter_map(|id| files.remove(id)).collect()
        };

        for record in &removed {
            let Some(path) = &record.storage_path else {
                continue;
            };
            match fs::remove_file(path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(id = %record.file_id, path = %path.display(), error = %e, "Failed to delete session file");
                }
            }
        }

        info!(owner, removed = removed.len(), "Cleared session files");
        removed.len()
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_file_size {
            return Err(StoreError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    fn storage_path(&self, file_id: &FileId, file_name: &str) -> PathBuf {
        self.dir.join(format!("{file_id}_{file_name}"))
    }

    async fn insert_local(
        &self,
        file_id: FileId,
        file_name: String,
        owner: &str,
        path: PathBuf,
        size_bytes: u64,
    ) -> FileRecord {
        let record = FileRecord {
            file_id,
            file_name,
            storage_path: Some(path),
            owner: owner.to_string(),
            size_bytes,
            announced_at: Local::now(),
            origin: None,
        };
        self.files.write().await.insert(file_id, record.clone());
        record
    }
}

async fn write_exact<R>(reader: R, len: u64, path: &Path) -> std::io::Result<u64>
where
    R: AsyncRead + Unpin,
{
    let mut file = fs::File::create(path).await?;
    let written = tokio::io::copy(&mut reader.take(len), &mut file).await?;
    file.flush().await?;
    if written != len {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, got {written}"),
        ));
    }
    Ok(written)
}
