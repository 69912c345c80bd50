// Copyright (C) 2025 Michael Herstine <sp1ff@pobox.com>
//
// This file is part of notespace.
//
// notespace is free software: you can redistribute it and/or modify it under the terms of the GNU
// General Public License as published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// notespace is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without
// even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with notespace.  If not,
// see <http://www.gnu.org/licenses/>.

//! # Blob storage
//!
//! File *metadata* lives in the [storage backend](crate::storage); the uploaded bytes live here,
//! keyed by [FileId]. [FilesystemBlobs] is the production implementation, [MemoryBlobs] serves
//! development & tests.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use bytes::Bytes;
use snafu::{Backtrace, IntoError, prelude::*};
use tokio::{fs, io::AsyncWriteExt, sync::RwLock};
use tracing::{debug, warn};

use crate::entities::FileId;

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("Failed to create directory {}: {source}", path.display()))]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to delete blob {}: {source}", path.display()))]
    Delete {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to read blob {}: {source}", path.display()))]
    Read {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Failed to move {} into place: {source}", path.display()))]
    Rename {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
    #[snafu(display("Blob store self-check read back different bytes than it wrote"))]
    RoundTrip { backtrace: Backtrace },
    #[snafu(display("Failed to write blob {}: {source}", path.display()))]
    Write {
        path: PathBuf,
        source: std::io::Error,
        backtrace: Backtrace,
    },
}

type Result<T> = std::result::Result<T, Error>;

#[async_trait]
pub trait BlobStore {
    /// Store `content` under `id`, replacing anything already there
    async fn put(&self, id: &FileId, content: &[u8]) -> Result<()>;
    /// Retrieve the content stored under `id`; None if there is none
    async fn get(&self, id: &FileId) -> Result<Option<Bytes>>;
    /// Remove the content stored under `id`; removing a blob that isn't there succeeds
    async fn delete(&self, id: &FileId) -> Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                        FilesystemBlobs                                         //
////////////////////////////////////////////////////////////////////////////////////////////////////

/// Blobs as files beneath a root directory
///
/// Each blob is stored at `root/xx/yy/<uuid>.bin`, where `xx` & `yy` are the first four hex digits
/// of the id, so that no one directory grows too large.
#[derive(Clone, Debug)]
pub struct FilesystemBlobs {
    root: PathBuf,
}

impl FilesystemBlobs {
    pub fn new(root: impl Into<PathBuf>) -> FilesystemBlobs {
        FilesystemBlobs { root: root.into() }
    }
    pub fn root(&self) -> &Path {
        &self.root
    }
    fn path_for(&self, id: &FileId) -> PathBuf {
        let hex = id.as_ref().simple().to_string();
        self.root
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.bin", id))
    }
    /// Write, read back & delete a scratch blob, to catch a misconfigured root at startup rather
    /// than on the first upload
    pub async fn validate(&self) -> Result<()> {
        let id = FileId::new();
        let probe = b"notespace blob store self-check";
        self.put(&id, probe).await?;
        let read = self.get(&id).await?;
        self.delete(&id).await?;
        ensure!(read.as_deref() == Some(&probe[..]), RoundTripSnafu);
        Ok(())
    }
}

#[async_trait]
impl BlobStore for FilesystemBlobs {
    async fn put(&self, id: &FileId, content: &[u8]) -> Result<()> {
        let path = self.path_for(id);
        debug!(path = %path.display(), size = content.len(), "Writing blob");
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .await
                .context(CreateDirSnafu { path: parent })?;
        }
        // Write to a temporary & rename, so readers never see a partial blob
        let temp = path.with_extension("tmp");
        let mut file = fs::File::create(&temp)
            .await
            .context(WriteSnafu { path: &temp })?;
        file.write_all(content)
            .await
            .context(WriteSnafu { path: &temp })?;
        file.sync_all().await.context(WriteSnafu { path: &temp })?;
        drop(file);
        fs::rename(&temp, &path).await.map_err(|err| {
            warn!(from = %temp.display(), to = %path.display(), "Failed to rename blob");
            RenameSnafu { path: &path }.into_error(err)
        })
    }
    async fn get(&self, id: &FileId) -> Result<Option<Bytes>> {
        let path = self.path_for(id);
        match fs::read(&path).await {
            Ok(content) => Ok(Some(Bytes::from(content))),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(ReadSnafu { path }.into_error(err)),
        }
    }
    async fn delete(&self, id: &FileId) -> Result<()> {
        let path = self.path_for(id);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(DeleteSnafu { path }.into_error(err)),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////
//                                          MemoryBlobs                                           //
////////////////////////////////////////////////////////////////////////////////////////////////////

#[derive(Debug, Default)]
pub struct MemoryBlobs {
    blobs: RwLock<HashMap<FileId, Bytes>>,
}

impl MemoryBlobs {
    pub fn new() -> MemoryBlobs {
        MemoryBlobs::default()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobs {
    async fn put(&self, id: &FileId, content: &[u8]) -> Result<()> {
        self.blobs
            .write()
            .await
            .insert(*id, Bytes::copy_from_slice(content));
        Ok(())
    }
    async fn get(&self, id: &FileId) -> Result<Option<Bytes>> {
        Ok(self.blobs.read().await.get(id).cloned())
    }
    async fn delete(&self, id: &FileId) -> Result<()> {
        self.blobs.write().await.remove(id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn filesystem_blobs() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = FilesystemBlobs::new(dir.path());
        blobs.validate().await.unwrap();

        let id = FileId::new();
        assert!(blobs.get(&id).await.unwrap().is_none());
        blobs.put(&id, b"Hello, world!").await.unwrap();
        assert_eq!(
            Some(Bytes::from_static(b"Hello, world!")),
            blobs.get(&id).await.unwrap()
        );

        // Path layout
        let hex = id.as_ref().simple().to_string();
        let expected = dir
            .path()
            .join(&hex[0..2])
            .join(&hex[2..4])
            .join(format!("{}.bin", id));
        assert!(expected.exists());
        assert!(!expected.with_extension("tmp").exists());

        blobs.put(&id, b"Goodbye").await.unwrap();
        assert_eq!(
            Some(Bytes::from_static(b"Goodbye")),
            blobs.get(&id).await.unwrap()
        );

        blobs.delete(&id).await.unwrap();
        assert!(blobs.get(&id).await.unwrap().is_none());
        // Deleting a missing blob is fine
        blobs.delete(&id).await.unwrap();
    }

    #[tokio::test]
    async fn memory_blobs() {
        let blobs = MemoryBlobs::new();
        let id = FileId::new();
        blobs.put(&id, b"abc").await.unwrap();
        assert_eq!(Some(Bytes::from_static(b"abc")), blobs.get(&id).await.unwrap());
        blobs.delete(&id).await.unwrap();
        blobs.delete(&id).await.unwrap();
        assert!(blobs.get(&id).await.unwrap().is_none());
    }
}
