// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! A read-only filesystem served from any number of loaded volumes.

mod descriptor;
mod stream;
mod text;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use ulid::Ulid;

pub use descriptor::FileDescriptor;
use descriptor::OpenFile;
pub use stream::{AsyncReadStream, ReadStream, ReadStreamOptions};
pub use text::TextEncoding;

use crate::config::Config;
use crate::stat::{DirEntry, Stat};
use crate::volume::ReadableVolume;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./filesystem_test.rs"]
mod filesystem_test;

/// Test for the existence of a path, see [`StaticFilesystem::access_sync`]
pub const F_OK: i32 = 0;
pub const X_OK: i32 = 1;
pub const W_OK: i32 = 2;
pub const R_OK: i32 = 4;

/// Open flags that would allow modification of a file
const WRITE_FLAGS: i32 =
    libc::O_WRONLY | libc::O_RDWR | libc::O_APPEND | libc::O_CREAT | libc::O_TRUNC;

/// Serves stat, listing and read requests for every path
/// packed into any of its loaded volumes.
///
/// Each operation is available synchronously, with a `_sync`
/// suffix, and as an async function that yields to the runtime
/// once before doing the same work.
#[derive(Debug)]
pub struct StaticFilesystem {
    id: Ulid,
    config: Config,
    /// Loaded volumes by archive path
    volumes: DashMap<PathBuf, Arc<ReadableVolume>>,
    /// Normalized absolute path to the archive path of its volume
    owners: DashMap<PathBuf, PathBuf>,
    descriptors: DashMap<Arc<str>, OpenFile>,
}

impl Default for StaticFilesystem {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

async fn deferred<T>(op: impl FnOnce() -> Result<T>) -> Result<T> {
    tokio::task::yield_now().await;
    op()
}

impl StaticFilesystem {
    pub fn new(config: Config) -> Self {
        Self {
            id: Ulid::new(),
            config,
            volumes: DashMap::new(),
            owners: DashMap::new(),
            descriptors: DashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Load the volume archive at the given path and start
    /// serving its contents.
    ///
    /// Loading an archive that is already loaded does nothing. Paths
    /// that are also part of an earlier volume are served from the
    /// most recently loaded one.
    pub fn load_sync<P: AsRef<Path>>(&self, archive: P) -> Result<()> {
        let archive = crate::path::normalize(archive)?;
        if self.volumes.contains_key(&archive) {
            return Ok(());
        }
        let volume = ReadableVolume::with_layout(&archive, &self.config.layout)?;
        volume.load()?;
        match self.volumes.entry(archive.clone()) {
            Entry::Occupied(_) => {
                // loaded concurrently by another caller
                volume.shutdown();
            }
            Entry::Vacant(entry) => {
                let volume = entry.insert(Arc::new(volume)).clone();
                self.register(&volume);
                tracing::debug!(volume = %archive.display(), "serving volume");
            }
        }
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(&self, archive: P) -> impl Future<Output = Result<()>> + '_ {
        let archive = archive.as_ref().to_owned();
        deferred(move || self.load_sync(archive))
    }

    fn register(&self, volume: &ReadableVolume) {
        for path in volume.paths() {
            self.owners.insert(path, volume.archive_path().to_owned());
        }
    }

    /// Stop serving the given volume and release its archive.
    ///
    /// Descriptors opened on the volume become invalid.
    pub fn unload_sync<P: AsRef<Path>>(&self, archive: P) -> Result<()> {
        let archive = crate::path::normalize(archive)?;
        let Some((_, volume)) = self.volumes.remove(&archive) else {
            return Err(Error::not_found("unload", archive));
        };
        self.owners.retain(|_, owner| owner != &archive);
        self.descriptors.retain(|_, open| open.volume != archive);
        // restore any shared paths to the volumes that remain
        for other in self.volumes.iter() {
            for path in other.paths() {
                if let Entry::Vacant(entry) = self.owners.entry(path) {
                    entry.insert(other.archive_path().to_owned());
                }
            }
        }
        volume.shutdown();
        tracing::debug!(volume = %archive.display(), "volume unloaded");
        Ok(())
    }

    /// The archive paths of all loaded volumes.
    pub fn loaded_volumes(&self) -> Vec<PathBuf> {
        let mut volumes: Vec<_> = self.volumes.iter().map(|v| v.key().clone()).collect();
        volumes.sort();
        volumes
    }

    /// Unload every volume and invalidate all open descriptors.
    pub fn shutdown(&self) {
        self.descriptors.clear();
        self.owners.clear();
        for volume in self.volumes.iter() {
            volume.shutdown();
        }
        self.volumes.clear();
    }

    /// Find the volume that serves the given path, along with
    /// the normalized form of that path.
    fn volume_for(&self, path: &Path) -> Option<(Arc<ReadableVolume>, PathBuf)> {
        let path = crate::path::normalize(path).ok()?;
        let archive = self.owners.get(&path)?.value().clone();
        let volume = self.volumes.get(&archive)?.value().clone();
        Some((volume, path))
    }

    /// True if the path is served by any loaded volume.
    pub fn owns<P: AsRef<Path>>(&self, path: P) -> bool {
        self.volume_for(path.as_ref()).is_some()
    }

    pub fn stat_sync<P: AsRef<Path>>(&self, path: P) -> Result<Stat> {
        let path = path.as_ref();
        self.volume_for(path)
            .and_then(|(volume, path)| volume.get_from_index(path))
            .ok_or_else(|| Error::not_found("stat", path))
    }

    pub fn stat<P: AsRef<Path>>(&self, path: P) -> impl Future<Output = Result<Stat>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.stat_sync(path))
    }

    /// Same as [`Self::stat_sync`], volumes do not contain links.
    pub fn lstat_sync<P: AsRef<Path>>(&self, path: P) -> Result<Stat> {
        self.stat_sync(path)
    }

    pub fn exists_sync<P: AsRef<Path>>(&self, path: P) -> bool {
        self.stat_sync(path).is_ok()
    }

    pub async fn exists<P: AsRef<Path>>(&self, path: P) -> bool {
        tokio::task::yield_now().await;
        self.exists_sync(path)
    }

    /// The sorted names of the entries in a directory.
    pub fn readdir_sync<P: AsRef<Path>>(&self, path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        let (volume, normalized) = self
            .volume_for(path)
            .ok_or_else(|| Error::not_found("scandir", path))?;
        volume
            .get_dir_info(normalized)
            .ok_or_else(|| Error::NotADirectory {
                op: "scandir",
                path: path.to_owned(),
            })
    }

    pub fn readdir<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> impl Future<Output = Result<Vec<String>>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.readdir_sync(path))
    }

    /// Like [`Self::readdir_sync`], also reporting the kind of each entry.
    pub fn readdir_with_file_types_sync<P: AsRef<Path>>(&self, path: P) -> Result<Vec<DirEntry>> {
        let path = path.as_ref();
        let (volume, normalized) = self
            .volume_for(path)
            .ok_or_else(|| Error::not_found("scandir", path))?;
        volume
            .get_dir_entries(normalized)
            .ok_or_else(|| Error::NotADirectory {
                op: "scandir",
                path: path.to_owned(),
            })
    }

    pub fn readdir_with_file_types<P: AsRef<Path>>(
        &self,
        path: P,
    ) -> impl Future<Output = Result<Vec<DirEntry>>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.readdir_with_file_types_sync(path))
    }

    /// The normalized absolute form of a path in a loaded volume.
    pub fn realpath_sync<P: AsRef<Path>>(&self, path: P) -> Result<PathBuf> {
        let path = path.as_ref();
        self.volume_for(path)
            .and_then(|(volume, path)| volume.get_realpath(path))
            .ok_or_else(|| Error::not_found("realpath", path))
    }

    pub fn realpath<P: AsRef<Path>>(&self, path: P) -> impl Future<Output = Result<PathBuf>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.realpath_sync(path))
    }

    /// Check that the path exists and could be accessed in the given
    /// mode, a combination of [`R_OK`], [`W_OK`] and [`X_OK`] or
    /// just [`F_OK`]. Write access is always denied.
    pub fn access_sync<P: AsRef<Path>>(&self, path: P, mode: i32) -> Result<()> {
        let path = path.as_ref();
        self.stat_sync(path).map_err(|_| Error::not_found("access", path))?;
        if mode & W_OK != 0 {
            return Err(Error::PermissionDenied {
                op: "access",
                path: path.to_owned(),
            });
        }
        Ok(())
    }

    pub fn access<P: AsRef<Path>>(
        &self,
        path: P,
        mode: i32,
    ) -> impl Future<Output = Result<()>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.access_sync(path, mode))
    }

    /// The complete content of a file.
    pub fn read_file_sync<P: AsRef<Path>>(&self, path: P) -> Result<Bytes> {
        let path = path.as_ref();
        let (volume, normalized) = self
            .volume_for(path)
            .ok_or_else(|| Error::not_found("open", path))?;
        match volume.read_file_sync(&normalized)? {
            Some(content) => Ok(content),
            None if volume.get_dir_info(&normalized).is_some() => Err(Error::IsADirectory {
                op: "read",
                path: path.to_owned(),
            }),
            None => Err(Error::not_found("open", path)),
        }
    }

    pub fn read_file<P: AsRef<Path>>(&self, path: P) -> impl Future<Output = Result<Bytes>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.read_file_sync(path))
    }

    /// The complete content of a file, decoded as text.
    pub fn read_file_to_string_sync<P: AsRef<Path>>(
        &self,
        path: P,
        encoding: TextEncoding,
    ) -> Result<String> {
        let content = self.read_file_sync(path)?;
        encoding.decode(&content)
    }

    pub fn read_file_to_string<P: AsRef<Path>>(
        &self,
        path: P,
        encoding: TextEncoding,
    ) -> impl Future<Output = Result<String>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.read_file_to_string_sync(path, encoding))
    }

    /// Open a file for reading.
    ///
    /// `flags` are the usual open flags, any that would allow writing
    /// are rejected. Opening the same file again returns an equal
    /// descriptor, which stays valid until it has been closed once
    /// for every open.
    pub fn open_sync<P: AsRef<Path>>(&self, path: P, flags: i32) -> Result<FileDescriptor> {
        let path = path.as_ref();
        let (volume, normalized) = self
            .volume_for(path)
            .ok_or_else(|| Error::not_found("open", path))?;
        if flags & WRITE_FLAGS != 0 {
            return Err(Error::ReadOnlyFilesystem {
                op: "open",
                path: path.to_owned(),
            });
        }
        let stat = volume
            .get_from_index(&normalized)
            .ok_or_else(|| Error::not_found("open", path))?;
        if stat.is_directory() {
            return Err(Error::IsADirectory {
                op: "open",
                path: path.to_owned(),
            });
        }

        let fd = FileDescriptor::new(self.id, volume.mounting_root(), normalized);
        self.descriptors
            .entry(fd.id.clone())
            .and_modify(|open| open.open_count += 1)
            .or_insert_with(|| OpenFile {
                volume: volume.archive_path().to_owned(),
                path: fd.path.clone(),
                open_count: 1,
            });
        tracing::trace!(%fd, "opened");
        Ok(fd)
    }

    pub fn open<P: AsRef<Path>>(
        &self,
        path: P,
        flags: i32,
    ) -> impl Future<Output = Result<FileDescriptor>> + '_ {
        let path = path.as_ref().to_owned();
        deferred(move || self.open_sync(path, flags))
    }

    /// Resolve a descriptor to the volume that serves it.
    fn check_descriptor(
        &self,
        fd: &FileDescriptor,
        op: &'static str,
    ) -> Result<(Arc<ReadableVolume>, PathBuf)> {
        if fd.filesystem != self.id {
            return Err(Error::bad_descriptor(op, fd.id()));
        }
        let Some(open) = self.descriptors.get(&fd.id) else {
            return Err(Error::bad_descriptor(op, fd.id()));
        };
        let Some(volume) = self.volumes.get(&open.volume) else {
            return Err(Error::bad_descriptor(op, fd.id()));
        };
        Ok((volume.value().clone(), open.path.clone()))
    }

    /// Read up to `buf.len()` bytes from an open file, starting at `position`.
    ///
    /// Returns the number of bytes read, which is zero at the end of the file.
    pub fn read_sync(&self, fd: &FileDescriptor, buf: &mut [u8], position: u64) -> Result<usize> {
        let (volume, path) = self.check_descriptor(fd, "read")?;
        if buf.is_empty() {
            return Ok(0);
        }
        volume.read_sync(path, buf, position)
    }

    pub async fn read(&self, fd: &FileDescriptor, buf: &mut [u8], position: u64) -> Result<usize> {
        tokio::task::yield_now().await;
        self.read_sync(fd, buf, position)
    }

    pub fn fstat_sync(&self, fd: &FileDescriptor) -> Result<Stat> {
        let (volume, path) = self.check_descriptor(fd, "fstat")?;
        volume
            .get_from_index(&path)
            .ok_or_else(|| Error::bad_descriptor("fstat", fd.id()))
    }

    pub async fn fstat(&self, fd: &FileDescriptor) -> Result<Stat> {
        tokio::task::yield_now().await;
        self.fstat_sync(fd)
    }

    /// Release one open of the given descriptor.
    ///
    /// Once the last open of a file is released, any of its content
    /// still held in the read cache is dropped.
    pub fn close_sync(&self, fd: &FileDescriptor) -> Result<()> {
        if fd.filesystem != self.id {
            return Err(Error::bad_descriptor("close", fd.id()));
        }
        {
            let Some(mut open) = self.descriptors.get_mut(&fd.id) else {
                return Err(Error::bad_descriptor("close", fd.id()));
            };
            open.open_count = open.open_count.saturating_sub(1);
        }
        let closed = self
            .descriptors
            .remove_if(&fd.id, |_, open| open.open_count == 0);
        if let Some((_, open)) = closed {
                if let Some(volume) = self.volumes.get(&open.volume) {
                volume.release_cached(&open.path);
            }
            tracing::trace!(%fd, "closed");
        }
        Ok(())
    }

    pub async fn close(&self, fd: &FileDescriptor) -> Result<()> {
        tokio::task::yield_now().await;
        self.close_sync(fd)
    }

    /// The number of distinct files that are currently open.
    pub fn open_files(&self) -> usize {
        self.descriptors.len()
    }

    /// Create a stream over the content of a file.
    ///
    /// The file is not opened until the first chunk is requested,
    /// so a missing file is only reported then.
    pub fn create_read_stream<P: AsRef<Path>>(
        self: &Arc<Self>,
        path: P,
        options: ReadStreamOptions,
    ) -> Result<ReadStream> {
        let path = path.as_ref();
        if options.flags & WRITE_FLAGS != 0 {
            return Err(Error::ReadOnlyFilesystem {
                op: "open",
                path: path.to_owned(),
            });
        }
        ReadStream::new(Arc::clone(self), path.to_owned(), options)
    }
}
