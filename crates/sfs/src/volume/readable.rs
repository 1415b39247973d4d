// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use arc_swap::ArcSwapOption;
use bytes::{Bytes, BytesMut};
use relative_path::RelativePathBuf;

use super::cache::ReadCache;
use super::format;
use super::index::{parse_stored_path, DirectoryEntry, FileEntry, Index, IndexFile};
use super::read_exact_at;
use crate::config::Layout;
use crate::encoding::Fingerprint;
use crate::stat::{DirEntry, EntryKind, Stat, VolumeStats};
use crate::{Error, Result};

#[cfg(test)]
#[path = "./readable_test.rs"]
mod readable_test;

/// A volume archive opened for reading.
///
/// Nothing is read from disk until [`ReadableVolume::load`] is called,
/// and all queries answer as if the volume were empty until then.
/// Queries take absolute paths, which are resolved against the
/// mounting root: the parent of the directory holding the archive.
#[derive(Debug)]
pub struct ReadableVolume {
    archive_path: PathBuf,
    index_path: PathBuf,
    mounting_root: PathBuf,
    state: ArcSwapOption<LoadedVolume>,
    // serializes load and shutdown
    lifecycle: Mutex<()>,
}

#[derive(Debug)]
struct LoadedVolume {
    file: File,
    fingerprint: Fingerprint,
    stats: VolumeStats,
    files: BTreeMap<RelativePathBuf, FileEntry>,
    directories: BTreeMap<RelativePathBuf, DirectoryEntry>,
    cache: ReadCache,
}

impl ReadableVolume {
    /// Open the archive at the given path, using the default layout
    /// to find its sidecar index.
    pub fn new<P: AsRef<Path>>(archive_path: P) -> Result<Self> {
        Self::with_layout(archive_path, &Layout::default())
    }

    pub fn with_layout<P: AsRef<Path>>(archive_path: P, layout: &Layout) -> Result<Self> {
        let archive_path = crate::path::normalize(archive_path)?;
        let Some(mounting_root) = archive_path.parent().and_then(Path::parent) else {
            return Err(Error::InvalidConfig(format!(
                "volume {} must be in a folder below its mounting root",
                archive_path.display()
            )));
        };
        Ok(Self {
            index_path: archive_path.with_file_name(&layout.index_file),
            mounting_root: mounting_root.to_owned(),
            archive_path,
            state: ArcSwapOption::empty(),
            lifecycle: Mutex::new(()),
        })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive_path
    }

    pub fn mounting_root(&self) -> &Path {
        &self.mounting_root
    }

    pub fn is_loaded(&self) -> bool {
        self.state.load().is_some()
    }

    /// Open the archive, read its index and verify the fingerprint.
    ///
    /// Loading an already loaded volume does nothing.
    pub fn load(&self) -> Result<()> {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if self.is_loaded() {
            return Ok(());
        }
        let loaded = self.open()?;
        tracing::debug!(
            volume = %self.archive_path.display(),
            files = loaded.files.len(),
            directories = loaded.directories.len(),
            "loaded volume"
        );
        self.state.store(Some(Arc::new(loaded)));
        Ok(())
    }

    fn open(&self) -> Result<LoadedVolume> {
        let file = File::open(&self.archive_path).map_err(|err| {
            Error::StorageReadError("open on volume", self.archive_path.clone(), err)
        })?;
        let meta = file.metadata().map_err(|err| {
            Error::StorageReadError("metadata on volume", self.archive_path.clone(), err)
        })?;
        let archive_len = meta.len();
        let header = format::read_header(BufReader::new(&file), archive_len)
            .map_err(|reason| Error::CorruptVolume(self.archive_path.clone(), reason))?;

        let (mut index, stats) = match header.inline {
            Some(inline) => {
                let mut index = Index::default();
                for path in inline.directories {
                    index.insert_directory(parse_stored_path(&self.archive_path, path.as_str())?);
                }
                for mut entry in inline.files {
                    entry.path = parse_stored_path(&self.archive_path, entry.path.as_str())?;
                    index.insert_file(entry);
                }
                (index, VolumeStats::from_metadata(&meta))
            }
            None if self.index_path.exists() => {
                let sidecar = IndexFile::load(&self.index_path)?;
                let stats = sidecar.volume_stats.clone();
                (Index::from_sidecar(&self.archive_path, sidecar)?, stats)
            }
            None => {
                tracing::debug!(
                    index = %self.index_path.display(),
                    "no index file, volume is empty"
                );
                (Index::default(), VolumeStats::from_metadata(&meta))
            }
        };
        index.link_ancestors();

        let computed = index.fingerprint()?;
        if computed != header.fingerprint {
            return Err(Error::FingerprintMismatch {
                volume: self.archive_path.clone(),
                stored: header.fingerprint.to_string(),
                computed: computed.to_string(),
            });
        }

        for entry in index.files.values() {
            let in_bounds = entry.offset >= header.data_offset
                && entry
                    .offset
                    .checked_add(entry.size)
                    .is_some_and(|end| end <= archive_len);
            if !in_bounds {
                return Err(Error::CorruptVolume(
                    self.archive_path.clone(),
                    format!(
                        "{} spans {}+{} outside of the packed data",
                        entry.path, entry.offset, entry.size
                    ),
                ));
            }
        }

        Ok(LoadedVolume {
            file,
            fingerprint: header.fingerprint,
            stats,
            files: index.files,
            directories: index.directories,
            cache: ReadCache::default(),
        })
    }

    /// Release the open archive and forget the index.
    ///
    /// Reads already in progress complete against the released
    /// state. The volume can be loaded again afterwards.
    pub fn shutdown(&self) {
        let _guard = self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(loaded) = self.state.swap(None) {
            loaded.cache.clear();
            tracing::debug!(volume = %self.archive_path.display(), "volume shut down");
        }
    }

    fn loaded(&self) -> Option<Arc<LoadedVolume>> {
        self.state.load_full()
    }

    fn relative(&self, path: &Path) -> Option<RelativePathBuf> {
        let path = crate::path::normalize(path).ok()?;
        crate::path::to_relative(&self.mounting_root, &path)
    }

    /// The fingerprint stored in the archive, once loaded.
    pub fn fingerprint(&self) -> Option<Fingerprint> {
        self.loaded().map(|l| l.fingerprint.clone())
    }

    /// True if the path names a file or directory in this volume.
    pub fn contains<P: AsRef<Path>>(&self, path: P) -> bool {
        self.get_from_index(path).is_some()
    }

    /// Every path in this volume, files and directories, in absolute form.
    pub fn paths(&self) -> Vec<PathBuf> {
        let Some(loaded) = self.loaded() else {
            return Vec::new();
        };
        loaded
            .directories
            .keys()
            .chain(loaded.files.keys())
            .map(|rel| crate::path::to_absolute(&self.mounting_root, rel))
            .collect()
    }

    /// Stat the given path, if it is part of this volume.
    pub fn get_from_index<P: AsRef<Path>>(&self, path: P) -> Option<Stat> {
        let loaded = self.loaded()?;
        let rel = self.relative(path.as_ref())?;
        if let Some(file) = loaded.files.get(&rel) {
            return Some(Stat::file(&loaded.stats, file.offset, file.size));
        }
        let dir = loaded.directories.get(&rel)?;
        Some(Stat::directory(&loaded.stats, dir.children.len()))
    }

    /// The sorted names of the children of a directory in this volume.
    pub fn get_dir_info<P: AsRef<Path>>(&self, path: P) -> Option<Vec<String>> {
        let loaded = self.loaded()?;
        let rel = self.relative(path.as_ref())?;
        let dir = loaded.directories.get(&rel)?;
        Some(dir.children.iter().cloned().collect())
    }

    /// Like [`Self::get_dir_info`], including the kind of each child.
    pub fn get_dir_entries<P: AsRef<Path>>(&self, path: P) -> Option<Vec<DirEntry>> {
        let loaded = self.loaded()?;
        let rel = self.relative(path.as_ref())?;
        let dir = loaded.directories.get(&rel)?;
        let entries = dir
            .children
            .iter()
            .map(|name| {
                let child = rel.join(name);
                let kind = if loaded.directories.contains_key(&child) {
                    EntryKind::Directory
                } else {
                    EntryKind::File
                };
                DirEntry {
                    name: name.clone(),
                    kind,
                }
            })
            .collect();
        Some(entries)
    }

    /// The normalized absolute form of a path in this volume.
    pub fn get_realpath<P: AsRef<Path>>(&self, path: P) -> Option<PathBuf> {
        let loaded = self.loaded()?;
        let rel = self.relative(path.as_ref())?;
        if !loaded.files.contains_key(&rel) && !loaded.directories.contains_key(&rel) {
            return None;
        }
        Some(crate::path::to_absolute(&self.mounting_root, &rel))
    }

    /// Read the entire content of a file, bypassing the read cache.
    ///
    /// Returns `Ok(None)` when the path is not a file in this volume.
    pub fn read_file_sync<P: AsRef<Path>>(&self, path: P) -> Result<Option<Bytes>> {
        let Some(loaded) = self.loaded() else {
            return Ok(None);
        };
        let Some(rel) = self.relative(path.as_ref()) else {
            return Ok(None);
        };
        let Some(file) = loaded.files.get(&rel) else {
            return Ok(None);
        };
        self.read_entry(&loaded, file).map(Some)
    }

    /// Read up to `buf.len()` bytes of a file starting at `position`.
    ///
    /// Reads are served through a shared whole-file buffer so that a
    /// file streamed in many chunks is only read from disk once.
    pub fn read_sync<P: AsRef<Path>>(
        &self,
        path: P,
        buf: &mut [u8],
        position: u64,
    ) -> Result<usize> {
        let path = path.as_ref();
        let loaded = self
            .loaded()
            .ok_or_else(|| Error::VolumeNotLoaded(self.archive_path.clone()))?;
        let rel = self
            .relative(path)
            .ok_or_else(|| Error::not_found("read", path))?;
        let Some(file) = loaded.files.get(&rel) else {
            if loaded.directories.contains_key(&rel) {
                return Err(Error::IsADirectory {
                    op: "read",
                    path: path.to_owned(),
                });
            }
            return Err(Error::not_found("read", path));
        };
        loaded
            .cache
            .read(&rel, file.size, buf, position, || self.read_entry(&loaded, file))
    }

    fn read_entry(&self, loaded: &LoadedVolume, file: &FileEntry) -> Result<Bytes> {
        let mut buffer = BytesMut::zeroed(file.size as usize);
        read_exact_at(&loaded.file, &mut buffer, file.offset).map_err(|err| {
            Error::StorageReadError("read_at on volume", self.archive_path.clone(), err)
        })?;
        Ok(buffer.freeze())
    }

    /// Drop the cached content of a file unless it is being read.
    pub fn release_cached<P: AsRef<Path>>(&self, path: P) -> bool {
        let Some(loaded) = self.loaded() else {
            return false;
        };
        self.relative(path.as_ref())
            .is_some_and(|rel| loaded.cache.evict_idle(&rel))
    }

    /// The number of files currently held in the read cache.
    pub fn cached_files(&self) -> usize {
        self.loaded().map(|l| l.cache.len()).unwrap_or_default()
    }

    pub fn is_cached<P: AsRef<Path>>(&self, path: P) -> bool {
        let Some(loaded) = self.loaded() else {
            return false;
        };
        self.relative(path.as_ref())
            .is_some_and(|rel| loaded.cache.contains(&rel))
    }
}
