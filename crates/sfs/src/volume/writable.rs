// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use relative_path::{RelativePath, RelativePathBuf};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::format::{self, InlineEntry};
use super::index::{DirectoryEntry, FileEntry, IndexFile, Manifest};
use crate::config::{Config, IndexEncoding};
use crate::encoding::Fingerprint;
use crate::path::{ancestors, is_strict_descendant, normalize, to_absolute, to_relative};
use crate::stat::VolumeStats;
use crate::{Error, Result};

#[cfg(test)]
#[path = "./writable_test.rs"]
mod writable_test;

/// Collects folders below a mounting root and packs
/// them into a single volume archive.
#[derive(Debug)]
pub struct WritableVolume {
    mounting_root: PathBuf,
    config: Config,
    files: BTreeMap<RelativePathBuf, SourceFile>,
    directories: BTreeMap<RelativePathBuf, DirectoryEntry>,
    /// Directories that are only recorded to link an added
    /// folder to the root, and were not added themselves
    linking: BTreeSet<RelativePathBuf>,
}

#[derive(Debug)]
struct SourceFile {
    source: PathBuf,
    size: u64,
}

impl WritableVolume {
    pub fn new<P: AsRef<Path>>(mounting_root: P) -> Result<Self> {
        Self::with_config(mounting_root, Config::default())
    }

    pub fn with_config<P: AsRef<Path>>(mounting_root: P, config: Config) -> Result<Self> {
        config.validate()?;
        let mut volume = Self {
            mounting_root: normalize(mounting_root)?,
            config,
            files: Default::default(),
            directories: Default::default(),
            linking: Default::default(),
        };
        volume.reset();
        Ok(volume)
    }

    pub fn mounting_root(&self) -> &Path {
        &self.mounting_root
    }

    pub fn volume_path(&self) -> PathBuf {
        self.config.layout.volume_path(&self.mounting_root)
    }

    pub fn index_path(&self) -> PathBuf {
        self.config.layout.index_path(&self.mounting_root)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.config.layout.manifest_path(&self.mounting_root)
    }

    /// Forget every folder that has been added so far.
    pub fn reset(&mut self) {
        self.files.clear();
        self.directories.clear();
        self.linking.clear();
        let root = RelativePathBuf::new();
        self.linking.insert(root.clone());
        self.directories.insert(root.clone(), DirectoryEntry::new(root));
    }

    /// Recursively record the contents of a folder below the mounting root.
    ///
    /// Paths in `exclusions` are skipped along with everything below
    /// them. An excluded source folder is itself still recorded, but
    /// empty. Files with the native module extension are not packed,
    /// and instead flag their directory as having native modules.
    pub async fn add_folder<P: AsRef<Path>>(
        &mut self,
        source: P,
        exclusions: &HashSet<PathBuf>,
    ) -> Result<()> {
        let source = normalize(source)?;
        if source == self.mounting_root {
            return Err(Error::MountingRootAsSource(source));
        }
        if !is_strict_descendant(&self.mounting_root, &source) {
            return Err(Error::OutsideMountingRoot {
                path: source,
                root: self.mounting_root.clone(),
            });
        }
        let mut excluded = HashSet::with_capacity(exclusions.len());
        for path in exclusions {
            let path = normalize(path)?;
            if !is_strict_descendant(&self.mounting_root, &path) {
                return Err(Error::ExclusionOutsideMountingRoot {
                    path,
                    root: self.mounting_root.clone(),
                });
            }
            excluded.insert(path);
        }
        let Some(source_rel) = to_relative(&self.mounting_root, &source) else {
            return Err(Error::OutsideMountingRoot {
                path: source,
                root: self.mounting_root.clone(),
            });
        };

        let meta = tokio::fs::metadata(&source)
            .await
            .map_err(|err| Error::StorageReadError("metadata on source folder", source.clone(), err))?;
        if !meta.is_dir() {
            return Err(Error::SourceNotADirectory(source));
        }

        self.link_to_root(&source_rel);
        self.linking.remove(&source_rel);
        self.directories
            .entry(source_rel.clone())
            .or_insert_with(|| DirectoryEntry::new(source_rel.clone()));
        if excluded.contains(&source) {
            tracing::debug!(folder = %source.display(), "folder is excluded, recorded as empty");
            return Ok(());
        }

        let files_before = self.files.len();
        let mut to_visit = vec![(source.clone(), source_rel)];
        while let Some((dir, dir_rel)) = to_visit.pop() {
            let mut entries = Vec::new();
            let mut read_dir = tokio::fs::read_dir(&dir)
                .await
                .map_err(|err| Error::StorageReadError("read_dir on source folder", dir.clone(), err))?;
            while let Some(entry) = read_dir
                .next_entry()
                .await
                .map_err(|err| Error::StorageReadError("next_entry on source folder", dir.clone(), err))?
            {
                entries.push(entry.path());
            }
            entries.sort();

            for path in entries {
                if excluded.contains(&path) {
                    tracing::trace!(path = %path.display(), "excluded");
                    continue;
                }
                let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                    tracing::warn!(path = %path.display(), "skipping path that is not valid unicode");
                    continue;
                };
                let name = name.to_string();
                let rel = dir_rel.join(&name);

                let meta = match tokio::fs::symlink_metadata(&path).await {
                    Ok(meta) => meta,
                    Err(err) => {
                        tracing::warn!(path = %path.display(), %err, "skipping unreadable entry");
                        continue;
                    }
                };

                if meta.file_type().is_symlink() {
                    tracing::debug!(path = %path.display(), "skipping symlink");
                } else if meta.is_dir() {
                    self.child_of(&dir_rel).insert(name);
                    self.linking.remove(&rel);
                    self.directories
                        .entry(rel.clone())
                        .or_insert_with(|| DirectoryEntry::new(rel.clone()));
                    to_visit.push((path, rel));
                } else if !meta.is_file() {
                    tracing::debug!(path = %path.display(), "skipping special file");
                } else if name.ends_with(&self.config.volume.native_extension) {
                    tracing::debug!(path = %path.display(), "native module left out of volume");
                    self.directory(&dir_rel).has_native_modules = true;
                } else {
                    self.child_of(&dir_rel).insert(name);
                    self.files.insert(
                        rel,
                        SourceFile {
                            source: path,
                            size: meta.len(),
                        },
                    );
                }
            }
        }

        tracing::debug!(
            folder = %source.display(),
            files = self.files.len() - files_before,
            "added folder"
        );
        Ok(())
    }

    fn directory(&mut self, path: &RelativePath) -> &mut DirectoryEntry {
        self.directories
            .entry(path.to_owned())
            .or_insert_with(|| DirectoryEntry::new(path.to_owned()))
    }

    fn child_of(&mut self, path: &RelativePath) -> &mut BTreeSet<String> {
        &mut self.directory(path).children
    }

    /// Record each ancestor of the given directory, so that it can
    /// be reached by listing directories from the root.
    fn link_to_root(&mut self, path: &RelativePath) {
        let mut child = path;
        for parent in ancestors(path) {
            let Some(name) = child.file_name() else {
                break;
            };
            if !self.directories.contains_key(parent) {
                self.linking.insert(parent.to_owned());
            }
            self.child_of(parent).insert(name.to_string());
            child = parent;
        }
    }

    /// The fingerprint of everything added so far.
    pub fn fingerprint(&self) -> Result<Fingerprint> {
        Ok(Fingerprint::from_paths(self.files.keys().map(|p| p.as_str()))?)
    }

    /// Pack every recorded file into the archive, then write
    /// the sidecar index and manifest next to it.
    ///
    /// The archive is written to a temporary file and only renamed
    /// into place once complete.
    pub async fn write(&mut self) -> Result<Fingerprint> {
        let volume_dir = self.config.layout.volume_dir(&self.mounting_root);
        tokio::fs::create_dir_all(&volume_dir)
            .await
            .map_err(|err| Error::StorageWriteError("create_dir_all on volume dir", volume_dir, err))?;

        let fingerprint = self.fingerprint()?;
        let inline: Vec<InlineEntry<'_>> = match self.config.volume.index_encoding {
            IndexEncoding::Inline => {
                let directories = self.directories.keys().map(|path| InlineEntry::Directory {
                    path: path.as_relative_path(),
                });
                let files = self.files.iter().map(|(path, file)| InlineEntry::File {
                    path: path.as_relative_path(),
                    size: file.size,
                });
                directories.chain(files).collect()
            }
            IndexEncoding::Sidecar => Vec::new(),
        };
        let header = format::encode_header(&fingerprint, &inline)?;

        let mut offset = header.len() as u64;
        let mut entries = Vec::with_capacity(self.files.len());
        for (path, file) in self.files.iter() {
            entries.push(FileEntry {
                path: path.clone(),
                offset,
                size: file.size,
            });
            offset += file.size;
        }

        let volume_path = self.volume_path();
        let working_file = with_suffix(&volume_path, ".partial");
        if let Err(err) = self.write_archive(&working_file, &header).await {
            if let Err(err) = tokio::fs::remove_file(&working_file).await {
                tracing::warn!(path = %working_file.display(), %err, "failed to clean up partial volume");
            }
            return Err(err);
        }
        tokio::fs::rename(&working_file, &volume_path)
            .await
            .map_err(|err| Error::StorageWriteError("rename on volume", volume_path.clone(), err))?;

        let meta = tokio::fs::metadata(&volume_path)
            .await
            .map_err(|err| Error::StorageReadError("metadata on volume", volume_path.clone(), err))?;
        let index = IndexFile::new(&entries, &self.directories, VolumeStats::from_metadata(&meta));
        let index_path = self.index_path();
        tokio::fs::write(&index_path, serde_json::to_vec(&index)?)
            .await
            .map_err(|err| Error::StorageWriteError("write on index file", index_path, err))?;

        let manifest_path = self.manifest_path();
        let manifest = Manifest {
            manifest: self.config.layout.manifest_file.clone(),
            mounting_root: self.mounting_root.clone(),
            hash: fingerprint.clone(),
            volume: volume_path.clone(),
            directories: Manifest::directories_of(self.directories.keys().map(|p| p.as_relative_path())),
            files: self.files.keys().map(|p| p.to_string()).collect(),
        };
        tokio::fs::write(&manifest_path, serde_json::to_vec_pretty(&manifest)?)
            .await
            .map_err(|err| Error::StorageWriteError("write on manifest file", manifest_path, err))?;

        tracing::info!(
            volume = %volume_path.display(),
            files = entries.len(),
            size = offset,
            %fingerprint,
            "volume written"
        );
        Ok(fingerprint)
    }

    async fn write_archive(&self, working_file: &Path, header: &[u8]) -> Result<()> {
        let write_err =
            |err| Error::StorageWriteError("write on volume", working_file.to_owned(), err);
        let file = tokio::fs::File::create(working_file).await.map_err(write_err)?;
        let mut writer = tokio::io::BufWriter::new(file);
        writer.write_all(header).await.map_err(write_err)?;

        for file in self.files.values() {
            let source = tokio::fs::File::open(&file.source)
                .await
                .map_err(|err| Error::StorageReadError("open on source file", file.source.clone(), err))?;
            // read one extra byte so that growth is noticed too
            let mut limited = source.take(file.size + 1);
            let copied = tokio::io::copy(&mut limited, &mut writer)
                .await
                .map_err(|err| Error::StorageReadError("copy from source file", file.source.clone(), err))?;
            if copied != file.size {
                return Err(Error::SourceChanged {
                    path: file.source.clone(),
                    expected: file.size,
                    found: copied,
                });
            }
        }

        writer.flush().await.map_err(write_err)?;
        writer.get_ref().sync_all().await.map_err(write_err)?;
        Ok(())
    }

    /// Every file and directory that was packed into the volume,
    /// in absolute form, ordered so that entries come before
    /// their parent directories.
    ///
    /// Directories holding native modules, and their ancestors,
    /// are left out since they must remain on disk. Directories
    /// that were only recorded to link added folders to the root
    /// are left out too.
    ///
    /// Paths are compared component by component rather than as
    /// strings, so `a/b` sorts below a sibling `a-c` even though
    /// `-` is the smaller byte.
    pub fn get_added_files_and_folders(&self) -> Vec<PathBuf> {
        let mut kept = BTreeSet::new();
        for (path, dir) in self.directories.iter() {
            if !dir.has_native_modules {
                continue;
            }
            kept.insert(path.as_relative_path());
            kept.extend(ancestors(path));
        }

        let folders = self
            .directories
            .keys()
            .filter(|path| !self.linking.contains(*path))
            .filter(|path| !kept.contains(path.as_relative_path()));
        let mut added: Vec<PathBuf> = self
            .files
            .keys()
            .chain(folders)
            .map(|rel| to_absolute(&self.mounting_root, rel))
            .collect();
        added.sort_by(|a, b| b.cmp(a));
        added
    }
}

fn with_suffix(volume_path: &Path, suffix: &str) -> PathBuf {
    let mut name = volume_path.file_name().unwrap_or_default().to_os_string();
    name.push(suffix);
    volume_path.with_file_name(name)
}
