// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

const S_IFMT: u32 = 0o170000;
const S_IFREG: u32 = 0o100000;
const S_IFDIR: u32 = 0o040000;

/// The kind of entry that a path in a volume refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    File,
    Directory,
}

/// A snapshot of the on-disk metadata of a volume archive.
///
/// Every entry served from the volume inherits its ownership,
/// permissions and timestamps from this snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeStats {
    pub dev: u64,
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub birthtime: DateTime<Utc>,
}

impl VolumeStats {
    pub fn from_metadata(meta: &std::fs::Metadata) -> Self {
        let time = |t: std::io::Result<std::time::SystemTime>| {
            t.map(DateTime::<Utc>::from).unwrap_or_default()
        };
        let mtime = time(meta.modified());
        let mut stats = Self {
            size: meta.len(),
            atime: time(meta.accessed()),
            mtime,
            ctime: mtime,
            birthtime: time(meta.created()),
            mode: if meta.permissions().readonly() {
                0o444
            } else {
                0o644
            },
            nlink: 1,
            ..Default::default()
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::MetadataExt;
            stats.dev = meta.dev();
            stats.ino = meta.ino();
            stats.mode = meta.mode();
            stats.nlink = meta.nlink();
            stats.uid = meta.uid();
            stats.gid = meta.gid();
            if let Some(ctime) = DateTime::from_timestamp(meta.ctime(), meta.ctime_nsec() as u32) {
                stats.ctime = ctime;
            }
        }
        stats
    }
}

/// Information about a single entry in a volume, in the
/// shape of a conventional filesystem stat call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stat {
    pub kind: EntryKind,
    pub dev: u64,
    /// For files, the byte offset of the content within the archive
    pub ino: u64,
    pub mode: u32,
    pub nlink: u64,
    pub uid: u32,
    pub gid: u32,
    /// The content length for files, and the number of children for directories
    pub size: u64,
    pub blksize: u64,
    pub blocks: u64,
    pub atime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
    pub birthtime: DateTime<Utc>,
}

impl Stat {
    // establish a block size to report - the volume is one
    // contiguous file so this is only a realistic value
    // for commands to use (eg du)
    pub const BLOCK_SIZE: u64 = 512;

    pub(crate) fn file(stats: &VolumeStats, offset: u64, size: u64) -> Self {
        let perm = stats.mode & !S_IFMT;
        Self::new(stats, EntryKind::File, S_IFREG | perm, offset, size, 1)
    }

    pub(crate) fn directory(stats: &VolumeStats, children: usize) -> Self {
        let perm = stats.mode & !S_IFMT;
        // directories are searchable wherever they are readable
        let perm = perm | ((perm & 0o444) >> 2);
        Self::new(
            stats,
            EntryKind::Directory,
            S_IFDIR | perm,
            stats.ino,
            children as u64,
            2,
        )
    }

    fn new(
        stats: &VolumeStats,
        kind: EntryKind,
        mode: u32,
        ino: u64,
        size: u64,
        nlink: u64,
    ) -> Self {
        Self {
            kind,
            dev: stats.dev,
            ino,
            mode,
            nlink,
            uid: stats.uid,
            gid: stats.gid,
            size,
            blksize: Self::BLOCK_SIZE,
            blocks: (size / Self::BLOCK_SIZE) + 1,
            atime: stats.atime,
            mtime: stats.mtime,
            ctime: stats.ctime,
            birthtime: stats.birthtime,
        }
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Volumes never contain links, this is always false.
    pub fn is_symbolic_link(&self) -> bool {
        false
    }
}

/// A named entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct DirEntry {
    pub name: String,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}
