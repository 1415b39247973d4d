// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io;
use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

use crate::encoding;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Diagnostic, Debug, Error)]
#[diagnostic(
    url(
        "https://spkenv.dev/error_codes#{}",
        self.code().unwrap_or_else(|| Box::new("sfs::generic"))
    )
)]
pub enum Error {
    #[error("{0}")]
    String(String),

    #[error("You cannot add the mounting root {0} to a static volume")]
    #[diagnostic(
        code("sfs::mounting_root_as_source"),
        help("Add the folders below the mounting root instead")
    )]
    MountingRootAsSource(PathBuf),
    #[error("{path} is not below the mounting root {root}")]
    #[diagnostic(
        code("sfs::outside_mounting_root"),
        help("All the folders added to a volume must have the mounting root as a parent")
    )]
    OutsideMountingRoot { path: PathBuf, root: PathBuf },
    #[error("Excluded path {path} is not below the mounting root {root}")]
    #[diagnostic(code("sfs::exclusion_outside_mounting_root"))]
    ExclusionOutsideMountingRoot { path: PathBuf, root: PathBuf },
    #[error("The given path {0} is not a folder")]
    #[diagnostic(code("sfs::source_not_a_directory"))]
    SourceNotADirectory(PathBuf),
    #[error("Source file changed while writing the volume: {path} (expected {expected} bytes, found {found})")]
    #[diagnostic(
        code("sfs::source_changed"),
        help("Make sure nothing modifies the source tree while a volume is being written")
    )]
    SourceChanged {
        path: PathBuf,
        expected: u64,
        found: u64,
    },
    #[error("Invalid configuration: {0}")]
    #[diagnostic(code("sfs::invalid_config"))]
    InvalidConfig(String),

    #[error("Fingerprint mismatch loading volume {volume}: stored {stored}, computed {computed}")]
    #[diagnostic(
        code("sfs::fingerprint_mismatch"),
        help("The volume index has been modified or truncated, rebuild the volume")
    )]
    FingerprintMismatch {
        volume: PathBuf,
        stored: String,
        computed: String,
    },
    #[error("Corrupt volume {0}: {1}")]
    #[diagnostic(code("sfs::corrupt_volume"))]
    CorruptVolume(PathBuf, String),
    #[error("Volume is not loaded: {0}")]
    VolumeNotLoaded(PathBuf),

    #[error("ENOENT: no such file or directory, {op} '{}'", .path.display())]
    NotFound { op: &'static str, path: PathBuf },
    #[error("EISDIR: illegal operation on a directory, {op} '{}'", .path.display())]
    IsADirectory { op: &'static str, path: PathBuf },
    #[error("ENOTDIR: not a directory, {op} '{}'", .path.display())]
    NotADirectory { op: &'static str, path: PathBuf },
    #[error("EBADF: bad file descriptor, {op} {id}")]
    BadDescriptor { op: &'static str, id: String },
    #[error("EROFS: static filesystem is read-only, {op} '{}'", .path.display())]
    ReadOnlyFilesystem { op: &'static str, path: PathBuf },
    #[error("EACCES: permission denied, {op} '{}'", .path.display())]
    PermissionDenied { op: &'static str, path: PathBuf },
    #[error("Invalid stream range: start ({start}) must be <= end ({end})")]
    InvalidStreamRange { start: u64, end: u64 },
    #[error("Cannot decode file contents as {encoding}: {reason}")]
    InvalidTextEncoding {
        encoding: &'static str,
        reason: String,
    },

    #[error("Storage read error from {0} at {1}")]
    StorageReadError(&'static str, PathBuf, #[source] io::Error),
    #[error("Storage write error from {0} at {1}")]
    StorageWriteError(&'static str, PathBuf, #[source] io::Error),
    #[error("Invalid path {0}")]
    InvalidPath(PathBuf, #[source] io::Error),

    #[error(transparent)]
    #[diagnostic(forward(0))]
    Encoding(#[from] encoding::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// True if this error is the "no such entry" outcome of a lookup.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub(crate) fn not_found(op: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::NotFound {
            op,
            path: path.into(),
        }
    }

    pub(crate) fn bad_descriptor(op: &'static str, id: impl Into<String>) -> Self {
        Self::BadDescriptor { op, id: id.into() }
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::String(err)
    }
}

impl From<&str> for Error {
    fn from(err: &str) -> Self {
        Self::String(err.to_string())
    }
}

/// An error that may be represented as an OS error number.
pub trait OsError {
    /// The errno that best describes this error, if any.
    fn os_error(&self) -> Option<i32>;
}

impl OsError for io::Error {
    fn os_error(&self) -> Option<i32> {
        match self.raw_os_error() {
            Some(errno) => Some(errno),
            None => match self.kind() {
                io::ErrorKind::UnexpectedEof => Some(libc::EOF),
                io::ErrorKind::NotFound => Some(libc::ENOENT),
                _ => None,
            },
        }
    }
}

impl OsError for Error {
    fn os_error(&self) -> Option<i32> {
        match self {
            Self::NotFound { .. } => Some(libc::ENOENT),
            Self::IsADirectory { .. } => Some(libc::EISDIR),
            Self::NotADirectory { .. } => Some(libc::ENOTDIR),
            Self::BadDescriptor { .. } => Some(libc::EBADF),
            Self::ReadOnlyFilesystem { .. } => Some(libc::EROFS),
            Self::PermissionDenied { .. } => Some(libc::EACCES),
            Self::InvalidStreamRange { .. } => Some(libc::EINVAL),
            Self::StorageReadError(_, _, err) => err.os_error(),
            Self::StorageWriteError(_, _, err) => err.os_error(),
            Self::InvalidPath(_, err) => err.os_error(),
            _ => None,
        }
    }
}
