// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Packing folders into volume archives and reading them back.

mod cache;
mod format;
mod index;
mod readable;
mod writable;

use std::fs::File;
use std::io;

pub use index::{DirectoryEntry, FileEntry, IndexFile, IndexedFile, Manifest};
pub use readable::ReadableVolume;
pub use writable::WritableVolume;

/// Fill `buf` from the file starting at `offset`, without
/// moving any shared cursor.
pub(crate) fn read_exact_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<()> {
    let mut consumed = 0;
    while consumed < buf.len() {
        match read_at(file, &mut buf[consumed..], offset + consumed as u64) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(count) => consumed += count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

#[cfg(unix)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::unix::fs::FileExt::read_at(file, buf, offset)
}

#[cfg(windows)]
fn read_at(file: &File, buf: &mut [u8], offset: u64) -> io::Result<usize> {
    std::os::windows::fs::FileExt::seek_read(file, buf, offset)
}
