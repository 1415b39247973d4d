// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! The binary header at the start of every volume archive.
//!
//! ```text
//! [fingerprint_len][fingerprint][inline_index_len][inline entries...][file data...]
//! ```
//!
//! Integers are fixed-width big-endian (see [`crate::encoding::INT_SIZE`]).
//! Each inline entry starts with its kind. A file is
//! `[0][size][name_len][name]` and a directory is `[1][name_len][name]`.
//! Files appear in packing order, so that offsets can be recovered by
//! summing sizes from the end of the header. An inline index length of
//! zero means the index only lives in the sidecar file.

use std::io::{Read, Write};

use relative_path::{RelativePath, RelativePathBuf};

use crate::encoding::{self, Fingerprint, INT_SIZE};
use crate::volume::FileEntry;
use crate::Result;

#[cfg(test)]
#[path = "./format_test.rs"]
mod format_test;

const FILE_ENTRY: u64 = 0;
const DIRECTORY_ENTRY: u64 = 1;

/// One entry of an inline index, as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum InlineEntry<'a> {
    File { path: &'a RelativePath, size: u64 },
    Directory { path: &'a RelativePath },
}

/// The decoded header of an archive.
#[derive(Debug)]
pub(crate) struct Header {
    pub fingerprint: Fingerprint,
    /// The inline index, if the archive has one
    pub inline: Option<InlineIndex>,
    /// The byte offset at which packed file data begins
    pub data_offset: u64,
}

#[derive(Debug, Default)]
pub(crate) struct InlineIndex {
    pub files: Vec<FileEntry>,
    pub directories: Vec<RelativePathBuf>,
}

/// Encode an archive header.
///
/// When `inline` is empty, no inline index is written and the
/// inline index length is zero.
pub(crate) fn encode_header(
    fingerprint: &Fingerprint,
    inline: &[InlineEntry<'_>],
) -> Result<Vec<u8>> {
    let mut entries = Vec::new();
    for entry in inline {
        match entry {
            InlineEntry::File { path, size } => {
                encoding::write_int(&mut entries, FILE_ENTRY)?;
                encoding::write_int(&mut entries, *size)?;
                encoding::write_string(&mut entries, path.as_str())?;
            }
            InlineEntry::Directory { path } => {
                encoding::write_int(&mut entries, DIRECTORY_ENTRY)?;
                encoding::write_string(&mut entries, path.as_str())?;
            }
        }
    }

    let mut header = Vec::with_capacity(INT_SIZE * 2 + fingerprint.len() + entries.len());
    encoding::write_string(&mut header, fingerprint.as_str())?;
    encoding::write_int(&mut header, entries.len() as u64)?;
    header.write_all(&entries).map_err(encoding::Error::FailedWrite)?;
    Ok(header)
}

/// Decode the header of an archive that is `archive_len` bytes long.
///
/// A malformed header is described in the returned error string,
/// for the caller to report against the volume.
pub(crate) fn read_header(
    mut reader: impl Read,
    archive_len: u64,
) -> std::result::Result<Header, String> {
    let fingerprint = encoding::read_string(&mut reader)
        .map_err(|err| format!("unreadable fingerprint: {err}"))?;
    let inline_len =
        encoding::read_int(&mut reader).map_err(|err| format!("unreadable index length: {err}"))?;
    let data_offset = (INT_SIZE * 2 + fingerprint.len()) as u64 + inline_len;
    if data_offset > archive_len {
        return Err(format!(
            "header claims {data_offset} bytes but the archive is only {archive_len}"
        ));
    }

    let fingerprint = Fingerprint::from(fingerprint);
    if inline_len == 0 {
        return Ok(Header {
            fingerprint,
            inline: None,
            data_offset,
        });
    }

    let mut block = Vec::with_capacity(inline_len as usize);
    reader
        .take(inline_len)
        .read_to_end(&mut block)
        .map_err(|err| format!("unreadable inline index: {err}"))?;
    if block.len() as u64 != inline_len {
        return Err("inline index is truncated".to_string());
    }

    let mut index = InlineIndex::default();
    let mut remaining = block.as_slice();
    let mut offset = data_offset;
    while !remaining.is_empty() {
        let kind = encoding::read_int(&mut remaining)
            .map_err(|err| format!("unreadable inline entry kind: {err}"))?;
        match kind {
            FILE_ENTRY => {
                let size = encoding::read_int(&mut remaining)
                    .map_err(|err| format!("unreadable inline entry size: {err}"))?;
                let name = encoding::read_string(&mut remaining)
                    .map_err(|err| format!("unreadable inline entry name: {err}"))?;
                index.files.push(FileEntry {
                    path: RelativePathBuf::from(name),
                    offset,
                    size,
                });
                offset = offset
                    .checked_add(size)
                    .ok_or_else(|| "inline entry sizes overflow".to_string())?;
            }
            DIRECTORY_ENTRY => {
                let name = encoding::read_string(&mut remaining)
                    .map_err(|err| format!("unreadable inline directory name: {err}"))?;
                index.directories.push(RelativePathBuf::from(name));
            }
            other => return Err(format!("unknown inline entry kind {other}")),
        }
    }

    Ok(Header {
        fingerprint,
        inline: Some(index),
        data_offset,
    })
}
