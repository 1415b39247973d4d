// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io::{Read, Write};

use crate::{Error, Result};

/// The number of bytes used by every integer field in a volume.
pub const INT_SIZE: usize = 6;

/// The largest value that can be stored in an integer field.
pub const MAX_INT: u64 = (1 << (INT_SIZE * 8)) - 1;

const PAD: usize = std::mem::size_of::<u64>() - INT_SIZE;

#[cfg(test)]
#[path = "./binary_test.rs"]
mod binary_test;

/// Encode an integer into its 48-bit big-endian form.
pub fn encode_int(value: u64) -> Result<[u8; INT_SIZE]> {
    if value > MAX_INT {
        return Err(Error::IntOverflow(value));
    }
    let wide = value.to_be_bytes();
    let mut buf = [0; INT_SIZE];
    buf.copy_from_slice(&wide[PAD..]);
    Ok(buf)
}

/// Decode a 48-bit big-endian integer.
pub fn decode_int(buf: &[u8; INT_SIZE]) -> u64 {
    let mut wide = [0; std::mem::size_of::<u64>()];
    wide[PAD..].copy_from_slice(buf);
    u64::from_be_bytes(wide)
}

/// Write an integer to the given binary stream.
pub fn write_int(mut writer: impl Write, value: u64) -> Result<()> {
    writer
        .write_all(&encode_int(value)?)
        .map_err(Error::FailedWrite)
}

/// Read an integer from the given binary stream.
pub fn read_int(mut reader: impl Read) -> Result<u64> {
    let mut buf = [0; INT_SIZE];
    reader.read_exact(&mut buf).map_err(Error::FailedRead)?;
    Ok(decode_int(&buf))
}

/// Write a length-prefixed string to the given binary stream.
pub fn write_string(mut writer: impl Write, string: &str) -> Result<()> {
    write_int(&mut writer, string.len() as u64)?;
    writer
        .write_all(string.as_bytes())
        .map_err(Error::FailedWrite)
}

/// Read a length-prefixed string from the given binary stream.
pub fn read_string(mut reader: impl Read) -> Result<String> {
    let len = read_int(&mut reader)?;
    let mut buf = Vec::new();
    let read = reader
        .take(len)
        .read_to_end(&mut buf)
        .map_err(Error::FailedRead)?;
    if (read as u64) < len {
        return Err(Error::FailedRead(std::io::Error::from(
            std::io::ErrorKind::UnexpectedEof,
        )));
    }
    String::from_utf8(buf).map_err(Error::InvalidStringEncoding)
}
