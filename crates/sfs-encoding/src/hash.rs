// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::fmt::Display;
use std::io::Write;

use data_encoding::BASE64;
use ring::digest::{Context, SHA256};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./hash_test.rs"]
mod hash_test;

/// Computes a SHA-256 [`Fingerprint`] of everything written to it,
/// passing each write on to `target`.
pub struct Hasher<T> {
    ctx: Context,
    target: T,
}

impl<T> Hasher<T> {
    pub fn with_target(writer: T) -> Self {
        Self {
            ctx: Context::new(&SHA256),
            target: writer,
        }
    }

    /// Finalize the hasher and return the fingerprint
    pub fn fingerprint(self) -> Fingerprint {
        Fingerprint(BASE64.encode(self.ctx.finish().as_ref()))
    }
}

impl Default for Hasher<std::io::Sink> {
    fn default() -> Self {
        Self::with_target(std::io::sink())
    }
}

impl<T> Write for Hasher<T>
where
    T: Write,
{
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.ctx.update(buf);
        self.target.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.target.flush()
    }
}

/// A structural checksum over the member list of a volume.
///
/// The fingerprint covers the sorted set of relative paths that were
/// packed, not their content. It detects a reordered, truncated or
/// edited index but says nothing about the bytes within a file.
#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Compute the fingerprint of the given member paths.
    ///
    /// Paths are sorted before hashing, so the input order is irrelevant.
    pub fn from_paths<I, S>(paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut sorted: Vec<S> = paths.into_iter().collect();
        sorted.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
        let sorted: Vec<&str> = sorted.iter().map(AsRef::as_ref).collect();

        let mut hasher = Hasher::default();
        serde_json::to_writer(&mut hasher, &sorted).map_err(Error::FingerprintInput)?;
        Ok(hasher.fingerprint())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The encoded length of this fingerprint, in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<String> for Fingerprint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl AsRef<str> for Fingerprint {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
