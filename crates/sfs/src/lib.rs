// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Static filesystem volumes.
//!
//! Folders below a mounting root are packed into a single archive
//! with a [`volume::WritableVolume`], and served back read-only
//! from any number of loaded archives by a [`StaticFilesystem`].

#![deny(unsafe_op_in_unsafe_fn)]

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
#[macro_use]
mod fixtures;

pub mod config;
mod error;
mod filesystem;
mod generate;
pub mod path;
mod stat;
pub mod volume;

pub use sfs_encoding as encoding;

pub use config::{load_config, Config};
pub use error::{Error, OsError, Result};
pub use filesystem::{
    AsyncReadStream,
    FileDescriptor,
    ReadStream,
    ReadStreamOptions,
    StaticFilesystem,
    TextEncoding,
    F_OK,
    R_OK,
    W_OK,
    X_OK,
};
pub use generate::{generate_volume, GeneratedVolume};
pub use stat::{DirEntry, EntryKind, Stat, VolumeStats};
