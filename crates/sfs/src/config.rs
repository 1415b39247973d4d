// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[cfg(test)]
#[path = "./config_test.rs"]
mod config_test;

/// Names of the files that make up a volume on disk.
///
/// All of them live in a single directory directly below
/// the mounting root.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Layout {
    pub dir_name: String,
    pub volume_file: String,
    pub index_file: String,
    pub manifest_file: String,
}

impl Default for Layout {
    fn default() -> Self {
        Self {
            dir_name: "static_fs".to_string(),
            volume_file: "static_fs_volume.sfsv".to_string(),
            index_file: "static_fs_index.json".to_string(),
            manifest_file: "static_fs_manifest.json".to_string(),
        }
    }
}

impl Layout {
    /// The directory holding the volume files for the given mounting root.
    pub fn volume_dir(&self, mounting_root: &Path) -> PathBuf {
        mounting_root.join(&self.dir_name)
    }

    pub fn volume_path(&self, mounting_root: &Path) -> PathBuf {
        self.volume_dir(mounting_root).join(&self.volume_file)
    }

    pub fn index_path(&self, mounting_root: &Path) -> PathBuf {
        self.volume_dir(mounting_root).join(&self.index_file)
    }

    pub fn manifest_path(&self, mounting_root: &Path) -> PathBuf {
        self.volume_dir(mounting_root).join(&self.manifest_file)
    }
}

/// Where the file index of a volume is stored.
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IndexEncoding {
    /// Only in the sidecar index file next to the archive.
    #[default]
    Sidecar,
    /// In the archive header, making the archive self-contained.
    /// The sidecar index is still written as build output.
    Inline,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Volume {
    /// Files ending with this extension are left out of the volume
    pub native_extension: String,
    pub index_encoding: IndexEncoding,
}

impl Default for Volume {
    fn default() -> Self {
        Self {
            native_extension: ".node".to_string(),
            index_encoding: IndexEncoding::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Stream {
    /// The largest chunk that a read stream will produce
    pub high_water_mark: usize,
}

impl Default for Stream {
    fn default() -> Self {
        Self {
            high_water_mark: 64 * 1024,
        }
    }
}

/// Configuration values for sfs.
#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    // These sub-types should aim to only have one level of
    // values within them, otherwise they become impossible to address
    // with environment variables.
    pub layout: Layout,
    pub volume: Volume,
    pub stream: Stream,
}

impl Config {
    /// Load the config from disk and the environment.
    pub fn load() -> Result<Self> {
        load_config()
    }

    /// Reject values that would produce an unusable volume layout.
    pub fn validate(&self) -> Result<()> {
        let names = [
            ("layout.dir_name", &self.layout.dir_name),
            ("layout.volume_file", &self.layout.volume_file),
            ("layout.index_file", &self.layout.index_file),
            ("layout.manifest_file", &self.layout.manifest_file),
        ];
        for (key, name) in names {
            if name.is_empty() || name.contains(['/', '\\']) {
                return Err(Error::InvalidConfig(format!(
                    "{key} must be a plain file name, got '{name}'"
                )));
            }
        }
        if self.stream.high_water_mark == 0 {
            return Err(Error::InvalidConfig(
                "stream.high_water_mark must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load the sfs configuration from disk.
///
/// This includes the system and user configurations (if they exist),
/// followed by any `SFS_<SECTION>_<NAME>` environment variables.
pub fn load_config() -> Result<Config> {
    use config::{Config as RawConfig, File};

    let mut config_builder = RawConfig::builder()
        // the system config can also be in any support format: toml, yaml, json, ini, etc
        .add_source(File::with_name("/etc/sfs").required(false));
    if let Some(user_dir) = dirs::config_dir() {
        let user_config = user_dir.join("sfs").join("sfs");
        config_builder = config_builder
            .add_source(File::with_name(&format!("{}", user_config.display())).required(false));
    }

    for (var, value) in std::env::vars() {
        let Some(tail) = var.strip_prefix("SFS_") else {
            continue;
        };
        // section names never contain an underscore, but field names can
        let Some((section, name)) = tail.split_once('_') else {
            continue;
        };

        let key = format!("{}.{}", section.to_lowercase(), name.to_lowercase());
        config_builder = config_builder.set_override(key, value)?;
    }

    let config = Config::deserialize(config_builder.build()?)?;
    config.validate()?;
    Ok(config)
}
