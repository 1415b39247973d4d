// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::encoding::Fingerprint;
use crate::volume::WritableVolume;
use crate::Result;

#[cfg(test)]
#[path = "./generate_test.rs"]
mod generate_test;

/// The outcome of [`generate_volume`]
#[derive(Debug, Clone)]
pub struct GeneratedVolume {
    pub fingerprint: Fingerprint,
    pub volume_path: PathBuf,
    pub index_path: PathBuf,
    pub manifest_path: PathBuf,
    /// Everything that was packed, children before their parents,
    /// see [`WritableVolume::get_added_files_and_folders`]
    pub added: Vec<PathBuf>,
}

/// Pack the given folders of a project into a single volume
/// below the project root.
///
/// Relative folders and exclusions are taken relative to `project_root`.
pub async fn generate_volume<P, F, E>(
    project_root: P,
    folders: impl IntoIterator<Item = F>,
    exclusions: impl IntoIterator<Item = E>,
    config: Config,
) -> Result<GeneratedVolume>
where
    P: AsRef<Path>,
    F: AsRef<Path>,
    E: AsRef<Path>,
{
    let project_root = crate::path::normalize(project_root)?;
    let exclusions: HashSet<PathBuf> = exclusions
        .into_iter()
        .map(|path| project_root.join(path))
        .collect();

    let mut volume = WritableVolume::with_config(&project_root, config)?;
    for folder in folders {
        let folder = project_root.join(folder);
        volume.add_folder(&folder, &exclusions).await?;
    }
    let fingerprint = volume.write().await?;

    Ok(GeneratedVolume {
        fingerprint,
        volume_path: volume.volume_path(),
        index_path: volume.index_path(),
        manifest_path: volume.manifest_path(),
        added: volume.get_added_files_and_folders(),
    })
}
