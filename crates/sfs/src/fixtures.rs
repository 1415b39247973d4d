// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

macro_rules! fixtures {
    () => {
        use rstest::fixture;
        use tempfile::TempDir;

        #[allow(dead_code)]
        fn init_logging() {
            let sub = tracing_subscriber::FmtSubscriber::builder()
                .with_env_filter(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sfs=trace")),
                )
                .without_time()
                .with_test_writer()
                .finish();
            let _ = tracing::subscriber::set_global_default(sub);
        }

        #[fixture]
        fn tmpdir() -> TempDir {
            tempfile::Builder::new()
                .prefix("sfs-test-")
                .tempdir()
                .expect("failed to create dir for test")
        }

        #[allow(dead_code)]
        fn ensure(path: std::path::PathBuf, data: &str) {
            std::fs::create_dir_all(path.parent().unwrap()).expect("failed to make dirs");
            let mut file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(true)
                .write(true)
                .open(path)
                .expect("failed to create file");
            std::io::copy(&mut data.as_bytes(), &mut file).expect("failed to write file data");
        }

        /// Lay out a small project with one package folder.
        ///
        /// ```text
        /// <root>/node_modules/pkg/package.json
        /// <root>/node_modules/pkg/index.js
        /// <root>/node_modules/pkg/lib/util.js
        /// <root>/node_modules/pkg/lib/empty.txt
        /// ```
        #[allow(dead_code)]
        fn sample_project(root: &std::path::Path) -> std::path::PathBuf {
            let pkg = root.join("node_modules").join("pkg");
            ensure(pkg.join("package.json"), r#"{"name": "pkg", "main": "index.js"}"#);
            ensure(pkg.join("index.js"), "module.exports = require('./lib/util');\n");
            ensure(pkg.join("lib").join("util.js"), "exports.answer = 42;\n");
            ensure(pkg.join("lib").join("empty.txt"), "");
            pkg
        }

        /// Write a volume at `root` containing the given folders,
        /// returning the path of the archive.
        #[allow(dead_code)]
        async fn build_volume(
            root: &std::path::Path,
            folders: &[std::path::PathBuf],
            config: crate::Config,
        ) -> std::path::PathBuf {
            let mut volume = crate::volume::WritableVolume::with_config(root, config)
                .expect("failed to create writable volume");
            for folder in folders {
                volume
                    .add_folder(folder, &Default::default())
                    .await
                    .expect("failed to add folder");
            }
            volume.write().await.expect("failed to write volume");
            volume.volume_path()
        }
    };
}
