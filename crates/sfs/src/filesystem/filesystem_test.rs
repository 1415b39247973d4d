// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::path::Path;
use std::sync::Arc;

use rstest::rstest;

use super::{StaticFilesystem, TextEncoding, F_OK, R_OK, W_OK, X_OK};
use crate::{Config, EntryKind, OsError};

fixtures!();

async fn serve(root: &Path) -> (StaticFilesystem, std::path::PathBuf) {
    let pkg = sample_project(root);
    let archive = build_volume(root, &[pkg.clone()], Config::default()).await;
    let fs = StaticFilesystem::default();
    fs.load(&archive).await.expect("volume should load");
    (fs, pkg)
}

#[rstest]
#[tokio::test]
async fn test_dispatch_to_loaded_volume(tmpdir: TempDir) {
    init_logging();
    let (fs, pkg) = serve(tmpdir.path()).await;

    assert!(fs.owns(pkg.join("index.js")));
    assert!(fs.owns(tmpdir.path()));
    assert!(!fs.owns(tmpdir.path().join("elsewhere")));

    let stat = fs.stat(pkg.join("lib/util.js")).await.unwrap();
    assert!(stat.is_file());
    assert!(!stat.is_symbolic_link());
    assert_eq!(stat.size, 21);

    assert_eq!(
        fs.readdir(pkg.join("lib")).await.unwrap(),
        vec!["empty.txt", "util.js"]
    );
    let entries = fs.readdir_with_file_types_sync(&pkg).unwrap();
    let kinds: Vec<_> = entries
        .iter()
        .map(|e| (e.name.as_str(), e.is_directory()))
        .collect();
    assert_eq!(
        kinds,
        vec![("index.js", false), ("lib", true), ("package.json", false)]
    );

    assert_eq!(
        fs.realpath_sync(pkg.join("lib/../index.js")).unwrap(),
        pkg.join("index.js")
    );
    assert_eq!(
        fs.read_file_to_string(pkg.join("lib/util.js"), TextEncoding::Utf8)
            .await
            .unwrap(),
        "exports.answer = 42;\n"
    );
}

#[rstest]
#[tokio::test]
async fn test_dir_entries_sort_by_kind(tmpdir: TempDir) {
    let (fs, pkg) = serve(tmpdir.path()).await;

    let mut entries = fs.readdir_with_file_types(&pkg).await.unwrap();
    let listed = entries.clone();
    entries.sort();
    assert_eq!(entries, listed, "listings are already sorted by name");

    entries.sort_by_key(|e| std::cmp::Reverse(e.kind));
    assert_eq!(entries[0].name, "lib");
    assert_eq!(entries[0].kind, EntryKind::Directory);
    assert!(EntryKind::File < EntryKind::Directory);
}

#[rstest]
#[tokio::test]
async fn test_error_codes(tmpdir: TempDir) {
    let (fs, pkg) = serve(tmpdir.path()).await;

    let missing = pkg.join("missing.js");
    let err = fs.stat_sync(&missing).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::ENOENT));
    let err = fs.read_file_sync(&missing).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::ENOENT));

    let err = fs.read_file_sync(pkg.join("lib")).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EISDIR));
    let err = fs.readdir_sync(pkg.join("index.js")).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::ENOTDIR));
    let err = fs.open_sync(pkg.join("lib"), libc::O_RDONLY).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EISDIR));
    let err = fs
        .open_sync(pkg.join("index.js"), libc::O_WRONLY)
        .unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EROFS));
}

#[rstest]
#[tokio::test]
async fn test_access(tmpdir: TempDir) {
    let (fs, pkg) = serve(tmpdir.path()).await;
    let file = pkg.join("index.js");

    fs.access(&file, F_OK).await.unwrap();
    fs.access_sync(&file, R_OK | X_OK).unwrap();
    let err = fs.access_sync(&file, R_OK | W_OK).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EACCES));
    let err = fs.access_sync(pkg.join("nope"), F_OK).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::ENOENT));
}

#[rstest]
#[tokio::test]
async fn test_descriptor_lifecycle(tmpdir: TempDir) {
    let (fs, pkg) = serve(tmpdir.path()).await;
    let path = pkg.join("lib/util.js");

    let fd = fs.open(&path, libc::O_RDONLY).await.unwrap();
    assert!(fd.id().ends_with(&format!("#{}", path.display())), "{fd}");
    let mut buf = [0; 7];
    assert_eq!(fs.read(&fd, &mut buf, 0).await.unwrap(), 7);
    assert_eq!(&buf, b"exports");
    assert_eq!(fs.fstat(&fd).await.unwrap().size, 21);

    // a second open shares the entry until both are closed
    let again = fs.open_sync(&path, libc::O_RDONLY).unwrap();
    assert_eq!(again, fd);
    assert_eq!(fs.open_files(), 1);
    fs.close(&again).await.unwrap();
    assert_eq!(fs.read_sync(&fd, &mut buf, 8).unwrap(), 7);
    fs.close_sync(&fd).unwrap();
    assert_eq!(fs.open_files(), 0);

    let err = fs.read_sync(&fd, &mut buf, 0).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EBADF));
    let err = fs.close_sync(&fd).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EBADF));

    // descriptors are never valid on another instance
    let other = StaticFilesystem::default();
    let err = other.read_sync(&fd, &mut buf, 0).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EBADF));
}

#[rstest]
#[case::in_order(&[0, 1, 2, 3, 4, 5, 6, 7])]
#[case::reversed(&[7, 6, 5, 4, 3, 2, 1, 0])]
#[case::interleaved(&[3, 7, 0, 5, 1, 6, 2, 4])]
#[tokio::test]
async fn test_concurrent_reads_share_cache(tmpdir: TempDir, #[case] order: &[usize]) {
    let root = tmpdir.path();
    let content: String = (0..4096).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    ensure(root.join("lib/big.txt"), &content);
    let archive = build_volume(root, &[root.join("lib")], Config::default()).await;
    let fs = StaticFilesystem::default();
    fs.load_sync(&archive).unwrap();
    let path = root.join("lib/big.txt");
    let fd = fs.open_sync(&path, libc::O_RDONLY).unwrap();

    const CHUNK: usize = 512;
    assert_eq!(order.len(), content.len() / CHUNK);
    let reads = order.iter().copied().map(|i| {
        let fs = &fs;
        let fd = &fd;
        async move {
            let mut buf = vec![0; CHUNK];
            let count = fs.read(fd, &mut buf, (i * CHUNK) as u64).await.unwrap();
            buf.truncate(count);
            (i, buf)
        }
    });
    let chunks = futures::future::join_all(reads).await;

    for (i, chunk) in chunks {
        assert_eq!(
            chunk.as_slice(),
            &content.as_bytes()[i * CHUNK..(i + 1) * CHUNK]
        );
    }
    let (volume, _) = fs.volume_for(&path).unwrap();
    assert!(!volume.is_cached(&path), "cache entry should be released");
    fs.close_sync(&fd).unwrap();
}

#[rstest]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_reads_return_correct_bytes(tmpdir: TempDir) {
    let root = tmpdir.path();
    let content: String = (0..10_000).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
    ensure(root.join("lib/digits.txt"), &content);
    let archive = build_volume(root, &[root.join("lib")], Config::default()).await;
    let fs = Arc::new(StaticFilesystem::default());
    fs.load(&archive).await.unwrap();
    let path = root.join("lib/digits.txt");

    let mut tasks = Vec::new();
    for i in 0..10u64 {
        let fs = Arc::clone(&fs);
        let path = path.clone();
        tasks.push(tokio::spawn(async move {
            let fd = fs.open(&path, libc::O_RDONLY).await.unwrap();
            let mut buf = vec![0; 1000];
            let count = fs.read(&fd, &mut buf, i * 1000).await.unwrap();
            fs.close(&fd).await.unwrap();
            (i, buf[..count].to_vec())
        }));
    }
    for task in tasks {
        let (i, chunk) = task.await.unwrap();
        let start = (i * 1000) as usize;
        assert_eq!(chunk.as_slice(), &content.as_bytes()[start..start + 1000]);
    }
    assert_eq!(fs.open_files(), 0);
}

#[rstest]
#[tokio::test]
async fn test_multiple_volumes_and_unload(tmpdir: TempDir) {
    let first = tmpdir.path().join("first");
    let second = tmpdir.path().join("second");
    ensure(first.join("a/one.js"), "1");
    ensure(second.join("b/two.js"), "2");
    let first_archive = build_volume(&first, &[first.join("a")], Config::default()).await;
    let second_archive = build_volume(&second, &[second.join("b")], Config::default()).await;

    let fs = StaticFilesystem::default();
    fs.load_sync(&first_archive).unwrap();
    fs.load_sync(&second_archive).unwrap();
    fs.load_sync(&first_archive).unwrap();
    assert_eq!(fs.loaded_volumes().len(), 2);

    assert_eq!(fs.read_file_sync(first.join("a/one.js")).unwrap().as_ref(), b"1");
    assert_eq!(fs.read_file_sync(second.join("b/two.js")).unwrap().as_ref(), b"2");
    let fd = fs.open_sync(first.join("a/one.js"), libc::O_RDONLY).unwrap();

    fs.unload_sync(&first_archive).unwrap();
    assert!(!fs.owns(first.join("a/one.js")));
    assert!(fs.owns(second.join("b/two.js")));
    let err = fs.fstat_sync(&fd).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EBADF));
    fs.unload_sync(&first_archive)
        .expect_err("volume is no longer loaded");

    fs.shutdown();
    assert!(fs.loaded_volumes().is_empty());
    assert!(!fs.owns(second.join("b/two.js")));
}

#[rstest]
#[case(TextEncoding::Utf8, "héllo")]
#[case(TextEncoding::Latin1, "hÃ©llo")]
#[case(TextEncoding::Hex, "68c3a96c6c6f")]
#[case(TextEncoding::Base64, "aMOpbGxv")]
#[tokio::test]
async fn test_text_encodings(tmpdir: TempDir, #[case] encoding: TextEncoding, #[case] expected: &str) {
    let root = tmpdir.path();
    ensure(root.join("lib/text.txt"), "héllo");
    let archive = build_volume(root, &[root.join("lib")], Config::default()).await;
    let fs = StaticFilesystem::default();
    fs.load_sync(&archive).unwrap();

    let text = fs
        .read_file_to_string_sync(root.join("lib/text.txt"), encoding)
        .unwrap();
    assert_eq!(text, expected);
    assert_eq!(encoding.to_string().parse::<TextEncoding>().unwrap(), encoding);
}
