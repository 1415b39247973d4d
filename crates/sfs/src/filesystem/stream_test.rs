// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::sync::Arc;

use futures::TryStreamExt;
use rstest::rstest;
use tokio::io::AsyncReadExt;

use super::ReadStreamOptions;
use crate::filesystem::StaticFilesystem;
use crate::{Config, Error, OsError};

fixtures!();

const ALPHABET: &str = "abcdefghijklmnopqrstuvwxyz";

async fn serve_alphabet(root: &std::path::Path) -> (Arc<StaticFilesystem>, std::path::PathBuf) {
    ensure(root.join("lib/alphabet.txt"), ALPHABET);
    let archive = build_volume(root, &[root.join("lib")], Config::default()).await;
    let fs = Arc::new(StaticFilesystem::default());
    fs.load(&archive).await.unwrap();
    (fs, root.join("lib/alphabet.txt"))
}

#[rstest]
#[tokio::test]
async fn test_stream_chunks_and_auto_close(tmpdir: TempDir) {
    init_logging();
    let (fs, path) = serve_alphabet(tmpdir.path()).await;

    let mut stream = fs
        .create_read_stream(&path, ReadStreamOptions::default().with_high_water_mark(10))
        .unwrap();
    assert!(stream.is_pending());
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next_chunk().await.unwrap() {
        assert_eq!(fs.open_files(), 1);
        chunks.push(chunk);
    }
    let sizes: Vec<_> = chunks.iter().map(|c| c.len()).collect();
    assert_eq!(sizes, vec![10, 10, 6]);
    assert_eq!(chunks.concat(), ALPHABET.as_bytes());
    assert_eq!(stream.bytes_read(), 26);
    assert!(stream.is_finished());
    assert_eq!(fs.open_files(), 0, "stream should close at the end");
    assert!(stream.next_chunk().await.unwrap().is_none());
}

#[rstest]
#[case::inclusive_end(2, Some(4), "cde")]
#[case::single_byte(0, Some(0), "a")]
#[case::open_end(20, None, "uvwxyz")]
#[case::end_past_eof(24, Some(100), "yz")]
#[case::start_past_eof(40, None, "")]
#[tokio::test]
async fn test_stream_range(
    tmpdir: TempDir,
    #[case] start: u64,
    #[case] end: Option<u64>,
    #[case] expected: &str,
) {
    let (fs, path) = serve_alphabet(tmpdir.path()).await;
    let mut options = ReadStreamOptions::default()
        .with_start(start)
        .with_high_water_mark(2);
    options.end = end;
    let stream = fs.create_read_stream(&path, options).unwrap();
    let chunks: Vec<_> = stream.into_stream().try_collect().await.unwrap();
    assert_eq!(chunks.concat(), expected.as_bytes());
    assert_eq!(fs.open_files(), 0);
    let (volume, _) = fs.volume_for(&path).unwrap();
    assert!(!volume.is_cached(&path), "closing the stream releases the cache");
}

#[rstest]
#[tokio::test]
async fn test_stream_invalid_range(tmpdir: TempDir) {
    let (fs, path) = serve_alphabet(tmpdir.path()).await;
    let err = fs
        .create_read_stream(&path, ReadStreamOptions::default().with_range(5, 4))
        .unwrap_err();
    assert!(matches!(err, Error::InvalidStreamRange { start: 5, end: 4 }));

    let mut options = ReadStreamOptions::default();
    options.flags = libc::O_RDWR;
    let err = fs.create_read_stream(&path, options).unwrap_err();
    assert_eq!(err.os_error(), Some(libc::EROFS));
}

#[rstest]
#[tokio::test]
async fn test_stream_opens_lazily(tmpdir: TempDir) {
    let (fs, path) = serve_alphabet(tmpdir.path()).await;
    let mut stream = fs
        .create_read_stream(path.with_file_name("missing.txt"), Default::default())
        .expect("missing files are only reported on first read");
    let err = stream.next_chunk().await.unwrap_err();
    assert!(err.is_not_found(), "{err:?}");
    assert!(stream.next_chunk().await.unwrap().is_none());
}

#[rstest]
#[tokio::test]
async fn test_stream_with_existing_descriptor(tmpdir: TempDir) {
    let (fs, path) = serve_alphabet(tmpdir.path()).await;
    let fd = fs.open_sync(&path, libc::O_RDONLY).unwrap();

    let options = ReadStreamOptions::default()
        .with_fd(fd.clone())
        .with_auto_close(false)
        .with_range(0, 2);
    let mut stream = fs.create_read_stream(&path, options).unwrap();
    assert_eq!(stream.next_chunk().await.unwrap().unwrap().as_ref(), b"abc");
    assert!(stream.next_chunk().await.unwrap().is_none());
    drop(stream);
    assert_eq!(fs.open_files(), 1, "descriptor was not ours to close");

    let mut buf = [0; 3];
    assert_eq!(fs.read_sync(&fd, &mut buf, 23).unwrap(), 3);
    let (volume, _) = fs.volume_for(&path).unwrap();
    assert!(volume.is_cached(&path), "the middle of the file was never read");
    fs.close_sync(&fd).unwrap();
    assert!(!volume.is_cached(&path));
}

#[rstest]
#[tokio::test]
async fn test_dropped_stream_closes(tmpdir: TempDir) {
    let (fs, path) = serve_alphabet(tmpdir.path()).await;
    let mut stream = fs
        .create_read_stream(&path, ReadStreamOptions::default().with_high_water_mark(4))
        .unwrap();
    stream.next_chunk().await.unwrap();
    assert_eq!(fs.open_files(), 1);
    drop(stream);
    assert_eq!(fs.open_files(), 0);
}

#[rstest]
#[tokio::test]
async fn test_stream_as_async_read(tmpdir: TempDir) {
    let (fs, path) = serve_alphabet(tmpdir.path()).await;
    let stream = fs
        .create_read_stream(&path, ReadStreamOptions::default().with_high_water_mark(3))
        .unwrap();
    let mut reader = stream.into_async_read();
    let mut content = String::new();
    reader.read_to_string(&mut content).await.unwrap();
    assert_eq!(content, ALPHABET);
}
