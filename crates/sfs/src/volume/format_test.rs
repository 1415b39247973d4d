// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use relative_path::RelativePath;
use rstest::rstest;

use super::{encode_header, read_header, InlineEntry};
use crate::encoding::{Fingerprint, INT_SIZE};

#[rstest]
fn test_header_without_inline_index() {
    let fingerprint = Fingerprint::from("abc".to_string());
    let header = encode_header(&fingerprint, &[]).unwrap();
    assert_eq!(header.len(), INT_SIZE * 2 + 3);
    // the inline index length is the trailing zero word
    assert!(header[INT_SIZE + 3..].iter().all(|b| *b == 0));

    let decoded = read_header(header.as_slice(), header.len() as u64).unwrap();
    assert_eq!(decoded.fingerprint, fingerprint);
    assert!(decoded.inline.is_none());
    assert_eq!(decoded.data_offset, header.len() as u64);
}

#[rstest]
fn test_inline_offsets_follow_header() {
    let fingerprint = Fingerprint::from("fp".to_string());
    let inline = [
        InlineEntry::Directory {
            path: RelativePath::new(""),
        },
        InlineEntry::File {
            path: RelativePath::new("a.js"),
            size: 5,
        },
        InlineEntry::Directory {
            path: RelativePath::new("b"),
        },
        InlineEntry::File {
            path: RelativePath::new("b/c.json"),
            size: 0,
        },
        InlineEntry::Directory {
            path: RelativePath::new("empty"),
        },
        InlineEntry::File {
            path: RelativePath::new("d.txt"),
            size: 7,
        },
    ];
    let header = encode_header(&fingerprint, &inline).unwrap();
    let header_len = header.len() as u64;

    let mut archive = header.clone();
    archive.extend_from_slice(b"aaaaa");
    archive.extend_from_slice(b"ddddddd");
    let decoded = read_header(archive.as_slice(), archive.len() as u64).unwrap();

    let index = decoded.inline.expect("inline index should be present");
    let offsets: Vec<_> = index
        .files
        .iter()
        .map(|e| (e.path.as_str(), e.offset, e.size))
        .collect();
    assert_eq!(
        offsets,
        vec![
            ("a.js", header_len, 5),
            ("b/c.json", header_len + 5, 0),
            ("d.txt", header_len + 5, 7),
        ]
    );
    let directories: Vec<_> = index.directories.iter().map(|d| d.as_str()).collect();
    assert_eq!(directories, vec!["", "b", "empty"]);
    assert_eq!(decoded.data_offset, header_len);
}

#[rstest]
fn test_unknown_inline_entry_kind() {
    let mut data = vec![0, 0, 0, 0, 0, 1, b'x'];
    data.extend_from_slice(&[0, 0, 0, 0, 0, 6]);
    data.extend_from_slice(&[0, 0, 0, 0, 0, 7]);
    let err = read_header(data.as_slice(), data.len() as u64).unwrap_err();
    assert!(err.contains("unknown inline entry kind 7"), "{err}");
}

#[rstest]
#[case::empty(&[])]
#[case::short_fingerprint(&[0, 0, 0, 0, 0, 9, b'x'])]
#[case::missing_index_len(&[0, 0, 0, 0, 0, 1, b'x', 0, 0])]
fn test_truncated_header(#[case] data: &[u8]) {
    read_header(data, data.len() as u64).expect_err("truncated header should fail");
}

#[rstest]
fn test_index_longer_than_archive() {
    let mut data = vec![0, 0, 0, 0, 0, 1, b'x'];
    data.extend_from_slice(&[0, 0, 0, 0, 1, 0]);
    let err = read_header(data.as_slice(), data.len() as u64).unwrap_err();
    assert!(err.contains("archive is only"), "{err}");
}
