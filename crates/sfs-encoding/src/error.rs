// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::io;

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Diagnostic, Debug, Error)]
#[diagnostic(
    url(
        "https://spkenv.dev/error_codes#{}",
        self.code().unwrap_or_else(|| Box::new("sfs::encoding"))
    )
)]
pub enum Error {
    #[error("Encoding read error")]
    FailedRead(#[source] io::Error),
    #[error("Encoding write error")]
    FailedWrite(#[source] io::Error),
    #[error("Value {0} does not fit in a 48-bit integer")]
    #[diagnostic(code("sfs::encoding::int_overflow"))]
    IntOverflow(u64),
    #[error("Invalid string encoding")]
    InvalidStringEncoding(#[source] std::string::FromUtf8Error),
    #[error("Failed to serialize fingerprint input")]
    FingerprintInput(#[source] serde_json::Error),
}
