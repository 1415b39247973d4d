// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

//! Binary primitives shared by the sfs volume format.

mod binary;
mod error;
mod hash;

pub use binary::{
    decode_int,
    encode_int,
    read_int,
    read_string,
    write_int,
    write_string,
    INT_SIZE,
    MAX_INT,
};
pub use error::{Error, Result};
pub use hash::{Fingerprint, Hasher};
