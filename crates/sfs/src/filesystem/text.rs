// Copyright (c) Contributors to the SPK project.
// SPDX-License-Identifier: Apache-2.0
// https://github.com/spkenv/spk

use std::str::FromStr;

use data_encoding::{BASE64, HEXLOWER};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How file content is turned into text by
/// [`super::StaticFilesystem::read_file_to_string`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextEncoding {
    #[default]
    Utf8,
    /// Each byte maps to the unicode code point of the same value
    Latin1,
    Base64,
    Hex,
}

impl TextEncoding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Utf8 => "utf8",
            Self::Latin1 => "latin1",
            Self::Base64 => "base64",
            Self::Hex => "hex",
        }
    }

    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec()).map_err(|err| {
                Error::InvalidTextEncoding {
                    encoding: self.as_str(),
                    reason: err.to_string(),
                }
            }),
            Self::Latin1 => Ok(bytes.iter().map(|b| char::from(*b)).collect()),
            Self::Base64 => Ok(BASE64.encode(bytes)),
            Self::Hex => Ok(HEXLOWER.encode(bytes)),
        }
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TextEncoding {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "utf8" | "utf-8" => Ok(Self::Utf8),
            "latin1" | "binary" => Ok(Self::Latin1),
            "base64" => Ok(Self::Base64),
            "hex" => Ok(Self::Hex),
            _ => Err(Error::InvalidTextEncoding {
                encoding: "unknown",
                reason: format!("unsupported encoding '{s}'"),
            }),
        }
    }
}
