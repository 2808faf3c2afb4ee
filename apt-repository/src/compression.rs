//! Compression support for APT index files.

use crate::{AptRepositoryError, Result};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::str::FromStr;

/// Supported compression formats for APT index files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    /// No compression.
    #[serde(alias = "uncompressed")]
    None,
    /// Gzip compression.
    Gzip,
    /// Bzip2 compression.
    Bzip2,
    /// XZ compression.
    Xz,
}

impl Compression {
    /// Get the file extension for this compression format.
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => "",
            Compression::Gzip => ".gz",
            Compression::Bzip2 => ".bz2",
            Compression::Xz => ".xz",
        }
    }

    /// Name understood by apt-ftparchive's `*::Compress` settings.
    pub fn ftparchive_name(&self) -> &'static str {
        match self {
            Compression::None => ".",
            Compression::Gzip => "gzip",
            Compression::Bzip2 => "bzip2",
            Compression::Xz => "xz",
        }
    }

    /// Compress data using this compression format.
    pub fn compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        match self {
            Compression::None => Ok(data.to_vec()),
            Compression::Gzip => {
                let mut encoder =
                    flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::best());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Bzip2 => {
                let mut encoder =
                    bzip2::write::BzEncoder::new(Vec::new(), bzip2::Compression::best());
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
            Compression::Xz => {
                let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 9);
                encoder.write_all(data)?;
                Ok(encoder.finish()?)
            }
        }
    }

    /// Decompress data using this compression format.
    pub fn decompress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut decompressed = Vec::new();
        match self {
            Compression::None => decompressed.extend_from_slice(data),
            Compression::Gzip => {
                flate2::read::GzDecoder::new(data).read_to_end(&mut decompressed)?;
            }
            Compression::Bzip2 => {
                bzip2::read::BzDecoder::new(data).read_to_end(&mut decompressed)?;
            }
            Compression::Xz => {
                xz2::read::XzDecoder::new(data).read_to_end(&mut decompressed)?;
            }
        }
        Ok(decompressed)
    }

    /// Get all supported compression formats.
    pub fn all() -> &'static [Compression] {
        &[
            Compression::None,
            Compression::Gzip,
            Compression::Bzip2,
            Compression::Xz,
        ]
    }
}

impl FromStr for Compression {
    type Err = AptRepositoryError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" | "uncompressed" | "." => Ok(Compression::None),
            "gzip" | "gz" => Ok(Compression::Gzip),
            "bzip2" | "bz2" => Ok(Compression::Bzip2),
            "xz" => Ok(Compression::Xz),
            other => Err(AptRepositoryError::UnknownCompression(other.to_string())),
        }
    }
}

impl std::fmt::Display for Compression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Compression::None => write!(f, "none"),
            Compression::Gzip => write!(f, "gzip"),
            Compression::Bzip2 => write!(f, "bzip2"),
            Compression::Xz => write!(f, "xz"),
        }
    }
}
