//! Digest support for APT repositories.

use crate::Result;
use serde::{Deserialize, Serialize};
use sha1::Digest as _;
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Digest algorithms used in APT metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HashAlgorithm {
    /// MD5 hash algorithm.
    Md5,
    /// SHA-1 hash algorithm.
    Sha1,
    /// SHA-256 hash algorithm.
    Sha256,
}

impl HashAlgorithm {
    /// Field name used for this algorithm's table in Release files.
    pub fn release_field(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5Sum",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
        }
    }

    /// Field name used in Packages stanzas.
    pub fn packages_field(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "MD5sum",
            HashAlgorithm::Sha1 => "SHA1",
            HashAlgorithm::Sha256 => "SHA256",
        }
    }

    /// Field name used for this algorithm's file list in Sources stanzas.
    pub fn sources_field(&self) -> &'static str {
        match self {
            HashAlgorithm::Md5 => "Files",
            HashAlgorithm::Sha1 => "Checksums-Sha1",
            HashAlgorithm::Sha256 => "Checksums-Sha256",
        }
    }

    /// Get all supported hash algorithms.
    pub fn all() -> &'static [HashAlgorithm] {
        &[HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Sha256]
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.release_field())
    }
}

/// A set of hex digests for a single file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashSet {
    hashes: BTreeMap<HashAlgorithm, String>,
}

impl HashSet {
    /// Create a new empty hash set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a hash to the set.
    pub fn insert(&mut self, algorithm: HashAlgorithm, hash: String) {
        self.hashes.insert(algorithm, hash);
    }

    /// Get a hash by algorithm.
    pub fn get(&self, algorithm: &HashAlgorithm) -> Option<&str> {
        self.hashes.get(algorithm).map(|s| s.as_str())
    }

    /// Iterate over the digests in algorithm order.
    pub fn iter(&self) -> impl Iterator<Item = (&HashAlgorithm, &str)> {
        self.hashes.iter().map(|(k, v)| (k, v.as_str()))
    }

    /// Check if the hash set is empty.
    pub fn is_empty(&self) -> bool {
        self.hashes.is_empty()
    }

    /// Get the number of hashes in the set.
    pub fn len(&self) -> usize {
        self.hashes.len()
    }
}

/// A file with its associated hashes and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashedFile {
    /// Path of the file relative to the directory the manifest describes.
    pub path: String,
    /// The size of the file in bytes.
    pub size: u64,
    /// The hashes of the file.
    pub hashes: HashSet,
}

impl HashedFile {
    /// Create a new hashed file.
    pub fn new<S: Into<String>>(path: S, size: u64) -> Self {
        Self {
            path: path.into(),
            size,
            hashes: HashSet::new(),
        }
    }

    /// Hash `full_path` and record it under `path`.
    pub fn from_path<S: Into<String>>(path: S, full_path: &Path) -> Result<Self> {
        let (size, hashes) = hash_file(full_path, HashAlgorithm::all())?;
        Ok(Self {
            path: path.into(),
            size,
            hashes,
        })
    }

    /// Add a hash to the file.
    pub fn add_hash(&mut self, algorithm: HashAlgorithm, hash: String) {
        self.hashes.insert(algorithm, hash);
    }

    /// Get a hash by algorithm.
    pub fn get_hash(&self, algorithm: &HashAlgorithm) -> Option<&str> {
        self.hashes.get(algorithm)
    }
}

/// Computes several digests over a single pass of the data.
pub struct MultiHasher {
    md5: Option<md5::Context>,
    sha1: Option<sha1::Sha1>,
    sha256: Option<sha2::Sha256>,
    size: u64,
}

impl MultiHasher {
    /// Create a new multi-hasher with the specified algorithms.
    pub fn new(algorithms: &[HashAlgorithm]) -> Self {
        let mut hasher = Self {
            md5: None,
            sha1: None,
            sha256: None,
            size: 0,
        };

        for &algorithm in algorithms {
            match algorithm {
                HashAlgorithm::Md5 => hasher.md5 = Some(md5::Context::new()),
                HashAlgorithm::Sha1 => hasher.sha1 = Some(sha1::Sha1::new()),
                HashAlgorithm::Sha256 => hasher.sha256 = Some(sha2::Sha256::new()),
            }
        }

        hasher
    }

    /// Update the hashes with the given data.
    pub fn update(&mut self, data: &[u8]) {
        self.size += data.len() as u64;

        if let Some(ref mut hasher) = self.md5 {
            hasher.consume(data);
        }
        if let Some(ref mut hasher) = self.sha1 {
            hasher.update(data);
        }
        if let Some(ref mut hasher) = self.sha256 {
            hasher.update(data);
        }
    }

    /// Finalize the hashes and return the size and digests.
    pub fn finalize(self) -> (u64, HashSet) {
        let mut hash_set = HashSet::new();

        if let Some(hasher) = self.md5 {
            hash_set.insert(HashAlgorithm::Md5, format!("{:x}", hasher.compute()));
        }
        if let Some(hasher) = self.sha1 {
            hash_set.insert(HashAlgorithm::Sha1, format!("{:x}", hasher.finalize()));
        }
        if let Some(hasher) = self.sha256 {
            hash_set.insert(HashAlgorithm::Sha256, format!("{:x}", hasher.finalize()));
        }

        (self.size, hash_set)
    }
}

impl Write for MultiHasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Hash a reader with the specified algorithms.
pub fn hash_reader<R: Read>(mut reader: R, algorithms: &[HashAlgorithm]) -> Result<(u64, HashSet)> {
    let mut hasher = MultiHasher::new(algorithms);
    std::io::copy(&mut reader, &mut hasher)?;
    Ok(hasher.finalize())
}

/// Hash the file at `path` with the specified algorithms.
pub fn hash_file(path: &Path, algorithms: &[HashAlgorithm]) -> Result<(u64, HashSet)> {
    hash_reader(File::open(path)?, algorithms)
}

/// Hash data with the specified algorithms.
pub fn hash_data(data: &[u8], algorithms: &[HashAlgorithm]) -> (u64, HashSet) {
    let mut hasher = MultiHasher::new(algorithms);
    hasher.update(data);
    hasher.finalize()
}
