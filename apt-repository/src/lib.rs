//! # APT Repository Library
//!
//! Building blocks for writing the `dists/` side of an APT repository:
//! index files (Packages, Sources, Translation) in several compressed
//! encodings, multi-algorithm digests, and Release manifests.
//!
//! ## Example
//!
//! ```rust
//! use apt_repository::{Compression, IndexFileWriter};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let td = tempfile::tempdir()?;
//! let target = td.path().join("main/source/Sources");
//! let mut index = IndexFileWriter::new(&target, &[Compression::None, Compression::Gzip])?;
//! index.write_stanza("Package: bar\nVersion: 1.0-1\n")?;
//! index.close()?;
//! assert!(td.path().join("main/source/Sources.gz").exists());
//! # Ok(())
//! # }
//! ```

pub mod compression;
pub mod deb822;
pub mod error;
pub mod hash;
pub mod index;
pub mod packages;
pub mod release;
pub mod sources;

pub use compression::Compression;
pub use deb822::Paragraph;
pub use error::{AptRepositoryError, Result};
pub use hash::{hash_data, hash_file, HashAlgorithm, HashSet, HashedFile};
pub use index::{prune_stale_variants, variant_path, write_atomically, IndexFileWriter};
pub use packages::Package;
pub use release::{ComponentRelease, Release, ReleaseBuilder};
pub use sources::{Source, SourceFileEntry};

/// Compression formats used when a series does not configure its own.
pub const DEFAULT_COMPRESSIONS: &[Compression] =
    &[Compression::None, Compression::Gzip, Compression::Bzip2];

/// Digest algorithms recorded in Release manifests, in output order.
pub const RELEASE_HASH_ALGORITHMS: &[HashAlgorithm] =
    &[HashAlgorithm::Md5, HashAlgorithm::Sha1, HashAlgorithm::Sha256];
