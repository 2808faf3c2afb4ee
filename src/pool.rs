//! Content-addressed package pool.
//!
//! Files live at `pool/<component>/<prefix>/<source>/<filename>`. A path is
//! written at most once; a second write with identical content is a no-op and
//! a write with different content is refused.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use apt_repository::{hash_data, hash_file, HashAlgorithm};
use tracing::{debug, info};

use crate::error::{PublishError, PublishResult};

/// Result of adding a file to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddFileOutcome {
    /// The file was written.
    Added,
    /// Identical content was already present.
    AlreadyPresent,
}

/// Directory prefix for a source package name.
///
/// `lib*` sources are split by their first four characters, everything else
/// by the first character.
pub fn poolify_prefix(source_name: &str) -> PublishResult<String> {
    let mut chars = source_name.chars();
    let first = chars
        .next()
        .ok_or_else(|| PublishError::Configuration("empty source package name".to_string()))?;
    if source_name.starts_with("lib") {
        Ok(source_name.chars().take(4).collect())
    } else {
        Ok(first.to_string())
    }
}

/// Pool-relative directory of a source package, e.g. `pool/main/b/bar`.
pub fn pool_directory(component: &str, source_name: &str) -> PublishResult<String> {
    validate_name("component", component)?;
    validate_name("source package", source_name)?;
    Ok(format!(
        "pool/{}/{}/{}",
        component,
        poolify_prefix(source_name)?,
        source_name
    ))
}

fn validate_name(what: &str, name: &str) -> PublishResult<()> {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(PublishError::Configuration(format!(
            "invalid {} name {:?}",
            what, name
        )));
    }
    Ok(())
}

/// A pool rooted at an archive root (the directory containing `pool/`).
#[derive(Debug, Clone)]
pub struct DiskPool {
    archive_root: PathBuf,
}

impl DiskPool {
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        Self {
            archive_root: archive_root.into(),
        }
    }

    pub fn archive_root(&self) -> &Path {
        &self.archive_root
    }

    pub fn root(&self) -> PathBuf {
        self.archive_root.join("pool")
    }

    /// Absolute path of a file in the pool.
    pub fn path_for(
        &self,
        component: &str,
        source_name: &str,
        filename: &str,
    ) -> PublishResult<PathBuf> {
        validate_name("file", filename)?;
        Ok(self
            .archive_root
            .join(pool_directory(component, source_name)?)
            .join(filename))
    }

    /// Archive-relative path of a file in the pool, as used in indexes.
    pub fn relative_path_for(
        &self,
        component: &str,
        source_name: &str,
        filename: &str,
    ) -> PublishResult<String> {
        validate_name("file", filename)?;
        Ok(format!(
            "{}/{}",
            pool_directory(component, source_name)?,
            filename
        ))
    }

    /// Add a file to the pool.
    pub fn add_file(
        &self,
        component: &str,
        source_name: &str,
        filename: &str,
        content: &[u8],
    ) -> PublishResult<AddFileOutcome> {
        let target = self.path_for(component, source_name, filename)?;

        if target.exists() {
            return self.check_existing(&target, content);
        }

        let parent = target
            .parent()
            .ok_or_else(|| PublishError::Configuration(format!("{} has no parent", target.display())))?;
        fs::create_dir_all(parent)?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)?;
        temp_file.write_all(content)?;
        temp_file.flush()?;
        match temp_file.persist_noclobber(&target) {
            Ok(_) => {
                debug!("Added {} to pool", target.display());
                Ok(AddFileOutcome::Added)
            }
            // Raced with another writer of the same path.
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => {
                self.check_existing(&target, content)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn check_existing(&self, target: &Path, content: &[u8]) -> PublishResult<AddFileOutcome> {
        let (_, existing) = hash_file(target, &[HashAlgorithm::Sha256])?;
        let (_, wanted) = hash_data(content, &[HashAlgorithm::Sha256]);
        if existing.get(&HashAlgorithm::Sha256) == wanted.get(&HashAlgorithm::Sha256) {
            debug!("{} already in pool", target.display());
            Ok(AddFileOutcome::AlreadyPresent)
        } else {
            Err(PublishError::PoolConflict {
                path: target.to_path_buf(),
            })
        }
    }

    /// Remove a file from the pool.
    pub fn remove_file(
        &self,
        component: &str,
        source_name: &str,
        filename: &str,
    ) -> PublishResult<u64> {
        let target = self.path_for(component, source_name, filename)?;
        let size = match fs::metadata(&target) {
            Ok(m) => m.len(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PublishError::NotInPool { path: target });
            }
            Err(e) => return Err(e.into()),
        };
        fs::remove_file(&target)?;
        info!("Removed {} from pool", target.display());
        Ok(size)
    }

    /// Total size in bytes of the files in the pool.
    pub fn size(&self) -> PublishResult<u64> {
        let root = self.root();
        if !root.exists() {
            return Ok(0);
        }
        let mut total = 0;
        for entry in walkdir::WalkDir::new(&root) {
            let entry = entry?;
            if entry.file_type().is_file() {
                total += entry.metadata()?.len();
            }
        }
        Ok(total)
    }
}
