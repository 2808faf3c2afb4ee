//! Atomic, multi-compression writing of index files.
//!
//! Content is accumulated in a temporary file next to the target. On
//! [`IndexFileWriter::close`] every configured encoding is written to its own
//! temporary file and renamed into place, so readers only ever observe a
//! complete previous or complete new version of each variant.

use crate::{AptRepositoryError, Compression, Result};
use std::fs;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// Writes one logical index (e.g. `binary-amd64/Packages`) in several encodings.
pub struct IndexFileWriter {
    target: PathBuf,
    compressions: Vec<Compression>,
    buffer: Option<NamedTempFile>,
}

impl IndexFileWriter {
    /// Start writing the index whose uncompressed path is `target`.
    pub fn new(target: &Path, compressions: &[Compression]) -> Result<Self> {
        if compressions.is_empty() {
            return Err(AptRepositoryError::invalid_config(format!(
                "no compressions configured for {}",
                target.display()
            )));
        }
        let parent = target.parent().ok_or_else(|| {
            AptRepositoryError::invalid_config(format!("{} has no parent", target.display()))
        })?;
        fs::create_dir_all(parent)?;
        let mut compressions = compressions.to_vec();
        compressions.sort();
        compressions.dedup();
        Ok(Self {
            target: target.to_path_buf(),
            compressions,
            buffer: Some(NamedTempFile::new_in(parent)?),
        })
    }

    /// Append one deb822 stanza, followed by the separating blank line.
    pub fn write_stanza(&mut self, stanza: &str) -> Result<()> {
        let buffer = self.buffer()?;
        buffer.write_all(stanza.trim_end_matches('\n').as_bytes())?;
        buffer.write_all(b"\n\n")?;
        Ok(())
    }

    fn buffer(&mut self) -> Result<&mut NamedTempFile> {
        let target = self.target.display().to_string();
        self.buffer
            .as_mut()
            .ok_or(AptRepositoryError::AlreadyClosed(target))
    }

    /// Write every configured variant into place and drop variants that are
    /// no longer configured. Returns the paths written.
    pub fn close(mut self) -> Result<Vec<PathBuf>> {
        let target = self.target.display().to_string();
        let mut buffer = self
            .buffer
            .take()
            .ok_or(AptRepositoryError::AlreadyClosed(target))?;
        buffer.flush()?;
        buffer.seek(SeekFrom::Start(0))?;
        let mut content = Vec::new();
        buffer.read_to_end(&mut content)?;

        let mut written = Vec::new();
        for compression in &self.compressions {
            let path = variant_path(&self.target, *compression);
            write_atomically(&path, &compression.compress(&content)?)?;
            debug!("Wrote {}", path.display());
            written.push(path);
        }
        prune_stale_variants(&self.target, &self.compressions)?;
        Ok(written)
    }
}

impl Write for IndexFileWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.write(buf),
            None => Err(std::io::Error::new(
                std::io::ErrorKind::Other,
                "index file already closed",
            )),
        }
    }

    fn flush(&mut self) -> std::io::Result<()> {
        match self.buffer.as_mut() {
            Some(buffer) => buffer.flush(),
            None => Ok(()),
        }
    }
}

/// Path of the `compression` variant of the index at `target`.
pub fn variant_path(target: &Path, compression: Compression) -> PathBuf {
    let mut name = target.as_os_str().to_os_string();
    name.push(compression.extension());
    PathBuf::from(name)
}

/// Remove variants of `target` whose compression is not in `active`.
///
/// Only the exact `<target><ext>` names are considered, so unrelated files in
/// the same directory are never touched.
pub fn prune_stale_variants(target: &Path, active: &[Compression]) -> Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for compression in Compression::all() {
        if active.contains(compression) {
            continue;
        }
        let path = variant_path(target, *compression);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!("Removed stale index variant {}", path.display());
                removed.push(path);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(removed)
}

/// Write `content` to `path` through a temporary file and a rename.
pub fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        AptRepositoryError::invalid_config(format!("{} has no parent", path.display()))
    })?;
    fs::create_dir_all(parent)?;
    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(content)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
