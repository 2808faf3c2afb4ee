//! The shadow copy of an archive's `dists` tree.
//!
//! Indexes are never written into the live tree. A run mirrors the live
//! tree into `<root>-distscopy/dists`, publishes into that copy, and then
//! swaps the two directories:
//!
//! ```text
//! dists            -> dists.in-progress
//! distscopy/dists  -> dists
//! dists.in-progress -> distscopy/dists
//! ```
//!
//! An interrupted swap is finished by [`recover_working_dists`].

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use apt_repository::{hash_file, HashAlgorithm};
use filetime::FileTime;
use tracing::{debug, info, warn};

use crate::error::{PublishError, PublishResult};
use crate::layout::ArchiveLayout;
use crate::model::Suite;

/// Result of promoting one staged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingOutcome {
    Updated,
    /// The backup already holds identical content.
    Unchanged,
}

fn same_metadata(a: &fs::Metadata, b: &fs::Metadata) -> bool {
    a.len() == b.len()
        && FileTime::from_last_modification_time(a) == FileTime::from_last_modification_time(b)
}

fn remove_path(path: &Path) -> std::io::Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Copy `from` to `to` through a temporary file, keeping the mtime.
fn copy_file(from: &Path, to: &Path) -> PublishResult<()> {
    let parent = to
        .parent()
        .ok_or_else(|| PublishError::Configuration(format!("{} has no parent", to.display())))?;
    fs::create_dir_all(parent)?;
    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    fs::copy(from, tmp.path())?;
    let mtime = FileTime::from_last_modification_time(&fs::metadata(from)?);
    filetime::set_file_mtime(tmp.path(), mtime)?;
    tmp.persist(to)?;
    Ok(())
}

/// Make the backup tree an exact copy of the live tree.
///
/// Files whose size and mtime already match are left alone.
pub fn sync_backup(layout: &ArchiveLayout) -> PublishResult<()> {
    let live = layout.live_dists();
    let backup = layout.backup_dists();
    fs::create_dir_all(&live)?;
    fs::create_dir_all(&backup)?;
    info!("Syncing {} to {}", live.display(), backup.display());

    // Drop whatever the live tree does not have.
    let mut extras = Vec::new();
    let mut walker = walkdir::WalkDir::new(&backup).min_depth(1).into_iter();
    while let Some(entry) = walker.next() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(&backup)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let counterpart = live.join(relative);
        let keep = match fs::symlink_metadata(&counterpart) {
            Ok(m) => m.file_type() == entry.file_type(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => return Err(e.into()),
        };
        if !keep {
            if entry.file_type().is_dir() {
                walker.skip_current_dir();
            }
            extras.push(entry.into_path());
        }
    }
    for extra in extras {
        debug!("Removing {} from backup", extra.display());
        remove_path(&extra)?;
    }

    let mut copied = 0;
    for entry in walkdir::WalkDir::new(&live).min_depth(1) {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(&live)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        let target = backup.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_symlink() {
            let link = fs::read_link(entry.path())?;
            if fs::read_link(&target).ok().as_ref() != Some(&link) {
                if fs::symlink_metadata(&target).is_ok() {
                    fs::remove_file(&target)?;
                }
                std::os::unix::fs::symlink(&link, &target)?;
            }
        } else {
            let source_meta = entry.metadata()?;
            let up_to_date = match fs::metadata(&target) {
                Ok(m) => same_metadata(&source_meta, &m),
                Err(_) => false,
            };
            if !up_to_date {
                copy_file(entry.path(), &target)?;
                copied += 1;
            }
        }
    }
    debug!("Copied {} files into backup", copied);
    Ok(())
}

fn same_content(a: &Path, b: &Path) -> PublishResult<bool> {
    let (a_meta, b_meta) = match (fs::metadata(a), fs::metadata(b)) {
        (Ok(a_meta), Ok(b_meta)) => (a_meta, b_meta),
        _ => return Ok(false),
    };
    if a_meta.len() != b_meta.len() {
        return Ok(false);
    }
    let (_, a_hash) = hash_file(a, &[HashAlgorithm::Sha256])?;
    let (_, b_hash) = hash_file(b, &[HashAlgorithm::Sha256])?;
    Ok(a_hash == b_hash)
}

/// Promote one staged file into the backup tree if its content differs.
pub fn merge_staged_file(staged: &Path, target: &Path) -> PublishResult<StagingOutcome> {
    if same_content(staged, target)? {
        return Ok(StagingOutcome::Unchanged);
    }
    copy_file(staged, target)?;
    Ok(StagingOutcome::Updated)
}

/// Merge `<staging_root>/<suite>/...` into the backup tree.
///
/// Only suites in `allowed` (`None` meaning all) are merged, since every
/// merged suite has to get a new Release file in the same run; the others
/// stay staged for a later run. Returns the suites that received new
/// content. Staged files stay where they are; merging them again is a
/// no-op.
pub fn merge_staged_files(
    layout: &ArchiveLayout,
    allowed: Option<&BTreeSet<Suite>>,
) -> PublishResult<BTreeSet<Suite>> {
    let mut dirty = BTreeSet::new();
    let entries = match fs::read_dir(&layout.staging_root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(dirty),
        Err(e) => return Err(e.into()),
    };
    let backup = layout.backup_dists();
    let mut suite_dirs = Vec::new();
    for entry in entries {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            suite_dirs.push(entry.path());
        }
    }
    suite_dirs.sort();

    for suite_dir in suite_dirs {
        let name = suite_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let suite: Suite = match name.parse() {
            Ok(suite) => suite,
            Err(e) => {
                warn!("Ignoring staged directory {}: {}", suite_dir.display(), e);
                continue;
            }
        };
        if allowed.map_or(false, |a| !a.contains(&suite)) {
            debug!("Leaving {} staged: suite not selected", suite);
            continue;
        }
        for entry in walkdir::WalkDir::new(&suite_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&layout.staging_root)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            let target = backup.join(relative);
            if merge_staged_file(entry.path(), &target)? == StagingOutcome::Updated {
                info!("Updated {} from staging", target.display());
                dirty.insert(suite.clone());
            }
        }
    }
    Ok(dirty)
}

/// Swap the published backup in as the live tree.
pub fn install_backup(layout: &ArchiveLayout) -> PublishResult<()> {
    let live = layout.live_dists();
    let backup = layout.backup_dists();
    let working = layout.working_dists();
    if working.exists() {
        return Err(PublishError::Configuration(format!(
            "{} exists; recover before publishing",
            working.display()
        )));
    }
    info!("Installing {} as {}", backup.display(), live.display());
    fs::rename(&live, &working)?;
    fs::rename(&backup, &live)?;
    fs::rename(&working, &backup)?;
    Ok(())
}

/// Finish a swap interrupted by [`install_backup`].
///
/// Returns whether anything had to be moved.
pub fn recover_working_dists(layout: &ArchiveLayout) -> PublishResult<bool> {
    let live = layout.live_dists();
    let backup = layout.backup_dists();
    let working = layout.working_dists();
    if !working.exists() {
        return Ok(false);
    }
    if !live.exists() {
        warn!("Restoring {} from {}", live.display(), working.display());
        fs::rename(&working, &live)?;
    } else if !backup.exists() {
        warn!("Restoring {} from {}", backup.display(), working.display());
        fs::rename(&working, &backup)?;
    } else {
        return Err(PublishError::Configuration(format!(
            "{}, {} and {} all exist; manual recovery needed",
            live.display(),
            backup.display(),
            working.display()
        )));
    }
    Ok(true)
}
