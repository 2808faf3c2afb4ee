//! On-disk locations used while publishing an archive.

use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::error::{PublishError, PublishResult};
use crate::model::{Archive, ArchivePurpose, Distribution};

/// Directories belonging to one archive.
///
/// The archive root holds `pool/` and `dists/`; the other roots are
/// siblings named after it (`<root>-overrides`, `<root>-cache`, ...).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveLayout {
    pub archive_root: PathBuf,
    /// Where indexes are written. Normally `<archive_root>/dists`.
    pub dists_root: PathBuf,
    pub overrides_root: PathBuf,
    pub cache_root: PathBuf,
    pub misc_root: PathBuf,
    pub staging_root: PathBuf,
    pub temp_root: PathBuf,
    pub distscopy_root: PathBuf,
}

fn sibling(root: &Path, suffix: &str) -> PathBuf {
    let mut name = root.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

impl ArchiveLayout {
    /// Layout for an archive rooted at `archive_root`.
    pub fn new(archive_root: impl Into<PathBuf>) -> Self {
        let archive_root = archive_root.into();
        Self {
            dists_root: archive_root.join("dists"),
            overrides_root: sibling(&archive_root, "-overrides"),
            cache_root: sibling(&archive_root, "-cache"),
            misc_root: sibling(&archive_root, "-misc"),
            staging_root: sibling(&archive_root, "-staging"),
            temp_root: sibling(&archive_root, "-temp"),
            distscopy_root: sibling(&archive_root, "-distscopy"),
            archive_root,
        }
    }

    /// Layout of `archive` as configured.
    pub fn for_archive(
        config: &Config,
        distribution: &Distribution,
        archive: &Archive,
    ) -> PublishResult<Self> {
        let root = match archive.purpose {
            ArchivePurpose::Primary => config.archive_root.join(&distribution.name),
            ArchivePurpose::Partner => config
                .archive_root
                .join(format!("{}-partner", distribution.name)),
            ArchivePurpose::Ppa => {
                let owner = archive.owner.as_deref().ok_or_else(|| {
                    PublishError::Configuration(format!("PPA '{}' has no owner", archive.name))
                })?;
                config
                    .ppa_root()
                    .join(owner)
                    .join(&archive.name)
                    .join(&distribution.name)
            }
        };
        Ok(Self::new(root))
    }

    /// The same layout writing indexes somewhere else.
    pub fn with_dists_root(&self, dists_root: impl Into<PathBuf>) -> Self {
        Self {
            dists_root: dists_root.into(),
            ..self.clone()
        }
    }

    /// The live `dists` tree served to users.
    pub fn live_dists(&self) -> PathBuf {
        self.archive_root.join("dists")
    }

    /// The shadow copy of the live `dists` tree.
    pub fn backup_dists(&self) -> PathBuf {
        self.distscopy_root.join("dists")
    }

    /// Where the live tree sits while being swapped with the backup.
    pub fn working_dists(&self) -> PathBuf {
        self.archive_root.join("dists.in-progress")
    }

    pub fn suite_dir(&self, suite: &str) -> PathBuf {
        self.dists_root.join(suite)
    }

    /// Create every directory the publisher writes to.
    pub fn setup(&self) -> PublishResult<()> {
        for dir in [
            &self.archive_root,
            &self.dists_root,
            &self.overrides_root,
            &self.cache_root,
            &self.misc_root,
            &self.staging_root,
            &self.temp_root,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        std::fs::create_dir_all(self.archive_root.join("pool"))?;
        Ok(())
    }
}
