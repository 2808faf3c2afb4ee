//! Publication of a single archive.
//!
//! A run goes through the following phases:
//!
//! * A: copy the files of pending publications into the pool and mark them
//!   published, then commit.
//! * A2: mark suites with outstanding deletions dirty.
//! * C: regenerate the indexes of dirty suites.
//! * D: write Release files for the suites whose indexes changed.
//!
//! Every phase can be re-run; a retried run never copies a pool file twice.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::cache::RunCache;
use crate::error::{PublishError, PublishResult};
use crate::indexes::{prune_stale_indexes, IndexBackend, IndexContext, SuiteFilter};
use crate::layout::ArchiveLayout;
use crate::librarian::BlobStore;
use crate::model::{
    Archive, Distribution, PublicationRef, PublishedFile, PublishingStatus, Suite,
};
use crate::pool::{AddFileOutcome, DiskPool};
use crate::release::ReleaseFileWriter;
use crate::signing::Signer;
use crate::store::PublicationStore;

/// Which phases should ignore the dirty state and cover every suite.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CarefulModes {
    /// Re-walk publications that are already published.
    pub publishing: bool,
    /// Regenerate indexes for every allowed suite.
    pub apt: bool,
    /// Rewrite Release files for every allowed suite.
    pub release: bool,
}

impl CarefulModes {
    pub fn all() -> Self {
        Self {
            publishing: true,
            apt: true,
            release: true,
        }
    }
}

/// A publication that could not be published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub publication: PublicationRef,
    pub name: String,
    pub version: String,
    pub reason: String,
}

/// Outcome of publishing one archive.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PublishReport {
    /// Publications flipped from pending to published.
    pub published: usize,
    pub rejections: Vec<Rejection>,
    /// Suites whose indexes were regenerated.
    pub indexed: Vec<Suite>,
    /// Suites whose Release file was rewritten.
    pub released: Vec<Suite>,
}

impl PublishReport {
    /// Whether the run changed anything under `dists`.
    pub fn changed_dists(&self) -> bool {
        !self.indexed.is_empty() || !self.released.is_empty()
    }
}

/// Suites dirtied by a committed phase A whose Release files have not
/// been installed yet. Kept in the misc root so an interrupted run is
/// finished by the next one.
const UNFINISHED_SUITES: &str = "unfinished-suites.json";

pub fn load_unfinished_suites(layout: &ArchiveLayout) -> PublishResult<BTreeSet<Suite>> {
    match std::fs::read(layout.misc_root.join(UNFINISHED_SUITES)) {
        Ok(content) => Ok(serde_json::from_slice(&content)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeSet::new()),
        Err(e) => Err(e.into()),
    }
}

/// Replace the recorded unfinished suites; an empty set removes the record.
pub fn save_unfinished_suites(
    layout: &ArchiveLayout,
    suites: &BTreeSet<Suite>,
) -> PublishResult<()> {
    let path = layout.misc_root.join(UNFINISHED_SUITES);
    if suites.is_empty() {
        return match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        };
    }
    apt_repository::write_atomically(&path, &serde_json::to_vec(suites)?)?;
    Ok(())
}

pub struct Publisher<'a> {
    distribution: &'a Distribution,
    archive: &'a Archive,
    layout: ArchiveLayout,
    pool: DiskPool,
    store: &'a dyn PublicationStore,
    blobs: &'a dyn BlobStore,
    signer: Option<&'a dyn Signer>,
    backend: Box<dyn IndexBackend>,
    allowed: Option<BTreeSet<Suite>>,
    dirty: BTreeSet<Suite>,
}

impl SuiteFilter for Publisher<'_> {
    fn is_allowed(&self, suite: &Suite) -> bool {
        self.allowed.as_ref().map_or(true, |a| a.contains(suite))
    }

    fn is_dirty(&self, suite: &Suite) -> bool {
        self.dirty.contains(suite)
    }
}

impl<'a> Publisher<'a> {
    /// `layout` decides where indexes are written; the pool always lives
    /// below its archive root.
    pub fn new(
        distribution: &'a Distribution,
        archive: &'a Archive,
        layout: ArchiveLayout,
        store: &'a dyn PublicationStore,
        blobs: &'a dyn BlobStore,
        signer: Option<&'a dyn Signer>,
        backend: Box<dyn IndexBackend>,
    ) -> Self {
        let pool = DiskPool::new(&layout.archive_root);
        Self {
            distribution,
            archive,
            layout,
            pool,
            store,
            blobs,
            signer,
            backend,
            allowed: None,
            dirty: BTreeSet::new(),
        }
    }

    /// Restrict the run to `suites`. `None` allows every suite.
    pub fn with_allowed_suites(mut self, suites: Option<BTreeSet<Suite>>) -> Self {
        self.allowed = suites;
        self
    }

    pub fn mark_dirty(&mut self, suites: impl IntoIterator<Item = Suite>) {
        for suite in suites {
            if self.is_allowed(&suite) {
                debug!("Marking {} dirty", suite);
                self.dirty.insert(suite);
            }
        }
    }

    pub fn dirty_suites(&self) -> &BTreeSet<Suite> {
        &self.dirty
    }

    pub fn pool(&self) -> &DiskPool {
        &self.pool
    }

    pub fn context(&self) -> IndexContext<'_> {
        IndexContext {
            distribution: self.distribution,
            archive: self.archive,
            layout: &self.layout,
            pool: &self.pool,
        }
    }

    /// Whether publications may land in `suite`, logging why not.
    fn may_publish(&self, suite: &Suite) -> bool {
        if !self.is_allowed(suite) {
            return false;
        }
        let Some(series) = self.distribution.get_series(&suite.series) else {
            warn!(
                "{} has publications for unknown series {}",
                self.archive.name, suite.series
            );
            return false;
        };
        if !self.archive.can_modify_suite(series, suite.pocket) {
            warn!(
                "Not publishing into {} of {}: suite is closed",
                suite, self.archive.name
            );
            return false;
        }
        true
    }

    async fn copy_files(
        &self,
        component: &str,
        source_name: &str,
        files: &[PublishedFile],
        cache: &mut RunCache,
    ) -> PublishResult<()> {
        for file in files {
            let content = self.blobs.fetch(&file.blob_id).await?;
            let outcome = self
                .pool
                .add_file(component, source_name, &file.filename, &content)?;
            if outcome == AddFileOutcome::Added {
                cache.record_added(&self.archive.name, content.len() as u64);
            }
        }
        Ok(())
    }

    /// Fails once the pool has grown past the archive's authorized size.
    fn check_quota(&self, cache: &mut RunCache) -> PublishResult<()> {
        let Some(quota) = self.archive.authorized_size else {
            return Ok(());
        };
        let used = cache.pool_usage(&self.archive.name, &self.pool)?;
        if used > quota {
            return Err(PublishError::QuotaExceeded {
                archive: self.archive.name.clone(),
                used,
                quota,
            });
        }
        Ok(())
    }

    /// Phase A. Pool conflicts and quota rejections are reported, not
    /// raised; the publication stays pending.
    pub async fn publish_pending(
        &mut self,
        careful: bool,
        cache: &mut RunCache,
    ) -> PublishResult<PublishReport> {
        let statuses: &[PublishingStatus] = if careful {
            &[PublishingStatus::Pending, PublishingStatus::Published]
        } else {
            &[PublishingStatus::Pending]
        };
        let mut report = PublishReport::default();

        let sources = self
            .store
            .source_publications(&self.archive.name, statuses)
            .await?;
        for source in sources {
            let suite = source.suite();
            if !self.may_publish(&suite) {
                continue;
            }
            let pending = source.status == PublishingStatus::Pending;
            let result = if pending {
                self.check_quota(cache)
            } else {
                Ok(())
            };
            let result = match result {
                Ok(()) => {
                    self.copy_files(&source.component, &source.name, &source.files, cache)
                        .await
                }
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => {}
                Err(e) if e.is_rejection() => {
                    warn!("Rejecting {} {}: {}", source.name, source.version, e);
                    report.rejections.push(Rejection {
                        publication: source.reference(),
                        name: source.name.clone(),
                        version: source.version.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            }
            if pending {
                self.store.set_published(source.reference()).await?;
                report.published += 1;
                info!("Published {} {} in {}", source.name, source.version, suite);
            }
            self.dirty.insert(suite);
        }

        let binaries = self
            .store
            .binary_publications(&self.archive.name, statuses)
            .await?;
        for binary in binaries {
            let suite = binary.suite();
            if !self.may_publish(&suite) {
                continue;
            }
            let files = std::slice::from_ref(&binary.file);
            match self
                .copy_files(&binary.component, &binary.source_name, files, cache)
                .await
            {
                Ok(()) => {}
                Err(e) if e.is_rejection() => {
                    warn!("Rejecting {} {}: {}", binary.name, binary.version, e);
                    report.rejections.push(Rejection {
                        publication: binary.reference(),
                        name: binary.name.clone(),
                        version: binary.version.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            }
            if binary.status == PublishingStatus::Pending {
                self.store.set_published(binary.reference()).await?;
                report.published += 1;
                info!(
                    "Published {} {} ({}) in {}",
                    binary.name, binary.version, binary.arch_tag, suite
                );
            }
            self.dirty.insert(suite);
        }

        Ok(report)
    }

    /// Phase A2.
    pub async fn dirty_pending_deletions(&mut self) -> PublishResult<()> {
        let suites = self
            .store
            .suites_with_pending_deletions(&self.archive.name)
            .await?;
        for suite in suites {
            if self.dirty.contains(&suite) || !self.is_allowed(&suite) {
                continue;
            }
            let Some(series) = self.distribution.get_series(&suite.series) else {
                continue;
            };
            if !self.archive.can_modify_suite(series, suite.pocket) {
                debug!("Ignoring deletions in closed suite {}", suite);
                continue;
            }
            info!("Marking {} dirty: it has pending deletions", suite);
            self.dirty.insert(suite);
        }
        Ok(())
    }

    /// Phase C. Returns the suites whose indexes were regenerated.
    pub async fn generate_indexes(&self, careful: bool) -> PublishResult<Vec<Suite>> {
        let ctx = self.context();
        info!(
            "Generating indexes for {} with the {} backend",
            self.archive.name,
            self.backend.name()
        );
        let indexed = self
            .backend
            .generate(&ctx, self.store, self, careful)
            .await?;
        for suite in &indexed {
            if let Some(series) = self.distribution.get_series(&suite.series) {
                prune_stale_indexes(&ctx, series, suite)?;
            }
        }
        Ok(indexed)
    }

    /// Phase D. Covers dirty and freshly indexed suites, or every allowed
    /// suite with a directory when careful.
    pub async fn write_release_files(
        &self,
        indexed: &[Suite],
        careful: bool,
        date: DateTime<Utc>,
    ) -> PublishResult<Vec<Suite>> {
        let writer = ReleaseFileWriter::new(self.context(), self.signer, date);
        let mut written = Vec::new();
        for series in &self.distribution.series {
            for pocket in self.archive.pockets() {
                let suite = Suite::new(series.name.clone(), pocket);
                if !self.is_allowed(&suite) {
                    continue;
                }
                let wanted = if careful {
                    self.layout.suite_dir(&suite.name()).is_dir()
                } else {
                    self.dirty.contains(&suite) || indexed.contains(&suite)
                };
                if !wanted {
                    continue;
                }
                writer.write(series, &suite).await?;
                written.push(suite);
            }
        }
        Ok(written)
    }

    /// Run every phase. Phase A is committed before indexes are generated.
    pub async fn publish(
        &mut self,
        careful: CarefulModes,
        cache: &mut RunCache,
        date: DateTime<Utc>,
    ) -> PublishResult<PublishReport> {
        let mut report = self.publish_pending(careful.publishing, cache).await?;
        self.store.commit().await?;
        self.dirty_pending_deletions().await?;
        if !self.dirty.is_empty() {
            let mut unfinished = load_unfinished_suites(&self.layout)?;
            unfinished.extend(self.dirty.iter().cloned());
            save_unfinished_suites(&self.layout, &unfinished)?;
        }
        report.indexed = self.generate_indexes(careful.apt).await?;
        report.released = self
            .write_release_files(&report.indexed, careful.release, date)
            .await?;
        info!(
            "Published {} publications in {}; {} suites indexed, {} Release files",
            report.published,
            self.archive.name,
            report.indexed.len(),
            report.released.len()
        );
        Ok(report)
    }
}
