//! Publication of every archive of a distribution.
//!
//! Archives are published one after another. Each one is published into
//! its shadow copy, which is swapped in only when the run succeeded, so the
//! live tree is either fully updated or left untouched.

use std::collections::BTreeSet;
use std::future::Future;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::cache::RunCache;
use crate::config::Config;
use crate::distscopy::{install_backup, merge_staged_files, recover_working_dists, sync_backup};
use crate::error::{PublishError, PublishResult};
use crate::indexes::select_backend;
use crate::layout::ArchiveLayout;
use crate::librarian::BlobStore;
use crate::model::{Archive, ArchivePurpose, Distribution, Pocket, PublishingStatus, Suite};
use crate::publisher::{
    load_unfinished_suites, save_unfinished_suites, CarefulModes, PublishReport, Publisher,
};
use crate::signing::Signer;
use crate::store::PublicationStore;

#[derive(Debug, Clone, Default)]
pub struct PublishOptions {
    /// Only publish these suites. Empty means all.
    pub suites: Vec<Suite>,
    /// Only publish these archives. Empty means all.
    pub archives: Vec<String>,
    pub careful: CarefulModes,
    /// Only publish pending changes in the security pockets of the primary
    /// archive.
    pub security_only: bool,
}

pub struct DistributionPublisher<'a> {
    config: &'a Config,
    distribution: &'a Distribution,
    store: &'a dyn PublicationStore,
    blobs: &'a dyn BlobStore,
    signer: Option<&'a dyn Signer>,
    options: PublishOptions,
    cache: RunCache,
}

impl<'a> DistributionPublisher<'a> {
    pub fn new(
        config: &'a Config,
        distribution: &str,
        store: &'a dyn PublicationStore,
        blobs: &'a dyn BlobStore,
        signer: Option<&'a dyn Signer>,
        options: PublishOptions,
    ) -> PublishResult<Self> {
        let distribution = config.get_distribution(distribution).ok_or_else(|| {
            PublishError::Configuration(format!("unknown distribution {}", distribution))
        })?;
        for suite in &options.suites {
            if distribution.get_series(&suite.series).is_none() {
                return Err(PublishError::Configuration(format!(
                    "{} is not a suite of {}",
                    suite, distribution.name
                )));
            }
        }
        for name in &options.archives {
            if !config.archives_for(&distribution.name).any(|a| &a.name == name) {
                return Err(PublishError::Configuration(format!(
                    "{} is not an archive of {}",
                    name, distribution.name
                )));
            }
        }
        Ok(Self {
            config,
            distribution,
            store,
            blobs,
            signer,
            options,
            cache: RunCache::new(),
        })
    }

    fn archives(&self) -> Vec<&'a Archive> {
        let config = self.config;
        let distribution = self.distribution;
        config
            .archives_for(&distribution.name)
            .filter(|a| self.options.archives.is_empty() || self.options.archives.contains(&a.name))
            .filter(|a| !self.options.security_only || a.purpose == ArchivePurpose::Primary)
            .collect()
    }

    /// Suites `archive` may publish into, `None` meaning all of them.
    ///
    /// In security-only mode these are the security suites with pending
    /// work: pending publications or deletions, or indexes an interrupted
    /// run did not finish.
    pub async fn allowed_suites(&self, archive: &Archive) -> PublishResult<Option<BTreeSet<Suite>>> {
        let requested: Option<BTreeSet<Suite>> = if self.options.suites.is_empty() {
            None
        } else {
            Some(self.options.suites.iter().cloned().collect())
        };
        if !self.options.security_only {
            return Ok(requested);
        }

        let pending = [PublishingStatus::Pending];
        let mut security = BTreeSet::new();
        for source in self.store.source_publications(&archive.name, &pending).await? {
            security.insert(source.suite());
        }
        for binary in self.store.binary_publications(&archive.name, &pending).await? {
            security.insert(binary.suite());
        }
        security.extend(self.store.suites_with_pending_deletions(&archive.name).await?);
        let layout = ArchiveLayout::for_archive(self.config, self.distribution, archive)?;
        security.extend(load_unfinished_suites(&layout)?);
        security.retain(|s: &Suite| s.pocket == Pocket::Security);
        if let Some(requested) = requested {
            security.retain(|s| requested.contains(s));
        }
        Ok(Some(security))
    }

    async fn publish_archive(&mut self, archive: &'a Archive) -> PublishResult<Option<PublishReport>> {
        let allowed = self.allowed_suites(archive).await?;
        if self.options.security_only && allowed.as_ref().map_or(false, |a| a.is_empty()) {
            info!("Nothing to publish in the security pockets of {}", archive.name);
            return Ok(None);
        }

        let layout = ArchiveLayout::for_archive(self.config, self.distribution, archive)?;
        info!("Publishing {} into {}", archive.name, layout.archive_root.display());
        if recover_working_dists(&layout)? {
            warn!("Recovered from an interrupted swap in {}", archive.name);
        }
        let work = layout.with_dists_root(layout.backup_dists());
        work.setup()?;
        sync_backup(&layout)?;
        let staged = merge_staged_files(&layout, allowed.as_ref())?;
        let unfinished = load_unfinished_suites(&work)?;
        if !unfinished.is_empty() {
            info!(
                "Finishing {} suites left over by an earlier run of {}",
                unfinished.len(),
                archive.name
            );
        }

        let backend = select_backend(&self.config.indexer, archive);
        let mut publisher = Publisher::new(
            self.distribution,
            archive,
            work.clone(),
            self.store,
            self.blobs,
            self.signer,
            backend,
        )
        .with_allowed_suites(allowed);
        publisher.mark_dirty(staged.iter().cloned());
        publisher.mark_dirty(unfinished);

        let report = publisher
            .publish(self.options.careful, &mut self.cache, Utc::now())
            .await?;
        for rejection in &report.rejections {
            warn!(
                "{} {} was not published: {}",
                rejection.name, rejection.version, rejection.reason
            );
        }

        if report.changed_dists() || !staged.is_empty() {
            install_backup(&layout)?;
        } else {
            debug!("No changes to the dists tree of {}", archive.name);
        }
        let mut unfinished = load_unfinished_suites(&work)?;
        for suite in &report.released {
            unfinished.remove(suite);
        }
        save_unfinished_suites(&work, &unfinished)?;
        Ok(Some(report))
    }

    /// Undo what a failed archive run left behind.
    async fn recover(&self, archive: &Archive) {
        if let Err(e) = self.store.rollback().await {
            error!("Rolling back publication store failed: {}", e);
        }
        match ArchiveLayout::for_archive(self.config, self.distribution, archive) {
            Ok(layout) => {
                if let Err(e) = recover_working_dists(&layout) {
                    error!("Recovering dists of {} failed: {}", archive.name, e);
                }
            }
            Err(e) => error!("{}", e),
        }
    }

    /// Publish every archive, stopping early when `shutdown` completes.
    ///
    /// Failing archives do not stop the others; their errors are combined
    /// into [`PublishError::Batch`]. An interruption is returned as is.
    pub async fn run_until<F>(&mut self, shutdown: F) -> PublishResult<Vec<(String, PublishReport)>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut reports = Vec::new();
        let mut failures = Vec::new();

        for archive in self.archives() {
            let result = tokio::select! {
                result = self.publish_archive(archive) => result,
                _ = &mut shutdown => Err(PublishError::Interrupted),
            };
            match result {
                Ok(Some(report)) => reports.push((archive.name.clone(), report)),
                Ok(None) => {}
                Err(e) => {
                    error!("Publishing {} failed: {}", archive.name, e);
                    self.recover(archive).await;
                    if matches!(e, PublishError::Interrupted) {
                        return Err(e);
                    }
                    failures.push((archive.name.clone(), e.to_string()));
                }
            }
        }

        if !failures.is_empty() {
            return Err(PublishError::Batch { failures });
        }
        Ok(reports)
    }

    /// Publish every archive, stopping on Ctrl-C.
    pub async fn run(&mut self) -> PublishResult<Vec<(String, PublishReport)>> {
        self.run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                // Without a handler the run cannot be interrupted.
                warn!("Unable to listen for Ctrl-C: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Interrupted, stopping");
        })
        .await
    }
}
