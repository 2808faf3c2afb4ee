//! Generation of the per-suite indexes (Sources, Packages, Translation).
//!
//! Two backends exist: [`external::ExternalIndexer`] derives overrides and
//! file lists and drives an external indexer, [`native::NativeIndexer`]
//! writes the indexes itself from the published rows.

use std::path::PathBuf;

use apt_repository::Compression;
use async_trait::async_trait;
use tracing::debug;

use crate::config::{BackendChoice, IndexerConfig};
use crate::error::PublishResult;
use crate::layout::ArchiveLayout;
use crate::model::{
    Archive, ArchivePurpose, BinaryPublication, Distribution, DistroSeries, PublishingStatus,
    SourcePublication, Suite,
};
use crate::pool::DiskPool;
use crate::store::PublicationStore;

pub mod aptconfig;
pub mod external;
pub mod filelists;
pub mod native;
pub mod overrides;

/// Which suites a publisher may touch, and which changed in this run.
pub trait SuiteFilter: Send + Sync {
    fn is_allowed(&self, suite: &Suite) -> bool;
    fn is_dirty(&self, suite: &Suite) -> bool;
}

/// Everything an index backend needs to know about the archive.
#[derive(Debug, Clone, Copy)]
pub struct IndexContext<'a> {
    pub distribution: &'a Distribution,
    pub archive: &'a Archive,
    pub layout: &'a ArchiveLayout,
    pub pool: &'a DiskPool,
}

impl<'a> IndexContext<'a> {
    /// Suites to index: the allowed ones when careful, else the dirty ones.
    pub fn selected_suites(
        &self,
        filter: &dyn SuiteFilter,
        careful: bool,
    ) -> Vec<(&'a DistroSeries, Suite)> {
        let mut selected = Vec::new();
        for series in &self.distribution.series {
            for pocket in self.archive.pockets() {
                let suite = Suite::new(series.name.clone(), pocket);
                if !filter.is_allowed(&suite) {
                    continue;
                }
                if !careful && !filter.is_dirty(&suite) {
                    debug!("Skipping indexes for clean suite {}", suite);
                    continue;
                }
                selected.push((series, suite));
            }
        }
        selected
    }

    /// Index files a backend is expected to produce for a suite, relative to
    /// the suite directory and without compression extension.
    pub fn core_indexes(&self, series: &DistroSeries) -> Vec<String> {
        let mut paths = Vec::new();
        for component in self.archive.components(series) {
            paths.push(format!("{}/source/Sources", component));
            for arch in &series.architectures {
                paths.push(format!("{}/binary-{}/Packages", component, arch));
                for subcomp in self.archive.subcomponents() {
                    paths.push(format!("{}/{}/binary-{}/Packages", component, subcomp, arch));
                }
            }
        }
        paths
    }

    /// Every index file this publisher manages for a suite, including the
    /// optional English translations.
    pub fn managed_indexes(&self, series: &DistroSeries) -> Vec<String> {
        let mut paths = self.core_indexes(series);
        for component in self.archive.components(series) {
            paths.push(format!("{}/i18n/Translation-en", component));
        }
        paths
    }
}

/// Currently published rows of one archive.
#[derive(Debug, Default)]
pub struct PublishedRows {
    pub sources: Vec<SourcePublication>,
    pub binaries: Vec<BinaryPublication>,
}

impl PublishedRows {
    pub async fn load(store: &dyn PublicationStore, archive: &str) -> PublishResult<Self> {
        let statuses = [PublishingStatus::Published];
        Ok(Self {
            sources: store.source_publications(archive, &statuses).await?,
            binaries: store.binary_publications(archive, &statuses).await?,
        })
    }

    pub fn sources_in<'s>(
        &'s self,
        suite: &'s Suite,
        component: &'s str,
    ) -> impl Iterator<Item = &'s SourcePublication> {
        self.sources
            .iter()
            .filter(move |p| p.series == suite.series && p.pocket == suite.pocket)
            .filter(move |p| p.component == component)
    }

    pub fn binaries_in<'s>(
        &'s self,
        suite: &'s Suite,
        component: &'s str,
    ) -> impl Iterator<Item = &'s BinaryPublication> {
        self.binaries
            .iter()
            .filter(move |p| p.series == suite.series && p.pocket == suite.pocket)
            .filter(move |p| p.component == component)
    }
}

#[async_trait]
pub trait IndexBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Generate indexes for the selected suites; returns the suites indexed.
    async fn generate(
        &self,
        ctx: &IndexContext<'_>,
        store: &dyn PublicationStore,
        filter: &dyn SuiteFilter,
        careful: bool,
    ) -> PublishResult<Vec<Suite>>;
}

/// Pick the backend for an archive.
pub fn select_backend(config: &IndexerConfig, archive: &Archive) -> Box<dyn IndexBackend> {
    let external = match config.backend {
        BackendChoice::External => true,
        BackendChoice::Native => false,
        BackendChoice::Auto => archive.purpose == ArchivePurpose::Primary,
    };
    if external {
        Box::new(external::ExternalIndexer::new(config.clone()))
    } else {
        Box::new(native::NativeIndexer::new())
    }
}

/// Remove compressed variants of managed indexes that the series no longer
/// produces. Returns the removed paths.
pub fn prune_stale_indexes(
    ctx: &IndexContext<'_>,
    series: &DistroSeries,
    suite: &Suite,
) -> PublishResult<Vec<PathBuf>> {
    let suite_dir = ctx.layout.suite_dir(&suite.name());
    let active: &[Compression] = &series.index_compressors;
    let mut removed = Vec::new();
    for index in ctx.managed_indexes(series) {
        let target = suite_dir.join(&index);
        if target.parent().map(|p| p.is_dir()).unwrap_or(false) {
            removed.extend(apt_repository::prune_stale_variants(&target, active)?);
        }
    }
    for path in &removed {
        debug!("Removed stale index {}", path.display());
    }
    Ok(removed)
}
