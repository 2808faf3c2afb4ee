//! Index generation through an external indexer process.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::aptconfig::{header, write_config, TreeStanza};
use super::{filelists, overrides, IndexBackend, IndexContext, PublishedRows, SuiteFilter};
use crate::config::IndexerConfig;
use crate::error::{PublishError, PublishResult};
use crate::model::{DistroSeries, Suite};
use crate::process::run_logged;
use crate::store::PublicationStore;

/// Prefix of log lines coming from the indexer.
const LOG_PREFIX: &str = "a-f: ";

/// Tag of the invocation that builds the Sources indexes.
const SOURCE_TAG: &str = "source";

/// Suite name used for the cache cleaning configuration.
const CLEANUP_SUITE: &str = "nonexistent-suite";

pub struct ExternalIndexer {
    config: IndexerConfig,
}

impl ExternalIndexer {
    pub fn new(config: IndexerConfig) -> Self {
        Self { config }
    }

    /// Run the indexer on `config_path`, returning its exit code.
    async fn run(&self, subcommand: &[&str], config_path: &Path) -> PublishResult<i32> {
        let mut argv = self.config.command.clone();
        argv.extend(subcommand.iter().map(|s| s.to_string()));
        argv.push(config_path.display().to_string());
        run_logged(&argv, LOG_PREFIX).await
    }

    fn failure(&self, failures: Vec<(String, i32)>) -> PublishError {
        PublishError::SubprocessFailure {
            command: self.config.command.join(" "),
            failures,
        }
    }

    /// Create the directories the indexer writes into.
    fn create_tree(
        &self,
        ctx: &IndexContext<'_>,
        series: &DistroSeries,
        suite: &Suite,
    ) -> PublishResult<()> {
        let suite_dir = ctx.layout.suite_dir(&suite.name());
        for component in ctx.archive.components(series) {
            let component_dir = suite_dir.join(&component);
            std::fs::create_dir_all(component_dir.join("source"))?;
            std::fs::create_dir_all(component_dir.join("i18n"))?;
            for arch in &series.architectures {
                std::fs::create_dir_all(component_dir.join(format!("binary-{}", arch)))?;
                for subcomp in ctx.archive.subcomponents() {
                    std::fs::create_dir_all(
                        component_dir
                            .join(subcomp)
                            .join(format!("binary-{}", arch)),
                    )?;
                }
            }
        }
        Ok(())
    }

    /// Stanzas for one suite: the main one plus one per subcomponent and
    /// component.
    fn suite_stanzas(
        &self,
        ctx: &IndexContext<'_>,
        series: &DistroSeries,
        suite: &Suite,
    ) -> Vec<TreeStanza> {
        let suite_name = suite.name();
        let components = ctx.archive.components(series);
        let mut stanzas = vec![TreeStanza::for_suite(
            ctx.layout,
            &suite_name,
            &components,
            &series.architectures,
            &series.index_compressors,
            series.include_long_descriptions,
        )];
        for component in &components {
            for subcomp in ctx.archive.subcomponents() {
                stanzas.push(TreeStanza::for_subcomponent(
                    ctx.layout,
                    &suite_name,
                    component,
                    subcomp,
                    &series.architectures,
                    &series.index_compressors,
                ));
            }
        }
        stanzas
    }

    /// Clear stale cache entries, at most once per configured interval.
    ///
    /// Returns whether a cleaning pass ran.
    pub async fn clean_caches(&self, ctx: &IndexContext<'_>) -> PublishResult<bool> {
        let config_path = ctx.layout.misc_root.join("apt-cleanup.conf");
        let interval = Duration::from_secs(self.config.cache_clean_interval_secs);
        if let Ok(metadata) = std::fs::metadata(&config_path) {
            let last_cleaned = metadata.modified()?;
            let age = SystemTime::now()
                .duration_since(last_cleaned)
                .unwrap_or_default();
            if age < interval {
                debug!("Caches cleaned {}s ago, skipping", age.as_secs());
                return Ok(false);
            }
        }

        // The clean command only cares about the cache databases, so a single
        // fake suite covering every architecture and component is enough.
        let mut architectures = BTreeSet::new();
        let mut components = BTreeSet::new();
        for series in &ctx.distribution.series {
            architectures.extend(series.architectures.iter().cloned());
            components.extend(ctx.archive.components(series));
        }
        let mut text = header(ctx.layout);
        text.push_str(
            &TreeStanza::for_suite(
                ctx.layout,
                CLEANUP_SUITE,
                &components.into_iter().collect::<Vec<_>>(),
                &architectures.into_iter().collect::<Vec<_>>(),
                apt_repository::DEFAULT_COMPRESSIONS,
                true,
            )
            .render(),
        );
        write_config(&config_path, &text)?;
        info!("Cleaning indexer caches for {}", ctx.archive.name);
        let code = self.run(&["clean"], &config_path).await?;
        if code != 0 {
            return Err(self.failure(vec![("clean".to_string(), code)]));
        }
        Ok(true)
    }
}

#[async_trait]
impl IndexBackend for ExternalIndexer {
    fn name(&self) -> &'static str {
        "external"
    }

    async fn generate(
        &self,
        ctx: &IndexContext<'_>,
        store: &dyn PublicationStore,
        filter: &dyn SuiteFilter,
        careful: bool,
    ) -> PublishResult<Vec<Suite>> {
        let selected = ctx.selected_suites(filter, careful);
        if selected.is_empty() {
            debug!("No suites to index for {}", ctx.archive.name);
            return Ok(Vec::new());
        }

        let rows = PublishedRows::load(store, &ctx.archive.name).await?;
        let mut stanzas = Vec::new();
        let mut tags = BTreeSet::new();
        for (series, suite) in &selected {
            info!("Writing overrides and file lists for {}", suite);
            overrides::write(ctx, series, suite, &rows)?;
            filelists::write(ctx, series, suite, &rows)?;
            self.create_tree(ctx, series, suite)?;
            stanzas.extend(self.suite_stanzas(ctx, series, suite));
            tags.extend(series.architectures.iter().cloned());
        }

        // One invocation per architecture, sources last.
        let mut failures = Vec::new();
        for tag in tags.into_iter().chain(std::iter::once(SOURCE_TAG.to_string())) {
            let mut text = header(ctx.layout);
            for stanza in stanzas.iter().filter_map(|s| s.restricted_to(&tag)) {
                text.push_str(&stanza.render());
            }
            let config_path = ctx.layout.misc_root.join(format!("apt_{}.conf", tag));
            write_config(&config_path, &text)?;

            info!(
                "Running {} for {} ({})",
                self.config.command.join(" "),
                ctx.archive.name,
                tag
            );
            let code = self.run(&["--no-contents", "generate"], &config_path).await?;
            if code != 0 {
                warn!("Indexer failed for {} with exit code {}", tag, code);
                failures.push((tag, code));
            }
        }
        if !failures.is_empty() {
            return Err(self.failure(failures));
        }

        self.clean_caches(ctx).await?;

        Ok(selected.into_iter().map(|(_, suite)| suite).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::error::ErrorKind;
    use crate::layout::ArchiveLayout;
    use crate::model::PublishingStatus;
    use crate::pool::DiskPool;
    use crate::store::testing::source;
    use crate::store::MemoryPublicationStore;

    fn indexer(command: &str) -> ExternalIndexer {
        ExternalIndexer::new(IndexerConfig {
            command: vec![command.to_string()],
            ..IndexerConfig::default()
        })
    }

    #[tokio::test]
    async fn test_generate_writes_inputs() {
        let td = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(td.path().join("ubuntutest"));
        layout.setup().unwrap();
        let pool = DiskPool::new(&layout.archive_root);
        let distro = distribution();
        let archive = primary();
        let ctx = IndexContext {
            distribution: &distro,
            archive: &archive,
            layout: &layout,
            pool: &pool,
        };
        let store = MemoryPublicationStore::new();
        store
            .add_source(source(1, "bar", "1.0-1", PublishingStatus::Published))
            .unwrap();

        let indexed = indexer("true")
            .generate(&ctx, &store, &dirty(&[release_suite()]), false)
            .await
            .unwrap();
        assert_eq!(indexed, vec![release_suite()]);

        let conf = std::fs::read_to_string(layout.misc_root.join("apt_i386.conf")).unwrap();
        assert!(conf.contains("tree \""));
        assert!(conf.contains("breezy-autotest/main\""));
        assert!(conf.contains("Sections \"debian-installer\";"));
        assert!(conf.contains("Architectures \"i386\";"));
        assert!(!conf.contains("Architectures \"hppa"));
        let conf = std::fs::read_to_string(layout.misc_root.join("apt_source.conf")).unwrap();
        assert!(conf.contains("Architectures \"source\";"));
        assert!(!conf.contains("debian-installer"));
        assert!(layout.misc_root.join("apt_hppa.conf").exists());
        assert!(layout
            .overrides_root
            .join("override.breezy-autotest.main.src")
            .exists());
        assert!(layout
            .suite_dir("breezy-autotest")
            .join("main/debian-installer/binary-i386")
            .is_dir());

        let cleanup = std::fs::read_to_string(layout.misc_root.join("apt-cleanup.conf")).unwrap();
        assert!(cleanup.contains("nonexistent-suite"));
        assert!(cleanup.contains("Architectures \"hppa i386 source\";"));
    }

    #[tokio::test]
    async fn test_cache_cleaning_is_rate_limited() {
        let td = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(td.path().join("ubuntutest"));
        layout.setup().unwrap();
        let pool = DiskPool::new(&layout.archive_root);
        let distro = distribution();
        let archive = primary();
        let ctx = IndexContext {
            distribution: &distro,
            archive: &archive,
            layout: &layout,
            pool: &pool,
        };
        let indexer = indexer("true");
        assert!(indexer.clean_caches(&ctx).await.unwrap());
        assert!(!indexer.clean_caches(&ctx).await.unwrap());

        let old = SystemTime::now() - Duration::from_secs(2 * 24 * 60 * 60);
        filetime::set_file_mtime(
            layout.misc_root.join("apt-cleanup.conf"),
            filetime::FileTime::from_system_time(old),
        )
        .unwrap();
        assert!(indexer.clean_caches(&ctx).await.unwrap());
    }

    #[tokio::test]
    async fn test_failure_names_invocation() {
        let td = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(td.path().join("ubuntutest"));
        layout.setup().unwrap();
        let pool = DiskPool::new(&layout.archive_root);
        let distro = distribution();
        let archive = primary();
        let ctx = IndexContext {
            distribution: &distro,
            archive: &archive,
            layout: &layout,
            pool: &pool,
        };
        let store = MemoryPublicationStore::new();
        let err = indexer("false")
            .generate(&ctx, &store, &dirty(&[release_suite()]), false)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::SubprocessFailure);
        assert_eq!(
            err.to_string(),
            "Failure(s) from false: hppa (returned 1), i386 (returned 1), source (returned 1)"
        );
    }

    #[tokio::test]
    async fn test_failure_names_architecture() {
        let td = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(td.path().join("ubuntutest"));
        layout.setup().unwrap();
        let pool = DiskPool::new(&layout.archive_root);
        let distro = distribution();
        let archive = primary();
        let ctx = IndexContext {
            distribution: &distro,
            archive: &archive,
            layout: &layout,
            pool: &pool,
        };
        let store = MemoryPublicationStore::new();
        // `sh -c script a b conf`: the configuration path is $2.
        let hppa_fails = ExternalIndexer::new(IndexerConfig {
            command: vec![
                "sh".to_string(),
                "-c".to_string(),
                r#"case "$2" in *apt_hppa.conf) exit 3;; esac"#.to_string(),
            ],
            ..IndexerConfig::default()
        });
        let err = hppa_fails
            .generate(&ctx, &store, &dirty(&[release_suite()]), false)
            .await
            .unwrap_err();
        match err {
            PublishError::SubprocessFailure { failures, .. } => {
                assert_eq!(failures, vec![("hppa".to_string(), 3)]);
            }
            other => panic!("unexpected error: {}", other),
        }
        // The other architectures still ran.
        assert!(layout.misc_root.join("apt_source.conf").exists());
    }
}
