//! In-process index generation for small archives.
//!
//! Produces the same files as the external indexer (Sources, Packages per
//! architecture and subcomponent, Translation-en when long descriptions are
//! split out) directly from the published rows.

use std::collections::BTreeSet;
use std::path::Path;

use apt_repository::{
    hash_file, HashAlgorithm, HashSet, IndexFileWriter, Package, Source, SourceFileEntry,
};
use async_trait::async_trait;
use tracing::{debug, info};

use super::{IndexBackend, IndexContext, PublishedRows, SuiteFilter};
use crate::error::{PublishError, PublishResult};
use crate::model::{
    qualified_section, BinaryPublication, DistroSeries, SourcePublication, Suite,
};
use crate::store::PublicationStore;

#[derive(Debug, Default)]
pub struct NativeIndexer;

impl NativeIndexer {
    pub fn new() -> Self {
        Self
    }
}

fn hash_pool_file(path: &Path) -> PublishResult<(u64, HashSet)> {
    if !path.is_file() {
        return Err(PublishError::NotInPool {
            path: path.to_path_buf(),
        });
    }
    Ok(hash_file(path, HashAlgorithm::all())?)
}

fn source_stanza(ctx: &IndexContext<'_>, source: &SourcePublication) -> PublishResult<Source> {
    let mut files = Vec::new();
    for file in &source.files {
        let path = ctx
            .pool
            .path_for(&source.component, &source.name, &file.filename)?;
        let (size, hashes) = hash_pool_file(&path)?;
        files.push(SourceFileEntry::new(file.filename.as_str(), size, hashes));
    }
    Ok(Source {
        package: source.name.clone(),
        binaries: source.binaries.clone(),
        version: source.version.clone(),
        section: Some(qualified_section(&source.component, &source.section)),
        maintainer: source.maintainer.clone(),
        build_depends: source.build_depends.clone(),
        build_depends_indep: source.build_depends_indep.clone(),
        architecture: source
            .architecture
            .clone()
            .unwrap_or_else(|| "any".to_string()),
        standards_version: source.standards_version.clone(),
        format: source.format.clone(),
        directory: crate::pool::pool_directory(&source.component, &source.name)?,
        files,
        homepage: source.homepage.clone(),
    })
}

fn binary_stanza(ctx: &IndexContext<'_>, binary: &BinaryPublication) -> PublishResult<Package> {
    let path = ctx
        .pool
        .path_for(&binary.component, &binary.source_name, &binary.file.filename)?;
    let (size, hashes) = hash_pool_file(&path)?;
    Ok(Package {
        package: binary.name.clone(),
        source: binary.source_name.clone(),
        source_version: binary.source_version.clone(),
        version: binary.version.clone(),
        architecture: binary.architecture().to_string(),
        priority: Some(binary.priority.to_string()),
        section: Some(qualified_section(&binary.component, &binary.section)),
        installed_size: binary.installed_size,
        maintainer: binary.maintainer.clone(),
        relationships: binary.relationships.clone(),
        filename: ctx.pool.relative_path_for(
            &binary.component,
            &binary.source_name,
            &binary.file.filename,
        )?,
        size,
        hashes,
        phased_update_percentage: binary.phased_update_percentage,
        summary: binary.summary.clone().unwrap_or_default(),
        description: binary.description.clone().unwrap_or_default(),
        homepage: binary.homepage.clone(),
    })
}

impl NativeIndexer {
    fn index_suite(
        &self,
        ctx: &IndexContext<'_>,
        series: &DistroSeries,
        suite: &Suite,
        rows: &PublishedRows,
    ) -> PublishResult<()> {
        let suite_dir = ctx.layout.suite_dir(&suite.name());
        let compressors = &series.index_compressors;
        let separate_descriptions = !series.include_long_descriptions;

        for component in ctx.archive.components(series) {
            let component_dir = suite_dir.join(&component);

            let mut sources: Vec<&SourcePublication> =
                rows.sources_in(suite, &component).collect();
            sources.sort_by(|a, b| (&a.name, &a.version).cmp(&(&b.name, &b.version)));
            let mut writer =
                IndexFileWriter::new(&component_dir.join("source/Sources"), compressors)?;
            for source in sources {
                writer.write_stanza(&source_stanza(ctx, source)?.to_paragraph().to_string())?;
            }
            writer.close()?;

            let mut binaries: Vec<&BinaryPublication> =
                rows.binaries_in(suite, &component).collect();
            binaries.sort_by(|a, b| {
                (&a.name, &a.version, &a.arch_tag).cmp(&(&b.name, &b.version, &b.arch_tag))
            });

            // Keyed by (package, description md5) so each description is
            // translated once.
            let mut translations = BTreeSet::new();

            let mut subcomponents = vec![None];
            subcomponents.extend(ctx.archive.subcomponents().into_iter().map(Some));
            for arch in &series.architectures {
                for subcomp in &subcomponents {
                    let target = match subcomp {
                        None => component_dir.join(format!("binary-{}/Packages", arch)),
                        Some(subcomp) => component_dir
                            .join(subcomp)
                            .join(format!("binary-{}/Packages", arch)),
                    };
                    let mut writer = IndexFileWriter::new(&target, compressors)?;
                    for binary in binaries
                        .iter()
                        .filter(|b| &b.arch_tag == arch && b.format.subcomponent() == *subcomp)
                    {
                        let package = binary_stanza(ctx, binary)?;
                        writer.write_stanza(
                            &package.to_paragraph(separate_descriptions).to_string(),
                        )?;
                        if separate_descriptions && subcomp.is_none() {
                            translations.insert((
                                package.package.clone(),
                                package.description_md5(),
                                package.translation_paragraph().to_string(),
                            ));
                        }
                    }
                    writer.close()?;
                }
            }

            if separate_descriptions {
                let mut writer = IndexFileWriter::new(
                    &component_dir.join("i18n/Translation-en"),
                    compressors,
                )?;
                for (_, _, stanza) in &translations {
                    writer.write_stanza(stanza)?;
                }
                writer.close()?;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl IndexBackend for NativeIndexer {
    fn name(&self) -> &'static str {
        "native"
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
        for (series, suite) in &selected {
            info!("Writing indexes for {} in {}", suite, ctx.archive.name);
            self.index_suite(ctx, series, suite, &rows)?;
        }
        Ok(selected.into_iter().map(|(_, suite)| suite).collect())
    }
}
