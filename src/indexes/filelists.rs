//! File lists telling the external indexer which pool files belong to each
//! suite, component and architecture.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::overrides::write_lines;
use super::{IndexContext, PublishedRows};
use crate::error::PublishResult;
use crate::model::{DistroSeries, Suite};

pub fn source_list_path(dir: &Path, suite: &str, component: &str) -> PathBuf {
    dir.join(format!("{}_{}_source", suite, component))
}

pub fn binary_list_path(
    dir: &Path,
    suite: &str,
    component: &str,
    subcomp: Option<&str>,
    arch: &str,
) -> PathBuf {
    match subcomp {
        None => dir.join(format!("{}_{}_binary-{}", suite, component, arch)),
        Some(subcomp) => dir.join(format!(
            "{}_{}_{}_binary-{}",
            suite, component, subcomp, arch
        )),
    }
}

/// Absolute pool paths keyed by list file, each list sorted by package name.
pub fn collect(
    ctx: &IndexContext<'_>,
    series: &DistroSeries,
    suite: &Suite,
    rows: &PublishedRows,
) -> PublishResult<BTreeMap<PathBuf, Vec<String>>> {
    let dir = &ctx.layout.overrides_root;
    let suite_name = suite.name();
    let subcomponents = ctx.archive.subcomponents();
    let mut lists: BTreeMap<PathBuf, Vec<(String, String)>> = BTreeMap::new();

    for component in ctx.archive.components(series) {
        let source_list = lists
            .entry(source_list_path(dir, &suite_name, &component))
            .or_default();
        for source in rows.sources_in(suite, &component) {
            for file in &source.files {
                let path = ctx
                    .pool
                    .path_for(&component, &source.name, &file.filename)?;
                source_list.push((source.name.clone(), path.display().to_string()));
            }
        }

        for arch in &series.architectures {
            lists
                .entry(binary_list_path(dir, &suite_name, &component, None, arch))
                .or_default();
            for subcomp in &subcomponents {
                lists
                    .entry(binary_list_path(
                        dir,
                        &suite_name,
                        &component,
                        Some(subcomp),
                        arch,
                    ))
                    .or_default();
            }
        }

        for binary in rows.binaries_in(suite, &component) {
            let subcomp = binary.format.subcomponent();
            let list = binary_list_path(dir, &suite_name, &component, subcomp, &binary.arch_tag);
            let Some(entries) = lists.get_mut(&list) else {
                warn!(
                    "Not listing {} {} for {}: architecture or subcomponent not published",
                    binary.name, binary.version, binary.arch_tag
                );
                continue;
            };
            let path = ctx
                .pool
                .path_for(&component, &binary.source_name, &binary.file.filename)?;
            entries.push((binary.name.clone(), path.display().to_string()));
        }
    }

    Ok(lists
        .into_iter()
        .map(|(list, mut entries)| {
            entries.sort();
            entries.dedup();
            (list, entries.into_iter().map(|(_, path)| path).collect())
        })
        .collect())
}

/// Write the file lists of a suite. Every expected list is written, even
/// when empty.
pub fn write(
    ctx: &IndexContext<'_>,
    series: &DistroSeries,
    suite: &Suite,
    rows: &PublishedRows,
) -> PublishResult<()> {
    std::fs::create_dir_all(&ctx.layout.overrides_root)?;
    for (path, entries) in collect(ctx, series, suite, rows)? {
        write_lines(&path, entries)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::layout::ArchiveLayout;
    use crate::model::{PublishedFile, PublishingStatus};
    use crate::pool::DiskPool;
    use crate::store::testing::{binary, source};

    #[test]
    fn test_lists_match_pool_paths() {
        let td = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(td.path().join("ubuntutest"));
        let pool = DiskPool::new(&layout.archive_root);
        let distro = distribution();
        let archive = primary();
        let ctx = IndexContext {
            distribution: &distro,
            archive: &archive,
            layout: &layout,
            pool: &pool,
        };
        let mut bar = source(1, "bar", "1.0-1", PublishingStatus::Published);
        bar.files.push(PublishedFile {
            filename: "bar_1.0.orig.tar.gz".to_string(),
            blob_id: "orig".to_string(),
        });
        let rows = PublishedRows {
            sources: vec![bar],
            binaries: vec![
                binary(2, "zoo", "1", PublishingStatus::Published),
                binary(3, "libfoo1", "1", PublishingStatus::Published),
            ],
        };
        write(&ctx, &distro.series[0], &release_suite(), &rows).unwrap();

        let dir = &layout.overrides_root;
        let sources = std::fs::read_to_string(dir.join("breezy-autotest_main_source")).unwrap();
        let expected: Vec<String> = ["bar_1.0-1.dsc", "bar_1.0.orig.tar.gz"]
            .iter()
            .map(|f| pool.path_for("main", "bar", f).unwrap().display().to_string())
            .collect();
        assert_eq!(sources.lines().collect::<Vec<_>>(), expected);

        let i386 = std::fs::read_to_string(dir.join("breezy-autotest_main_binary-i386")).unwrap();
        let lines: Vec<_> = i386.lines().collect();
        assert_eq!(
            lines,
            vec![
                pool.path_for("main", "libfoo1", "libfoo1_1_i386.deb")
                    .unwrap()
                    .display()
                    .to_string(),
                pool.path_for("main", "zoo", "zoo_1_i386.deb")
                    .unwrap()
                    .display()
                    .to_string(),
            ]
        );
        assert!(lines.iter().all(|l| l.contains("/pool/main/")));

        for empty in [
            "breezy-autotest_main_binary-hppa",
            "breezy-autotest_universe_source",
            "breezy-autotest_main_debian-installer_binary-i386",
        ] {
            assert_eq!(std::fs::read_to_string(dir.join(empty)).unwrap(), "");
        }
    }
}
