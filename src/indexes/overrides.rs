//! Override files consumed by the external indexer.
//!
//! For each suite and component:
//!
//! * `override.<suite>.<component>`: `package\tpriority\tsection`
//! * `override.<suite>.<component>.src`: `package\tsection`
//! * `override.<suite>.<component>.<subcomponent>`: as the binary file
//! * `override.<suite>.extra.<component>`: `package\tHeader\tvalue`

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use super::{IndexContext, PublishedRows};
use crate::error::PublishResult;
use crate::model::{qualified_section, ArchivePurpose, DistroSeries, Suite};

/// Overrides of one component.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ComponentOverrides {
    /// `(package, section)`
    pub sources: BTreeSet<(String, String)>,
    /// Subcomponent (`None` for plain debs) to `(package, priority, section)`.
    pub binaries: BTreeMap<Option<&'static str>, BTreeSet<(String, String, String)>>,
    /// `(package or package/arch, header, value)`
    pub extra: BTreeSet<(String, String, String)>,
}

/// Fold the published rows of a suite into per-component overrides.
pub fn collect(
    ctx: &IndexContext<'_>,
    series: &DistroSeries,
    suite: &Suite,
    rows: &PublishedRows,
) -> BTreeMap<String, ComponentOverrides> {
    let subcomponents = ctx.archive.subcomponents();
    let mut overrides = BTreeMap::new();
    for component in ctx.archive.components(series) {
        let mut entry = ComponentOverrides::default();
        entry.binaries.insert(None, BTreeSet::new());
        for subcomp in &subcomponents {
            entry.binaries.insert(Some(*subcomp), BTreeSet::new());
        }

        for source in rows.sources_in(suite, &component) {
            entry.sources.insert((
                source.name.clone(),
                qualified_section(&component, &source.section),
            ));
        }

        for binary in rows.binaries_in(suite, &component) {
            let subcomp = binary.format.subcomponent();
            let Some(set) = entry.binaries.get_mut(&subcomp) else {
                debug!(
                    "Skipping {} {}: subcomponent not published",
                    binary.name, binary.version
                );
                continue;
            };
            set.insert((
                binary.name.clone(),
                binary.priority.to_string(),
                qualified_section(&component, &binary.section),
            ));
            if subcomp.is_some() {
                continue;
            }
            if ctx.archive.purpose == ArchivePurpose::Primary {
                entry.extra.insert((
                    binary.name.clone(),
                    "Origin".to_string(),
                    ctx.distribution.displayname.clone(),
                ));
                if let Some(bugs) = &ctx.distribution.bugs_url {
                    entry
                        .extra
                        .insert((binary.name.clone(), "Bugs".to_string(), bugs.clone()));
                }
            }
            if let Some(percentage) = binary.phased_update_percentage {
                entry.extra.insert((
                    format!("{}/{}", binary.name, binary.arch_tag),
                    "Phased-Update-Percentage".to_string(),
                    percentage.to_string(),
                ));
            }
        }
        overrides.insert(component, entry);
    }
    overrides
}

pub fn binary_override_path(dir: &Path, suite: &str, component: &str) -> PathBuf {
    dir.join(format!("override.{}.{}", suite, component))
}

pub fn source_override_path(dir: &Path, suite: &str, component: &str) -> PathBuf {
    dir.join(format!("override.{}.{}.src", suite, component))
}

pub fn subcomponent_override_path(
    dir: &Path,
    suite: &str,
    component: &str,
    subcomp: &str,
) -> PathBuf {
    dir.join(format!("override.{}.{}.{}", suite, component, subcomp))
}

pub fn extra_override_path(dir: &Path, suite: &str, component: &str) -> PathBuf {
    dir.join(format!("override.{}.extra.{}", suite, component))
}

/// Write `lines` to `path` through `path.new`, so readers never see a
/// partially written file.
pub(crate) fn write_lines<I>(path: &Path, lines: I) -> PublishResult<()>
where
    I: IntoIterator<Item = String>,
{
    let mut new_name = path.as_os_str().to_os_string();
    new_name.push(".new");
    let new_path = PathBuf::from(new_name);
    {
        let mut f = std::io::BufWriter::new(fs::File::create(&new_path)?);
        for line in lines {
            f.write_all(line.as_bytes())?;
            f.write_all(b"\n")?;
        }
        f.flush()?;
    }
    fs::rename(&new_path, path)?;
    Ok(())
}

fn binary_lines(entries: &BTreeSet<(String, String, String)>) -> Vec<String> {
    let mut lines = Vec::new();
    let mut previous: Option<&str> = None;
    for (package, priority, section) in entries {
        // One line per package; the first (sorted) override wins.
        if previous == Some(package.as_str()) {
            continue;
        }
        previous = Some(package.as_str());
        lines.push(format!("{}\t{}\t{}", package, priority, section));
    }
    lines
}

/// Fold admin-supplied `package\theader\tvalue` lines into `extra`.
fn merge_supplementary(
    extra: &mut BTreeSet<(String, String, String)>,
    content: &str,
    origin: &Path,
) {
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let fields: Vec<&str> = line.split('\t').collect();
        match fields.as_slice() {
            [package, header, value] => {
                extra.insert((
                    package.trim().to_string(),
                    header.trim().to_string(),
                    value.trim().to_string(),
                ));
            }
            _ => warn!("Skipping malformed line in {}: {:?}", origin.display(), line),
        }
    }
}

/// Write the override files of a suite.
pub fn write(
    ctx: &IndexContext<'_>,
    series: &DistroSeries,
    suite: &Suite,
    rows: &PublishedRows,
) -> PublishResult<()> {
    let dir = &ctx.layout.overrides_root;
    fs::create_dir_all(dir)?;
    let suite_name = suite.name();

    for (component, mut entry) in collect(ctx, series, suite, rows) {
        let mut source_lines = Vec::new();
        let mut previous: Option<&str> = None;
        for (package, section) in &entry.sources {
            if previous == Some(package.as_str()) {
                continue;
            }
            previous = Some(package.as_str());
            source_lines.push(format!("{}\t{}", package, section));
        }
        write_lines(
            &source_override_path(dir, &suite_name, &component),
            source_lines,
        )?;

        for (subcomp, entries) in &entry.binaries {
            let path = match subcomp {
                None => binary_override_path(dir, &suite_name, &component),
                Some(subcomp) => subcomponent_override_path(dir, &suite_name, &component, subcomp),
            };
            write_lines(&path, binary_lines(entries))?;
        }

        let supplementary = ctx
            .layout
            .misc_root
            .join(format!("more-extra.override.{}.{}", suite_name, component));
        match fs::read_to_string(&supplementary) {
            Ok(content) => {
                debug!("Merging {}", supplementary.display());
                merge_supplementary(&mut entry.extra, &content, &supplementary);
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let extra_lines = entry
            .extra
            .iter()
            .map(|(package, header, value)| format!("{}\t{}\t{}", package, header, value));
        write_lines(
            &extra_override_path(dir, &suite_name, &component),
            extra_lines,
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use super::*;
    use crate::layout::ArchiveLayout;
    use crate::model::{BinaryFormat, Priority, PublishingStatus};
    use crate::pool::DiskPool;
    use crate::store::testing::{binary, source};

    fn run(rows: &PublishedRows, layout: &ArchiveLayout) {
        let distro = distribution();
        let archive = primary();
        let pool = DiskPool::new(&layout.archive_root);
        let ctx = IndexContext {
            distribution: &distro,
            archive: &archive,
            layout,
            pool: &pool,
        };
        write(&ctx, &distro.series[0], &release_suite(), rows).unwrap();
    }

    #[test]
    fn test_source_override() {
        let td = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(td.path().join("ubuntutest"));
        let rows = PublishedRows {
            sources: vec![source(1, "bar", "1.0-1", PublishingStatus::Published)],
            binaries: vec![],
        };
        run(&rows, &layout);
        let dir = &layout.overrides_root;
        assert_eq!(
            fs::read_to_string(dir.join("override.breezy-autotest.main.src")).unwrap(),
            "bar\tdevel\n"
        );
        // Every component gets its files even when empty.
        assert_eq!(
            fs::read_to_string(dir.join("override.breezy-autotest.universe.src")).unwrap(),
            ""
        );
        assert_eq!(
            fs::read_to_string(dir.join("override.breezy-autotest.main")).unwrap(),
            ""
        );
        assert!(dir
            .join("override.breezy-autotest.main.debian-installer")
            .exists());
        assert!(!dir.join("override.breezy-autotest.main.debug").exists());
        assert!(!dir.join("override.breezy-autotest.main.src.new").exists());
    }

    #[test]
    fn test_binary_and_extra_overrides() {
        let td = tempfile::tempdir().unwrap();
        let layout = ArchiveLayout::new(td.path().join("ubuntutest"));
        let mut foo = binary(1, "foo", "666", PublishingStatus::Published);
        foo.priority = Priority::Extra;
        foo.phased_update_percentage = Some(30);
        let mut di = binary(2, "foo-udeb", "666", PublishingStatus::Published);
        di.format = BinaryFormat::Udeb;
        di.section = "debian-installer".to_string();
        let mut universe = binary(3, "baz", "1", PublishingStatus::Published);
        universe.component = "universe".to_string();
        universe.section = "libs".to_string();
        let rows = PublishedRows {
            sources: vec![],
            binaries: vec![foo, di, universe],
        };
        fs::create_dir_all(&layout.misc_root).unwrap();
        fs::write(
            layout
                .misc_root
                .join("more-extra.override.breezy-autotest.main"),
            "aaa\tTask\tminimal\nfoo\tOrigin\tUbuntu Test\nnot an override\nfoo\tTask\tminimal\n",
        )
        .unwrap();
        run(&rows, &layout);

        let dir = &layout.overrides_root;
        assert_eq!(
            fs::read_to_string(dir.join("override.breezy-autotest.main")).unwrap(),
            "foo\textra\tbase\n"
        );
        assert_eq!(
            fs::read_to_string(dir.join("override.breezy-autotest.main.debian-installer"))
                .unwrap(),
            "foo-udeb\tstandard\tdebian-installer\n"
        );
        assert_eq!(
            fs::read_to_string(dir.join("override.breezy-autotest.universe")).unwrap(),
            "baz\tstandard\tuniverse/libs\n"
        );
        let extra = fs::read_to_string(dir.join("override.breezy-autotest.extra.main")).unwrap();
        assert_eq!(
            extra,
            "aaa\tTask\tminimal\n\
             foo\tBugs\thttps://bugs.example.com/ubuntutest\n\
             foo\tOrigin\tUbuntu Test\n\
             foo\tTask\tminimal\n\
             foo/i386\tPhased-Update-Percentage\t30\n"
        );
    }
}
