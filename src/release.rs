//! Release manifests for published suites.

use std::fs;
use std::path::Path;

use apt_repository::{
    variant_path, write_atomically, ComponentRelease, HashAlgorithm, HashedFile, Release,
    ReleaseBuilder,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::error::{PublishError, PublishResult};
use crate::indexes::IndexContext;
use crate::model::{ArchivePurpose, DistroSeries, Pocket, Suite};
use crate::signing::Signer;

/// Files at the top of a suite that are never listed in its manifest.
const UNLISTED: &[&str] = &["Release", "Release.gpg", "InRelease"];

pub struct ReleaseFileWriter<'a> {
    ctx: IndexContext<'a>,
    signer: Option<&'a dyn Signer>,
    date: DateTime<Utc>,
}

impl<'a> ReleaseFileWriter<'a> {
    pub fn new(ctx: IndexContext<'a>, signer: Option<&'a dyn Signer>, date: DateTime<Utc>) -> Self {
        Self { ctx, signer, date }
    }

    /// `(Origin, Label)` of the archive.
    pub fn origin_and_label(&self) -> (String, String) {
        let archive = self.ctx.archive;
        match archive.purpose {
            ArchivePurpose::Primary => {
                let name = archive
                    .displayname
                    .clone()
                    .unwrap_or_else(|| self.ctx.distribution.displayname.clone());
                (name.clone(), name)
            }
            ArchivePurpose::Partner => ("Canonical".to_string(), "Partner archive".to_string()),
            ArchivePurpose::Ppa => {
                let owner = archive.owner.as_deref().unwrap_or_default();
                // Distinct origins let users pin individual PPAs.
                let origin = if archive.name == "ppa" {
                    format!("LP-PPA-{}", owner)
                } else {
                    format!("LP-PPA-{}-{}", owner, archive.name)
                };
                let owner_name = archive.owner_displayname.as_deref().unwrap_or(owner);
                (origin, format!("PPA for {}", owner_name))
            }
        }
    }

    pub fn description(&self, series: &DistroSeries, suite: &Suite) -> String {
        let tail = match suite.pocket {
            Pocket::Release => series.version.as_str(),
            pocket => pocket.title(),
        };
        format!(
            "{} {} {}",
            self.ctx.distribution.displayname, series.displayname, tail
        )
    }

    /// Fail if an index the manifest must list was never generated.
    fn check_core_indexes(&self, series: &DistroSeries, suite: &Suite) -> PublishResult<()> {
        let suite_dir = self.ctx.layout.suite_dir(&suite.name());
        for index in self.ctx.core_indexes(series) {
            for compression in &series.index_compressors {
                let path = variant_path(&suite_dir.join(&index), *compression);
                if !path.is_file() {
                    let relative = path
                        .strip_prefix(&suite_dir)
                        .unwrap_or(&path)
                        .display()
                        .to_string();
                    return Err(PublishError::MissingIndexFile {
                        suite: suite.name(),
                        path: relative,
                    });
                }
            }
        }
        Ok(())
    }

    fn write_component_releases(
        &self,
        series: &DistroSeries,
        suite: &Suite,
        origin: &str,
        label: &str,
    ) -> PublishResult<()> {
        let suite_dir = self.ctx.layout.suite_dir(&suite.name());
        let mut targets = vec!["source".to_string()];
        targets.extend(series.architectures.iter().cloned());
        for component in self.ctx.archive.components(series) {
            for target in &targets {
                let dir = if target == "source" {
                    suite_dir.join(&component).join("source")
                } else {
                    suite_dir.join(&component).join(format!("binary-{}", target))
                };
                let stanza = ComponentRelease {
                    archive: suite.name(),
                    version: series.version.clone(),
                    component: component.clone(),
                    origin: origin.to_string(),
                    label: label.to_string(),
                    architecture: target.clone(),
                };
                write_atomically(&dir.join("Release"), stanza.to_string().as_bytes())?;
            }
        }
        Ok(())
    }

    /// Write `<component>/i18n/Index` when translations exist.
    fn write_i18n_index(&self, i18n_dir: &Path) -> PublishResult<bool> {
        let entries = match fs::read_dir(i18n_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("Translation-") && entry.file_type()?.is_file() {
                names.push(name);
            }
        }
        if names.is_empty() {
            return Ok(false);
        }
        names.sort();

        let mut index = String::from("SHA1:\n");
        for name in names {
            let file = HashedFile::from_path(name.as_str(), &i18n_dir.join(&name))?;
            index.push_str(&format!(
                " {} {:>16} {}\n",
                file.get_hash(&HashAlgorithm::Sha1).unwrap_or_default(),
                file.size,
                file.path
            ));
        }
        write_atomically(&i18n_dir.join("Index"), index.as_bytes())?;
        Ok(true)
    }

    /// Every file below the suite directory, except its Release files.
    fn collect_manifest(&self, suite_dir: &Path) -> PublishResult<Vec<HashedFile>> {
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(suite_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(suite_dir)
                .map_err(|e| std::io::Error::other(e.to_string()))?;
            let name = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if UNLISTED.contains(&name.as_str()) {
                continue;
            }
            files.push(HashedFile::from_path(name, entry.path())?);
        }
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(files)
    }

    /// Write (and sign, when the archive has a key) the Release file of a
    /// suite whose indexes have been generated.
    pub async fn write(&self, series: &DistroSeries, suite: &Suite) -> PublishResult<Release> {
        let suite_name = suite.name();
        let suite_dir = self.ctx.layout.suite_dir(&suite_name);
        info!("Writing Release file for {}", suite_name);

        self.check_core_indexes(series, suite)?;

        let (origin, label) = self.origin_and_label();
        self.write_component_releases(series, suite, &origin, &label)?;
        for component in self.ctx.archive.components(series) {
            if self.write_i18n_index(&suite_dir.join(&component).join("i18n"))? {
                debug!("Wrote i18n Index for {}/{}", suite_name, component);
            }
        }

        let not_automatic = match suite.pocket {
            Pocket::Proposed => true,
            Pocket::Backports => series.backports_not_automatic,
            _ => false,
        };
        let mut architectures = series.architectures.clone();
        architectures.sort();
        let mut release = ReleaseBuilder::new()
            .origin(origin)
            .label(label)
            .suite(suite_name.as_str())
            .version(series.version.as_str())
            .codename(series.name.as_str())
            .date(self.date)
            .architectures(architectures)
            .components(self.ctx.archive.components(series))
            .description(self.description(series, suite))
            .not_automatic(not_automatic)
            .build()?;
        for file in self.collect_manifest(&suite_dir)? {
            release.add_file(file);
        }

        let content = release.to_string();
        write_atomically(&suite_dir.join("Release"), content.as_bytes())?;
        self.sign(&suite_dir, content.as_bytes()).await?;
        Ok(release)
    }

    async fn sign(&self, suite_dir: &Path, content: &[u8]) -> PublishResult<()> {
        let detached = suite_dir.join("Release.gpg");
        let inline = suite_dir.join("InRelease");
        let Some(key) = self.ctx.archive.signing_key.as_deref() else {
            // Signatures of a previous Release no longer match.
            for stale in [&detached, &inline] {
                match fs::remove_file(stale) {
                    Ok(()) => debug!("Removed stale {}", stale.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
            return Ok(());
        };
        let signer = self.signer.ok_or_else(|| {
            PublishError::Signing(format!(
                "archive {} has a signing key but no signer is configured",
                self.ctx.archive.name
            ))
        })?;
        let signature = signer.sign_detached(key, content).await?;
        write_atomically(&detached, &signature)?;
        let clearsigned = signer.sign_clear(key, content).await?;
        write_atomically(&inline, &clearsigned)?;
        Ok(())
    }
}
