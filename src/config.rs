//! Configuration for the publisher.
//!
//! The configuration is a JSON document describing the distributions, the
//! archives publishing into them, and where the collaborators live.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::{PublishError, PublishResult};
use crate::model::{Archive, ArchivePurpose, Distribution};

/// Which index backend to use for an archive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// External indexer for the primary archive, native for everything else.
    #[default]
    Auto,
    External,
    Native,
}

/// External index builder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Command line of the indexer, without the subcommand.
    #[serde(default = "default_indexer_command")]
    pub command: Vec<String>,
    #[serde(default)]
    pub backend: BackendChoice,
    /// Minimum time between two cache cleaning passes.
    #[serde(default = "default_cache_clean_interval")]
    pub cache_clean_interval_secs: u64,
}

fn default_indexer_command() -> Vec<String> {
    vec!["apt-ftparchive".to_string()]
}

fn default_cache_clean_interval() -> u64 {
    24 * 60 * 60
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            command: default_indexer_command(),
            backend: BackendChoice::default(),
            cache_clean_interval_secs: default_cache_clean_interval(),
        }
    }
}

/// Where publication records and their files are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// JSON file holding the publication records.
    pub publications: PathBuf,
    /// Root of the blob store.
    pub librarian_root: PathBuf,
}

/// GPG configuration for repository signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GpgConfig {
    /// GPG binary.
    #[serde(default = "default_gpg")]
    pub gpg: String,
    /// GPG home directory.
    #[serde(default)]
    pub gpg_home: Option<PathBuf>,
}

fn default_gpg() -> String {
    "gpg".to_string()
}

impl Default for GpgConfig {
    fn default() -> Self {
        Self {
            gpg: default_gpg(),
            gpg_home: None,
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Root below which primary and partner archives live.
    pub archive_root: PathBuf,
    /// Root below which PPAs live. Defaults to `<archive_root>/ppa`.
    #[serde(default)]
    pub ppa_root: Option<PathBuf>,
    pub distributions: Vec<Distribution>,
    #[serde(default)]
    pub archives: Vec<Archive>,
    #[serde(default)]
    pub indexer: IndexerConfig,
    pub store: StoreConfig,
    #[serde(default)]
    pub signing: GpgConfig,
}

fn check_name(what: &str, name: &str) -> PublishResult<()> {
    if name.is_empty() || name.contains('/') || name.contains(char::is_whitespace) {
        return Err(PublishError::Configuration(format!(
            "invalid {} name {:?}",
            what, name
        )));
    }
    Ok(())
}

impl Config {
    /// Load configuration from a file.
    pub fn from_file(path: &Path) -> PublishResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            PublishError::Configuration(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        content.parse()
    }

    pub fn ppa_root(&self) -> PathBuf {
        self.ppa_root
            .clone()
            .unwrap_or_else(|| self.archive_root.join("ppa"))
    }

    /// Validate the entire configuration.
    pub fn validate(&self) -> PublishResult<()> {
        if self.indexer.command.is_empty() {
            return Err(PublishError::Configuration(
                "Indexer command cannot be empty".to_string(),
            ));
        }

        let mut distro_names = HashSet::new();
        for distro in &self.distributions {
            check_name("distribution", &distro.name)?;
            if !distro_names.insert(distro.name.as_str()) {
                return Err(PublishError::Configuration(format!(
                    "Distribution '{}' defined twice",
                    distro.name
                )));
            }
            let mut series_names = HashSet::new();
            for series in &distro.series {
                check_name("series", &series.name)?;
                if !series_names.insert(series.name.as_str()) {
                    return Err(PublishError::Configuration(format!(
                        "Series '{}' defined twice in '{}'",
                        series.name, distro.name
                    )));
                }
                if series.architectures.is_empty() {
                    return Err(PublishError::Configuration(format!(
                        "Series '{}': at least one architecture must be specified",
                        series.name
                    )));
                }
                if series.components.is_empty() {
                    return Err(PublishError::Configuration(format!(
                        "Series '{}': at least one component must be specified",
                        series.name
                    )));
                }
                if series.index_compressors.is_empty() {
                    return Err(PublishError::Configuration(format!(
                        "Series '{}': at least one index compressor must be specified",
                        series.name
                    )));
                }
                for name in series.architectures.iter().chain(series.components.iter()) {
                    check_name("architecture or component", name)?;
                }
            }
        }

        let mut archive_names = HashSet::new();
        for archive in &self.archives {
            check_name("archive", &archive.name)?;
            if !archive_names.insert((archive.distribution.as_str(), archive.name.as_str())) {
                return Err(PublishError::Configuration(format!(
                    "Archive '{}' defined twice",
                    archive.name
                )));
            }
            if self.get_distribution(&archive.distribution).is_none() {
                return Err(PublishError::Configuration(format!(
                    "Archive '{}' refers to unknown distribution '{}'",
                    archive.name, archive.distribution
                )));
            }
            if archive.purpose == ArchivePurpose::Ppa {
                match &archive.owner {
                    Some(owner) => check_name("owner", owner)?,
                    None => {
                        return Err(PublishError::Configuration(format!(
                            "PPA '{}' has no owner",
                            archive.name
                        )))
                    }
                }
            }
        }

        for distro in &self.distributions {
            for purpose in [ArchivePurpose::Primary, ArchivePurpose::Partner] {
                let count = self
                    .archives_for(&distro.name)
                    .filter(|a| a.purpose == purpose)
                    .count();
                if count > 1 {
                    return Err(PublishError::Configuration(format!(
                        "Distribution '{}' has {} {:?} archives",
                        distro.name, count, purpose
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn get_distribution(&self, name: &str) -> Option<&Distribution> {
        self.distributions.iter().find(|d| d.name == name)
    }

    /// Archives publishing into a distribution, in configuration order.
    pub fn archives_for<'a>(&'a self, distribution: &'a str) -> impl Iterator<Item = &'a Archive> {
        self.archives
            .iter()
            .filter(move |a| a.distribution == distribution)
    }
}

impl std::str::FromStr for Config {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = serde_json::from_str(s)
            .map_err(|e| PublishError::Configuration(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use apt_repository::Compression;

    const SAMPLE: &str = r#"{
        "archive_root": "/srv/archive",
        "distributions": [{
            "name": "ubuntu",
            "displayname": "Ubuntu",
            "series": [{
                "name": "focal",
                "version": "20.04",
                "displayname": "Focal Fossa",
                "status": "current",
                "architectures": ["amd64", "i386"],
                "components": ["main", "universe"],
                "index_compressors": ["gzip", "xz"]
            }]
        }],
        "archives": [
            {"name": "primary", "distribution": "ubuntu", "purpose": "primary"},
            {"name": "ppa", "distribution": "ubuntu", "purpose": "ppa", "owner": "cprov"}
        ],
        "store": {"publications": "/srv/pubs.json", "librarian_root": "/srv/librarian"}
    }"#;

    #[test]
    fn test_parse_sample() {
        let config: Config = SAMPLE.parse().unwrap();
        assert_eq!(config.ppa_root(), PathBuf::from("/srv/archive/ppa"));
        assert_eq!(config.indexer.command, vec!["apt-ftparchive"]);
        assert_eq!(config.indexer.cache_clean_interval_secs, 86400);
        assert_eq!(config.signing.gpg, "gpg");
        let distro = config.get_distribution("ubuntu").unwrap();
        let focal = distro.get_series("focal").unwrap();
        assert_eq!(
            focal.index_compressors,
            vec![Compression::Gzip, Compression::Xz]
        );
        assert!(focal.include_long_descriptions);
        assert_eq!(config.archives_for("ubuntu").count(), 2);
    }

    #[test]
    fn test_ppa_without_owner_rejected() {
        let broken = SAMPLE.replace(r#", "owner": "cprov""#, "");
        let err = broken.parse::<Config>().unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
    }

    #[test]
    fn test_unknown_distribution_rejected() {
        let broken = SAMPLE.replace(
            r#""distribution": "ubuntu", "purpose": "primary""#,
            r#""distribution": "debian", "purpose": "primary""#,
        );
        assert!(broken.parse::<Config>().is_err());
    }

    #[test]
    fn test_from_file() {
        let td = tempfile::tempdir().unwrap();
        let path = td.path().join("publisher.json");
        std::fs::write(&path, SAMPLE).unwrap();
        assert!(Config::from_file(&path).is_ok());
        assert!(Config::from_file(&td.path().join("missing.json")).is_err());
    }
}
