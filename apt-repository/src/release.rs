//! Release manifests for APT repositories.

use crate::{AptRepositoryError, HashAlgorithm, HashedFile, Result, RELEASE_HASH_ALGORITHMS};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Date format used in Release files.
pub const RELEASE_DATE_FORMAT: &str = "%a, %d %b %Y %k:%M:%S UTC";

/// A suite-level Release file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Origin of the repository.
    pub origin: Option<String>,
    /// Label for the repository.
    pub label: Option<String>,
    /// Suite name.
    pub suite: Option<String>,
    /// Version.
    pub version: Option<String>,
    /// Codename.
    pub codename: Option<String>,
    /// Date of the release.
    pub date: DateTime<Utc>,
    /// Supported architectures.
    pub architectures: Vec<String>,
    /// Repository components.
    pub components: Vec<String>,
    /// Description.
    pub description: Option<String>,
    /// Whether apt should not install from this suite automatically.
    pub not_automatic: bool,
    /// Whether upgrades of already installed packages are still automatic.
    pub but_automatic_upgrades: bool,
    /// Files in the suite with their hashes.
    pub files: Vec<HashedFile>,
}

impl Release {
    /// Create a new Release with the current date.
    pub fn new() -> Self {
        Self {
            origin: None,
            label: None,
            suite: None,
            version: None,
            codename: None,
            date: Utc::now(),
            architectures: Vec::new(),
            components: Vec::new(),
            description: None,
            not_automatic: false,
            but_automatic_upgrades: false,
            files: Vec::new(),
        }
    }

    /// Add a file to the release.
    pub fn add_file(&mut self, file: HashedFile) {
        self.files.push(file);
    }

    /// Files carrying a digest for `algorithm`, sorted by path.
    pub fn get_files_by_hash(&self, algorithm: &HashAlgorithm) -> Vec<(&HashedFile, &str)> {
        let mut files: Vec<_> = self
            .files
            .iter()
            .filter_map(|file| file.get_hash(algorithm).map(|hash| (file, hash)))
            .collect();
        files.sort_by(|a, b| a.0.path.cmp(&b.0.path));
        files
    }

    /// Parse a Release file.
    pub fn parse(content: &str) -> Result<Self> {
        let mut fields = parse_fields(content)?;

        let date_str = fields
            .remove("date")
            .ok_or_else(|| AptRepositoryError::missing_field("Date"))?;
        let date = chrono::NaiveDateTime::parse_from_str(date_str.trim(), RELEASE_DATE_FORMAT)
            .map_err(|_| AptRepositoryError::invalid_field("Date", &date_str))?
            .and_utc();

        let split = |s: String| s.split_whitespace().map(|s| s.to_string()).collect();
        let architectures = fields.remove("architectures").map(split).unwrap_or_default();
        let components = fields.remove("components").map(split).unwrap_or_default();
        let yes = |v: Option<String>| v.map(|s| s.eq_ignore_ascii_case("yes")).unwrap_or(false);

        let mut files: Vec<HashedFile> = Vec::new();
        for algorithm in HashAlgorithm::all() {
            let Some(table) = fields.remove(&algorithm.release_field().to_lowercase()) else {
                continue;
            };
            for line in table.lines().map(str::trim).filter(|l| !l.is_empty()) {
                let parts: Vec<&str> = line.split_whitespace().collect();
                let [hash, size, path] = parts[..] else {
                    return Err(AptRepositoryError::invalid_field(
                        algorithm.release_field(),
                        line,
                    ));
                };
                let size = size
                    .parse::<u64>()
                    .map_err(|_| AptRepositoryError::invalid_field("size", size))?;
                match files.iter_mut().find(|f| f.path == path) {
                    Some(existing) => existing.add_hash(*algorithm, hash.to_string()),
                    None => {
                        let mut file = HashedFile::new(path, size);
                        file.add_hash(*algorithm, hash.to_string());
                        files.push(file);
                    }
                }
            }
        }

        Ok(Self {
            origin: fields.remove("origin"),
            label: fields.remove("label"),
            suite: fields.remove("suite"),
            version: fields.remove("version"),
            codename: fields.remove("codename"),
            date,
            architectures,
            components,
            description: fields.remove("description"),
            not_automatic: yes(fields.remove("notautomatic")),
            but_automatic_upgrades: yes(fields.remove("butautomaticupgrades")),
            files,
        })
    }
}

/// Split a single deb822 paragraph into lower-cased field names and values.
/// Continuation lines are joined with newlines.
fn parse_fields(content: &str) -> Result<BTreeMap<String, String>> {
    let mut fields = BTreeMap::new();
    let mut current: Option<(String, String)> = None;

    for line in content.lines() {
        if line.is_empty() {
            continue;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, ref mut value)) = current {
                value.push('\n');
                value.push_str(line);
            }
            continue;
        }
        if let Some((field, value)) = current.take() {
            fields.insert(field, value);
        }
        let (field, value) = line.split_once(':').ok_or_else(|| {
            AptRepositoryError::invalid_config(format!("Invalid line format: {}", line))
        })?;
        current = Some((field.trim().to_lowercase(), value.trim().to_string()));
    }
    if let Some((field, value)) = current {
        fields.insert(field, value);
    }
    Ok(fields)
}

impl Default for Release {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Release {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(ref origin) = self.origin {
            writeln!(f, "Origin: {}", origin)?;
        }
        if let Some(ref label) = self.label {
            writeln!(f, "Label: {}", label)?;
        }
        if let Some(ref suite) = self.suite {
            writeln!(f, "Suite: {}", suite)?;
        }
        if let Some(ref version) = self.version {
            writeln!(f, "Version: {}", version)?;
        }
        if let Some(ref codename) = self.codename {
            writeln!(f, "Codename: {}", codename)?;
        }
        writeln!(f, "Date: {}", self.date.format(RELEASE_DATE_FORMAT))?;
        if !self.architectures.is_empty() {
            writeln!(f, "Architectures: {}", self.architectures.join(" "))?;
        }
        if !self.components.is_empty() {
            writeln!(f, "Components: {}", self.components.join(" "))?;
        }
        if let Some(ref description) = self.description {
            writeln!(f, "Description: {}", description)?;
        }
        if self.not_automatic {
            writeln!(f, "NotAutomatic: yes")?;
        }
        if self.but_automatic_upgrades {
            writeln!(f, "ButAutomaticUpgrades: yes")?;
        }

        for algorithm in RELEASE_HASH_ALGORITHMS {
            let files = self.get_files_by_hash(algorithm);
            if files.is_empty() {
                continue;
            }
            writeln!(f, "{}:", algorithm.release_field())?;
            for (file, hash) in files {
                writeln!(f, " {} {:>16} {}", hash, file.size, file.path)?;
            }
        }
        Ok(())
    }
}

/// Builder for [`Release`].
#[derive(Debug, Clone, Default)]
pub struct ReleaseBuilder {
    release: Release,
}

impl ReleaseBuilder {
    /// Create a new Release builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the origin.
    pub fn origin<S: Into<String>>(mut self, origin: S) -> Self {
        self.release.origin = Some(origin.into());
        self
    }

    /// Set the label.
    pub fn label<S: Into<String>>(mut self, label: S) -> Self {
        self.release.label = Some(label.into());
        self
    }

    /// Set the suite.
    pub fn suite<S: Into<String>>(mut self, suite: S) -> Self {
        self.release.suite = Some(suite.into());
        self
    }

    /// Set the version.
    pub fn version<S: Into<String>>(mut self, version: S) -> Self {
        self.release.version = Some(version.into());
        self
    }

    /// Set the codename.
    pub fn codename<S: Into<String>>(mut self, codename: S) -> Self {
        self.release.codename = Some(codename.into());
        self
    }

    /// Set the date.
    pub fn date(mut self, date: DateTime<Utc>) -> Self {
        self.release.date = date;
        self
    }

    /// Set the architectures.
    pub fn architectures(mut self, architectures: Vec<String>) -> Self {
        self.release.architectures = architectures;
        self
    }

    /// Set the components.
    pub fn components(mut self, components: Vec<String>) -> Self {
        self.release.components = components;
        self
    }

    /// Set the description.
    pub fn description<S: Into<String>>(mut self, description: S) -> Self {
        self.release.description = Some(description.into());
        self
    }

    /// Set both NotAutomatic and ButAutomaticUpgrades.
    pub fn not_automatic(mut self, not_automatic: bool) -> Self {
        self.release.not_automatic = not_automatic;
        self.release.but_automatic_upgrades = not_automatic;
        self
    }

    /// Build the Release.
    pub fn build(self) -> Result<Release> {
        if self.release.suite.as_deref().map_or(true, str::is_empty) {
            return Err(AptRepositoryError::missing_field("Suite"));
        }
        Ok(self.release)
    }
}

/// The small per-architecture (or per-source) Release stanza stored next to
/// each Packages/Sources index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComponentRelease {
    /// Suite the index belongs to.
    pub archive: String,
    /// Series version.
    pub version: String,
    /// Component name.
    pub component: String,
    /// Origin of the repository.
    pub origin: String,
    /// Label for the repository.
    pub label: String,
    /// Architecture tag, or `source`.
    pub architecture: String,
}

impl fmt::Display for ComponentRelease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Archive: {}", self.archive)?;
        writeln!(f, "Version: {}", self.version)?;
        writeln!(f, "Component: {}", self.component)?;
        writeln!(f, "Origin: {}", self.origin)?;
        writeln!(f, "Label: {}", self.label)?;
        writeln!(f, "Architecture: {}", self.architecture)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample() -> Release {
        let mut release = ReleaseBuilder::new()
            .origin("Ubuntu")
            .label("Ubuntu")
            .suite("focal-security")
            .version("20.04")
            .codename("focal")
            .date(Utc.with_ymd_and_hms(2020, 4, 23, 7, 5, 9).unwrap())
            .architectures(vec!["amd64".to_string(), "i386".to_string()])
            .components(vec!["main".to_string()])
            .description("Ubuntu Focal Security")
            .build()
            .unwrap();
        let mut b = HashedFile::new("main/source/Sources", 10);
        b.add_hash(HashAlgorithm::Md5, "bbbb".to_string());
        b.add_hash(HashAlgorithm::Sha256, "dddd".to_string());
        let mut a = HashedFile::new("main/binary-i386/Packages", 20);
        a.add_hash(HashAlgorithm::Md5, "aaaa".to_string());
        a.add_hash(HashAlgorithm::Sha256, "cccc".to_string());
        release.add_file(b);
        release.add_file(a);
        release
    }

    #[test]
    fn test_render() {
        let text = sample().to_string();
        assert_eq!(
            text,
            "Origin: Ubuntu\n\
             Label: Ubuntu\n\
             Suite: focal-security\n\
             Version: 20.04\n\
             Codename: focal\n\
             Date: Thu, 23 Apr 2020  7:05:09 UTC\n\
             Architectures: amd64 i386\n\
             Components: main\n\
             Description: Ubuntu Focal Security\n\
             MD5Sum:\n \
             aaaa               20 main/binary-i386/Packages\n \
             bbbb               10 main/source/Sources\n\
             SHA256:\n \
             cccc               20 main/binary-i386/Packages\n \
             dddd               10 main/source/Sources\n"
        );
    }

    #[test]
    fn test_parse_roundtrip_of_tables() {
        let release = sample();
        let parsed = Release::parse(&release.to_string()).unwrap();
        assert_eq!(parsed.suite.as_deref(), Some("focal-security"));
        assert_eq!(parsed.date, release.date);
        let packages = parsed
            .files
            .iter()
            .find(|f| f.path == "main/binary-i386/Packages")
            .unwrap();
        assert_eq!(packages.size, 20);
        assert_eq!(packages.get_hash(&HashAlgorithm::Sha256), Some("cccc"));
    }

    #[test]
    fn test_not_automatic() {
        let release = ReleaseBuilder::new()
            .suite("focal-proposed")
            .not_automatic(true)
            .build()
            .unwrap();
        let text = release.to_string();
        assert!(text.contains("NotAutomatic: yes\n"));
        assert!(text.contains("ButAutomaticUpgrades: yes\n"));
    }

    #[test]
    fn test_builder_requires_suite() {
        assert!(ReleaseBuilder::new().build().is_err());
    }

    #[test]
    fn test_component_release() {
        let release = ComponentRelease {
            archive: "focal".to_string(),
            version: "20.04".to_string(),
            component: "main".to_string(),
            origin: "Ubuntu".to_string(),
            label: "Ubuntu".to_string(),
            architecture: "source".to_string(),
        };
        assert_eq!(
            release.to_string(),
            "Archive: focal\nVersion: 20.04\nComponent: main\nOrigin: Ubuntu\nLabel: Ubuntu\nArchitecture: source\n"
        );
    }
}
