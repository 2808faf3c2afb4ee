//! Domain types shared across the publishing pipeline.

use apt_repository::Compression;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PublishError;

/// Sub-channel of a distribution series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Pocket {
    Release,
    Security,
    Updates,
    Proposed,
    Backports,
}

impl Pocket {
    /// Suffix appended to the series name to form the suite name.
    pub fn suffix(&self) -> &'static str {
        match self {
            Pocket::Release => "",
            Pocket::Security => "-security",
            Pocket::Updates => "-updates",
            Pocket::Proposed => "-proposed",
            Pocket::Backports => "-backports",
        }
    }

    /// Human readable name, used in Release descriptions.
    pub fn title(&self) -> &'static str {
        match self {
            Pocket::Release => "Release",
            Pocket::Security => "Security",
            Pocket::Updates => "Updates",
            Pocket::Proposed => "Proposed",
            Pocket::Backports => "Backports",
        }
    }

    pub fn all() -> [Pocket; 5] {
        [
            Pocket::Release,
            Pocket::Security,
            Pocket::Updates,
            Pocket::Proposed,
            Pocket::Backports,
        ]
    }
}

impl fmt::Display for Pocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.title().to_uppercase())
    }
}

/// Lifecycle status of a distribution series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeriesStatus {
    Experimental,
    Development,
    Frozen,
    Current,
    Supported,
    Obsolete,
    Future,
}

impl SeriesStatus {
    /// Whether the series' release pocket can still change.
    pub fn is_unstable(&self) -> bool {
        matches!(
            self,
            SeriesStatus::Experimental | SeriesStatus::Development | SeriesStatus::Frozen
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArchivePurpose {
    Primary,
    Partner,
    Ppa,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishingStatus {
    Pending,
    Published,
    Superseded,
    Deleted,
    Obsolete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Required,
    Important,
    Standard,
    Optional,
    Extra,
}

impl Priority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Required => "required",
            Priority::Important => "important",
            Priority::Standard => "standard",
            Priority::Optional => "optional",
            Priority::Extra => "extra",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Binary package container format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BinaryFormat {
    #[default]
    Deb,
    Udeb,
    Ddeb,
}

impl BinaryFormat {
    /// Subcomponent the format is indexed under, if any.
    pub fn subcomponent(&self) -> Option<&'static str> {
        match self {
            BinaryFormat::Deb => None,
            BinaryFormat::Udeb => Some(DEBIAN_INSTALLER),
            BinaryFormat::Ddeb => Some(DEBUG),
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            BinaryFormat::Deb => ".deb",
            BinaryFormat::Udeb => ".udeb",
            BinaryFormat::Ddeb => ".ddeb",
        }
    }
}

pub const DEBIAN_INSTALLER: &str = "debian-installer";
pub const DEBUG: &str = "debug";

/// A distribution series plus pocket, e.g. `focal-security`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Suite {
    pub series: String,
    pub pocket: Pocket,
}

impl Suite {
    pub fn new(series: impl Into<String>, pocket: Pocket) -> Self {
        Self {
            series: series.into(),
            pocket,
        }
    }

    pub fn name(&self) -> String {
        format!("{}{}", self.series, self.pocket.suffix())
    }
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.series, self.pocket.suffix())
    }
}

impl FromStr for Suite {
    type Err = PublishError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        for pocket in Pocket::all() {
            let suffix = pocket.suffix();
            if suffix.is_empty() {
                continue;
            }
            if let Some(series) = s.strip_suffix(suffix) {
                if !series.is_empty() {
                    return Ok(Suite::new(series, pocket));
                }
            }
        }
        if s.is_empty() || s.contains('/') {
            return Err(PublishError::Configuration(format!(
                "invalid suite name {:?}",
                s
            )));
        }
        Ok(Suite::new(s, Pocket::Release))
    }
}

/// A series of a distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistroSeries {
    pub name: String,
    pub version: String,
    pub displayname: String,
    pub status: SeriesStatus,
    pub architectures: Vec<String>,
    #[serde(default = "default_components")]
    pub components: Vec<String>,
    #[serde(default = "default_compressors")]
    pub index_compressors: Vec<Compression>,
    #[serde(default = "default_true")]
    pub include_long_descriptions: bool,
    #[serde(default)]
    pub backports_not_automatic: bool,
}

fn default_components() -> Vec<String> {
    vec!["main".to_string()]
}

fn default_compressors() -> Vec<Compression> {
    apt_repository::DEFAULT_COMPRESSIONS.to_vec()
}

fn default_true() -> bool {
    true
}

impl DistroSeries {
    /// All suites of this series, in pocket order.
    pub fn suites(&self) -> impl Iterator<Item = Suite> + '_ {
        Pocket::all()
            .into_iter()
            .map(move |pocket| Suite::new(self.name.clone(), pocket))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Distribution {
    pub name: String,
    pub displayname: String,
    #[serde(default)]
    pub bugs_url: Option<String>,
    pub series: Vec<DistroSeries>,
}

impl Distribution {
    pub fn get_series(&self, name: &str) -> Option<&DistroSeries> {
        self.series.iter().find(|s| s.name == name)
    }
}

/// An archive publishing into a distribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Archive {
    pub name: String,
    pub distribution: String,
    pub purpose: ArchivePurpose,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub owner_displayname: Option<String>,
    #[serde(default)]
    pub displayname: Option<String>,
    #[serde(default)]
    pub signing_key: Option<String>,
    #[serde(default)]
    pub publish_debian_installer: bool,
    #[serde(default)]
    pub publish_debug_symbols: bool,
    /// Quota in bytes, if any.
    #[serde(default)]
    pub authorized_size: Option<u64>,
}

impl Archive {
    pub fn is_ppa(&self) -> bool {
        self.purpose == ArchivePurpose::Ppa
    }

    /// Components this archive publishes for a series.
    pub fn components(&self, series: &DistroSeries) -> Vec<String> {
        match self.purpose {
            ArchivePurpose::Primary => series.components.clone(),
            ArchivePurpose::Partner => vec!["partner".to_string()],
            ArchivePurpose::Ppa => vec!["main".to_string()],
        }
    }

    /// Pockets this archive publishes into.
    pub fn pockets(&self) -> Vec<Pocket> {
        match self.purpose {
            ArchivePurpose::Ppa => vec![Pocket::Release],
            _ => Pocket::all().to_vec(),
        }
    }

    /// Subcomponents enabled for this archive.
    pub fn subcomponents(&self) -> Vec<&'static str> {
        let mut subcomps = Vec::new();
        if self.publish_debian_installer {
            subcomps.push(DEBIAN_INSTALLER);
        }
        if self.publish_debug_symbols {
            subcomps.push(DEBUG);
        }
        subcomps
    }

    /// Whether publications may be added to `suite`.
    ///
    /// Only the primary archive refuses changes, and only to the release
    /// pocket of a released series.
    pub fn can_modify_suite(&self, series: &DistroSeries, pocket: Pocket) -> bool {
        self.purpose != ArchivePurpose::Primary
            || pocket != Pocket::Release
            || series.status.is_unstable()
    }
}

/// A file attached to a publication, stored in the blob store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedFile {
    pub filename: String,
    pub blob_id: String,
}

/// Reference to a publication row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PublicationRef {
    Source(u64),
    Binary(u64),
}

impl fmt::Display for PublicationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublicationRef::Source(id) => write!(f, "source publication {}", id),
            PublicationRef::Binary(id) => write!(f, "binary publication {}", id),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcePublication {
    pub id: u64,
    pub archive: String,
    pub series: String,
    pub pocket: Pocket,
    pub component: String,
    pub section: String,
    pub status: PublishingStatus,
    #[serde(default)]
    pub date_removed: Option<DateTime<Utc>>,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub binaries: Vec<String>,
    #[serde(default)]
    pub architecture: Option<String>,
    #[serde(default)]
    pub build_depends: Option<String>,
    #[serde(default)]
    pub build_depends_indep: Option<String>,
    #[serde(default)]
    pub standards_version: Option<String>,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub files: Vec<PublishedFile>,
}

impl SourcePublication {
    pub fn suite(&self) -> Suite {
        Suite::new(self.series.clone(), self.pocket)
    }

    pub fn reference(&self) -> PublicationRef {
        PublicationRef::Source(self.id)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryPublication {
    pub id: u64,
    pub archive: String,
    pub series: String,
    pub pocket: Pocket,
    pub component: String,
    pub section: String,
    pub priority: Priority,
    pub status: PublishingStatus,
    #[serde(default)]
    pub date_removed: Option<DateTime<Utc>>,
    pub name: String,
    pub version: String,
    pub source_name: String,
    pub source_version: String,
    /// Architecture the publication is indexed under.
    pub arch_tag: String,
    /// Whether the package is `Architecture: all`.
    #[serde(default)]
    pub architecture_independent: bool,
    #[serde(default)]
    pub format: BinaryFormat,
    #[serde(default)]
    pub installed_size: Option<u64>,
    #[serde(default)]
    pub maintainer: Option<String>,
    #[serde(default)]
    pub relationships: Vec<(String, String)>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    #[serde(default)]
    pub phased_update_percentage: Option<u8>,
    pub file: PublishedFile,
}

impl BinaryPublication {
    pub fn suite(&self) -> Suite {
        Suite::new(self.series.clone(), self.pocket)
    }

    pub fn reference(&self) -> PublicationRef {
        PublicationRef::Binary(self.id)
    }

    /// Value of the `Architecture` field.
    pub fn architecture(&self) -> &str {
        if self.architecture_independent {
            "all"
        } else {
            &self.arch_tag
        }
    }
}

/// Prefix a section with its component, as apt expects for non-main
/// components.
pub fn qualified_section(component: &str, section: &str) -> String {
    if component == "main" {
        section.to_string()
    } else {
        format!("{}/{}", component, section)
    }
}
