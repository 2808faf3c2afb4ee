//! Binary package stanzas for Packages and Translation indexes.

use crate::deb822::Paragraph;
use crate::hash::{hash_data, HashAlgorithm, HashSet};
use serde::{Deserialize, Serialize};

/// A binary package entry in a Packages index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name.
    pub package: String,
    /// Source package name.
    pub source: String,
    /// Source package version.
    pub source_version: String,
    /// Package version.
    pub version: String,
    /// Architecture field (`all` or an architecture tag).
    pub architecture: String,
    /// Priority override.
    pub priority: Option<String>,
    /// Section override.
    pub section: Option<String>,
    /// Installed size in kilobytes.
    pub installed_size: Option<u64>,
    /// Maintainer.
    pub maintainer: Option<String>,
    /// Relationship fields (`Depends`, `Recommends`, ...) in output order.
    pub relationships: Vec<(String, String)>,
    /// Pool path relative to the archive root.
    pub filename: String,
    /// File size in bytes.
    pub size: u64,
    /// File digests.
    pub hashes: HashSet,
    /// Phased update percentage override.
    pub phased_update_percentage: Option<u8>,
    /// One-line summary.
    pub summary: String,
    /// Extended description, without the leading space of each line.
    pub description: String,
    /// Homepage.
    pub homepage: Option<String>,
}

/// Relationship fields in the order they appear in a Packages stanza.
pub const RELATIONSHIP_FIELDS: &[&str] = &[
    "Replaces",
    "Provides",
    "Depends",
    "Pre-Depends",
    "Recommends",
    "Suggests",
    "Conflicts",
    "Breaks",
    "Enhances",
    "Built-Using",
];

impl Package {
    /// Full multi-line value of the Description field.
    pub fn full_description(&self) -> String {
        if self.description.is_empty() {
            self.summary.clone()
        } else {
            format!("{}\n{}", self.summary, self.description)
        }
    }

    /// MD5 of the full description as apt computes it for `Description-md5`.
    pub fn description_md5(&self) -> String {
        let mut value = Paragraph::new();
        value.push("Description", self.full_description());
        let rendered = value.to_string();
        let body = rendered.trim_start_matches("Description: ");
        let (_, hashes) = hash_data(body.as_bytes(), &[HashAlgorithm::Md5]);
        hashes
            .get(&HashAlgorithm::Md5)
            .unwrap_or_default()
            .to_string()
    }

    /// Render the Packages stanza.
    ///
    /// With `separate_long_descriptions`, only the summary is kept inline and
    /// a `Description-md5` links to the Translation-en entry.
    pub fn to_paragraph(&self, separate_long_descriptions: bool) -> Paragraph {
        let mut p = Paragraph::new();
        p.push("Package", self.package.as_str());
        if self.source != self.package || self.source_version != self.version {
            if self.source_version != self.version {
                p.push(
                    "Source",
                    format!("{} ({})", self.source, self.source_version),
                );
            } else {
                p.push("Source", self.source.as_str());
            }
        }
        p.push_opt("Priority", self.priority.as_deref());
        p.push_opt("Section", self.section.as_deref());
        if let Some(installed_size) = self.installed_size {
            p.push("Installed-Size", installed_size.to_string());
        }
        p.push_opt("Maintainer", self.maintainer.as_deref());
        p.push("Architecture", self.architecture.as_str());
        p.push("Version", self.version.as_str());
        for field in RELATIONSHIP_FIELDS {
            if let Some((_, value)) = self.relationships.iter().find(|(n, _)| n == field) {
                p.push(*field, value.as_str());
            }
        }
        p.push("Filename", self.filename.as_str());
        p.push("Size", self.size.to_string());
        for algorithm in HashAlgorithm::all() {
            p.push_opt(algorithm.packages_field(), self.hashes.get(algorithm));
        }
        if let Some(percentage) = self.phased_update_percentage {
            p.push("Phased-Update-Percentage", percentage.to_string());
        }
        if separate_long_descriptions {
            p.push("Description", self.summary.as_str());
            p.push("Description-md5", self.description_md5());
        } else {
            p.push("Description", self.full_description());
        }
        p.push_opt("Homepage", self.homepage.as_deref());
        p
    }

    /// Render the Translation-en stanza carrying the long description.
    pub fn translation_paragraph(&self) -> Paragraph {
        let mut p = Paragraph::new();
        p.push("Package", self.package.as_str());
        p.push("Description-md5", self.description_md5());
        p.push("Description-en", self.full_description());
        p
    }
}
