//! Source package stanzas for Sources indexes.

use crate::deb822::Paragraph;
use crate::hash::{HashAlgorithm, HashSet};
use serde::{Deserialize, Serialize};

/// A file that makes up a source package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFileEntry {
    /// File name within the package's pool directory.
    pub name: String,
    /// File size in bytes.
    pub size: u64,
    /// File digests.
    pub hashes: HashSet,
}

impl SourceFileEntry {
    /// Create a new file entry.
    pub fn new<S: Into<String>>(name: S, size: u64, hashes: HashSet) -> Self {
        Self {
            name: name.into(),
            size,
            hashes,
        }
    }
}

/// A source package entry in a Sources index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    /// Package name.
    pub package: String,
    /// Binary package names produced by this source.
    pub binaries: Vec<String>,
    /// Package version.
    pub version: String,
    /// Section override.
    pub section: Option<String>,
    /// Maintainer.
    pub maintainer: Option<String>,
    /// Build dependencies.
    pub build_depends: Option<String>,
    /// Architecture-independent build dependencies.
    pub build_depends_indep: Option<String>,
    /// Architecture specification (e.g. `any`, `all`).
    pub architecture: String,
    /// Standards version.
    pub standards_version: Option<String>,
    /// Source format.
    pub format: Option<String>,
    /// Pool directory relative to the archive root.
    pub directory: String,
    /// Files that make up this source package.
    pub files: Vec<SourceFileEntry>,
    /// Homepage.
    pub homepage: Option<String>,
}

impl Source {
    /// Render the Sources stanza.
    pub fn to_paragraph(&self) -> Paragraph {
        let mut p = Paragraph::new();
        p.push("Package", self.package.as_str());
        if !self.binaries.is_empty() {
            p.push("Binary", self.binaries.join(", "));
        }
        p.push("Version", self.version.as_str());
        p.push_opt("Section", self.section.as_deref());
        p.push_opt("Maintainer", self.maintainer.as_deref());
        p.push_opt("Build-Depends", self.build_depends.as_deref());
        p.push_opt("Build-Depends-Indep", self.build_depends_indep.as_deref());
        p.push("Architecture", self.architecture.as_str());
        p.push_opt("Standards-Version", self.standards_version.as_deref());
        p.push_opt("Format", self.format.as_deref());
        p.push("Directory", self.directory.as_str());
        for algorithm in HashAlgorithm::all() {
            let mut value = String::new();
            for file in &self.files {
                if let Some(hash) = file.hashes.get(algorithm) {
                    value.push_str(&format!("\n{} {} {}", hash, file.size, file.name));
                }
            }
            if !value.is_empty() {
                p.push(algorithm.sources_field(), value);
            }
        }
        p.push_opt("Homepage", self.homepage.as_deref());
        p
    }
}
