//! Configuration text for the external indexer (`apt-ftparchive`).

use std::fmt::Write;
use std::path::Path;

use apt_repository::Compression;

use crate::layout::ArchiveLayout;
use crate::model::{BinaryFormat, DEBIAN_INSTALLER, DEBUG};

/// Everything needed to render one `tree` stanza.
#[derive(Debug, Clone)]
pub struct TreeStanza {
    /// Directory the indexes are written to.
    pub tree: String,
    /// Directory holding the file lists.
    pub list_path: String,
    /// File list infix, e.g. `focal` or `focal_main`.
    pub by_file: String,
    /// Override infix, e.g. `focal` or `focal.main`.
    pub release: String,
    pub sections: Vec<String>,
    pub architectures: Vec<String>,
    pub hide_extra: bool,
    pub extensions: String,
    pub compressors: Vec<Compression>,
    pub cache_insert: String,
    pub long_descriptions: bool,
}

/// Global section of the configuration.
pub fn header(layout: &ArchiveLayout) -> String {
    format!(
        r#"
Dir
{{
    ArchiveDir "{archive}";
    OverrideDir "{overrides}";
    CacheDir "{cache}";
}};

Default
{{
    Packages::Compress ". gzip bzip2";
    Sources::Compress ". gzip bzip2";
    Contents::Compress "gzip";
    DeLinkLimit 0;
    MaxContentsChange 12000;
    FileMode 0644;
}}

TreeDefault
{{
    Contents::Header "{misc}/contents.header";
}};

"#,
        archive = layout.archive_root.display(),
        overrides = layout.overrides_root.display(),
        cache = layout.cache_root.display(),
        misc = layout.misc_root.display(),
    )
}

fn compressor_names(compressors: &[Compression]) -> String {
    compressors
        .iter()
        .map(|c| c.ftparchive_name())
        .collect::<Vec<_>>()
        .join(" ")
}

impl TreeStanza {
    /// Stanza for a suite's plain debs and sources.
    pub fn for_suite(
        layout: &ArchiveLayout,
        suite: &str,
        components: &[String],
        architectures: &[String],
        compressors: &[Compression],
        long_descriptions: bool,
    ) -> Self {
        let mut archs = architectures.to_vec();
        archs.push("source".to_string());
        Self {
            tree: layout.suite_dir(suite).display().to_string(),
            list_path: layout.overrides_root.display().to_string(),
            by_file: suite.to_string(),
            release: suite.to_string(),
            sections: components.to_vec(),
            architectures: archs,
            hide_extra: false,
            extensions: BinaryFormat::Deb.extension().to_string(),
            compressors: compressors.to_vec(),
            cache_insert: String::new(),
            long_descriptions,
        }
    }

    /// Stanza for one subcomponent (`debian-installer`, `debug`) of a
    /// component.
    pub fn for_subcomponent(
        layout: &ArchiveLayout,
        suite: &str,
        component: &str,
        subcomp: &str,
        architectures: &[String],
        compressors: &[Compression],
    ) -> Self {
        let extension = match subcomp {
            DEBIAN_INSTALLER => BinaryFormat::Udeb.extension(),
            DEBUG => BinaryFormat::Ddeb.extension(),
            _ => BinaryFormat::Deb.extension(),
        };
        Self {
            tree: layout
                .suite_dir(suite)
                .join(component)
                .display()
                .to_string(),
            list_path: layout.overrides_root.display().to_string(),
            by_file: format!("{}_{}", suite, component),
            release: format!("{}.{}", suite, component),
            sections: vec![subcomp.to_string()],
            architectures: architectures.to_vec(),
            hide_extra: true,
            extensions: extension.to_string(),
            compressors: compressors.to_vec(),
            cache_insert: format!("-{}", subcomp),
            long_descriptions: true,
        }
    }

    /// The stanza limited to a single architecture tag, or `None` if it
    /// does not cover `tag`.
    pub fn restricted_to(&self, tag: &str) -> Option<Self> {
        if !self.architectures.iter().any(|a| a == tag) {
            return None;
        }
        Some(Self {
            architectures: vec![tag.to_string()],
            ..self.clone()
        })
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        let compressors = compressor_names(&self.compressors);
        // Writing to a String cannot fail.
        let _ = write!(
            out,
            r#"
tree "{tree}"
{{
    FileList "{list}/{by_file}_$(SECTION)_binary-$(ARCH)";
    SourceFileList "{list}/{by_file}_$(SECTION)_source";
    Sections "{sections}";
    Architectures "{archs}";
    BinOverride "override.{release}.$(SECTION)";
    SrcOverride "override.{release}.$(SECTION).src";
    {hide}ExtraOverride "override.{release}.extra.$(SECTION)";
    Packages::Extensions "{extensions}";
    Packages::Compress "{compressors}";
    Sources::Compress "{compressors}";
    Translation::Compress "{compressors}";
    BinCacheDB "packages{cache}-$(ARCH).db";
    SrcCacheDB "sources{cache}.db";
    Contents " ";
    LongDescription "{long}";
}}

"#,
            tree = self.tree,
            list = self.list_path,
            by_file = self.by_file,
            sections = self.sections.join(" "),
            archs = self.architectures.join(" "),
            release = self.release,
            hide = if self.hide_extra { "// " } else { "" },
            extensions = self.extensions,
            compressors = compressors,
            cache = self.cache_insert,
            long = if self.long_descriptions { "true" } else { "false" },
        );
        out
    }
}

/// Write `content` to `path`, replacing any previous configuration.
pub fn write_config(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)
}
