//! Template store and materialization.
//!
//! A template store is a directory holding either `<name>/` directory trees
//! or `<name>.zip` archives. [`TemplateStore::materialize`] turns one of them
//! into a fresh instance directory. It does blocking I/O and is meant to run
//! on the [`WorkerPool`](crate::WorkerPool).

mod archive;
mod fs;

use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

pub use fs::remove_dir_if_exists;

/// Extension of archived templates.
pub const ARCHIVE_EXTENSION: &str = "zip";

/// Why a template could not be materialized.
#[derive(Debug, thiserror::Error)]
pub enum TemplateLoadCause {
    /// Neither `<name>/` nor `<name>.zip` exists under the store root.
    #[error("no template directory or archive found")]
    NotFound,
    /// The name is empty or contains path separators or `..`.
    #[error("invalid template name")]
    InvalidName,
    /// Filesystem failure while copying or extracting.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The archive could not be parsed.
    #[error("invalid archive: {0}")]
    Archive(String),
    /// An archive entry would escape the destination directory.
    #[error("unsafe archive entry: {0}")]
    UnsafeEntry(String),
    /// An archive entry uses a compression method other than Store/Deflate.
    #[error("unsupported compression {method} for entry {entry}")]
    UnsupportedCompression {
        /// Entry path inside the archive.
        entry: String,
        /// Compression method as reported by the archive.
        method: String,
    },
}

/// Materialization failure, naming the template.
#[derive(Debug, thiserror::Error)]
#[error("Failed to load template {template}: {cause}")]
pub struct TemplateLoadError {
    /// Template name that was requested.
    pub template: String,
    /// Underlying cause.
    #[source]
    pub cause: TemplateLoadCause,
}

impl TemplateLoadError {
    /// Build an error for `template`.
    pub fn new(template: impl Into<String>, cause: impl Into<TemplateLoadCause>) -> Self {
        Self {
            template: template.into(),
            cause: cause.into(),
        }
    }
}

/// Where a template was found.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TemplateSource {
    /// A directory tree copied file by file.
    Directory(PathBuf),
    /// A zip archive extracted entry by entry.
    Archive(PathBuf),
}

impl TemplateSource {
    /// `"directory"` or `"archive"`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Directory(_) => "directory",
            Self::Archive(_) => "archive",
        }
    }
}

/// Result of a successful materialization.
#[derive(Clone, Debug)]
pub struct Materialized {
    /// Where the template came from.
    pub source: TemplateSource,
    /// Destination directory.
    pub destination: PathBuf,
    /// Regular files written.
    pub files: usize,
}

/// Read-only view of a template store root.
#[derive(Clone, Debug)]
pub struct TemplateStore {
    root: PathBuf,
}

impl TemplateStore {
    /// Store rooted at `root`. The directory need not exist yet.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the store root if it is missing.
    pub fn ensure_root(&self) -> io::Result<()> {
        if !self.root.is_dir() {
            info!(root = %self.root.display(), "creating template store");
        }
        std::fs::create_dir_all(&self.root)
    }

    /// Locate `name`, preferring a directory over an archive.
    pub fn resolve(&self, name: &str) -> Result<TemplateSource, TemplateLoadError> {
        validate_name(name).map_err(|cause| TemplateLoadError::new(name, cause))?;
        let dir = self.root.join(name);
        if dir.is_dir() {
            return Ok(TemplateSource::Directory(dir));
        }
        let archive = self.root.join(format!("{name}.{ARCHIVE_EXTENSION}"));
        if archive.is_file() {
            return Ok(TemplateSource::Archive(archive));
        }
        Err(TemplateLoadError::new(name, TemplateLoadCause::NotFound))
    }

    /// Template names available in the store, sorted.
    pub fn list(&self) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        let entries = match std::fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(e),
        };
        for entry in entries {
            let path = entry?.path();
            let name = if path.is_dir() {
                path.file_name().and_then(|n| n.to_str())
            } else if path.extension().and_then(|e| e.to_str()) == Some(ARCHIVE_EXTENSION) {
                path.file_stem().and_then(|n| n.to_str())
            } else {
                None
            };
            if let Some(name) = name {
                names.push(name.to_string());
            }
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Produce a ready-to-mount copy of `name` at `destination`.
    ///
    /// Any existing `destination` is deleted first. On failure the
    /// destination may be left partial; the caller owns its cleanup.
    pub fn materialize(
        &self,
        name: &str,
        destination: &Path,
    ) -> Result<Materialized, TemplateLoadError> {
        let fail = |cause: TemplateLoadCause| TemplateLoadError::new(name, cause);
        validate_name(name).map_err(fail)?;

        if remove_dir_if_exists(destination).map_err(|e| fail(e.into()))? {
            debug!(destination = %destination.display(), "removed stale instance directory");
        }
        std::fs::create_dir_all(destination).map_err(|e| fail(e.into()))?;

        let source = self.resolve(name)?;
        let files = match &source {
            TemplateSource::Directory(dir) => fs::copy_tree(dir, destination),
            TemplateSource::Archive(zip) => archive::extract(zip, destination),
        }
        .map_err(fail)?;

        info!(
            template = name,
            source = source.kind(),
            files,
            destination = %destination.display(),
            "template materialized"
        );
        Ok(Materialized {
            source,
            destination: destination.to_path_buf(),
            files,
        })
    }
}

fn validate_name(name: &str) -> Result<(), TemplateLoadCause> {
    let bad = name.is_empty()
        || name == "."
        || name.contains("..")
        || name.contains(['/', '\\'])
        || Path::new(name).is_absolute();
    if bad {
        Err(TemplateLoadCause::InvalidName)
    } else {
        Ok(())
    }
}
