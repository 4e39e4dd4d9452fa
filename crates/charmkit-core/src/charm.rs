//! Charm metadata reading.
//!
//! A charm on disk is either an extracted directory or a `.charm` zip
//! archive. Both carry a `metadata.yaml` describing the charm and an
//! optional `revision` file holding a decimal revision number; a charm
//! without a revision file is at revision 0.

use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml_bw as serde_yaml;
use thiserror::Error;

/// File extension used by charm archives.
pub const ARCHIVE_SUFFIX: &str = ".charm";

/// Errors raised while reading a charm from disk.
#[derive(Debug, Error)]
pub enum CharmError {
    #[error("cannot read charm at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid charm metadata in {path}: {reason}")]
    Metadata { path: PathBuf, reason: String },
    #[error("invalid charm revision in {path}: {reason}")]
    Revision { path: PathBuf, reason: String },
    #[error("invalid charm archive {path}: {reason}")]
    Archive { path: PathBuf, reason: String },
}

/// The contents of a charm's `metadata.yaml`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CharmMeta {
    pub name: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub description: String,
}

/// A charm read from disk, or constructed in memory for tests.
#[derive(Debug, Clone)]
pub struct Charm {
    meta: CharmMeta,
    revision: i32,
    path: PathBuf,
}

impl Charm {
    /// Construct an in-memory charm with no backing path.
    pub fn new(meta: CharmMeta, revision: i32) -> Self {
        Charm {
            meta,
            revision,
            path: PathBuf::new(),
        }
    }

    /// Read a charm from `path`, which holds either an extracted charm
    /// directory or a `.charm` archive.
    pub fn read(path: impl AsRef<Path>) -> Result<Charm, CharmError> {
        let path = path.as_ref();
        let io_err = |source| CharmError::Io {
            path: path.to_path_buf(),
            source,
        };
        if fs::metadata(path).map_err(io_err)?.is_dir() {
            Charm::read_dir(path)
        } else {
            Charm::read_archive(path)
        }
    }

    fn read_dir(path: &Path) -> Result<Charm, CharmError> {
        let meta_path = path.join("metadata.yaml");
        let meta_text = fs::read_to_string(&meta_path).map_err(|source| CharmError::Io {
            path: meta_path,
            source,
        })?;
        let meta = parse_meta(path, &meta_text)?;

        let revision_path = path.join("revision");
        let revision = match fs::read_to_string(&revision_path) {
            Ok(text) => parse_revision(path, &text)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => 0,
            Err(source) => {
                return Err(CharmError::Io {
                    path: revision_path,
                    source,
                })
            }
        };

        Ok(Charm {
            meta,
            revision,
            path: path.to_path_buf(),
        })
    }

    fn read_archive(path: &Path) -> Result<Charm, CharmError> {
        let archive_err = |reason: String| CharmError::Archive {
            path: path.to_path_buf(),
            reason,
        };
        let file = fs::File::open(path).map_err(|source| CharmError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut archive = zip::ZipArchive::new(file).map_err(|err| archive_err(err.to_string()))?;

        let meta_text = {
            let mut entry = archive
                .by_name("metadata.yaml")
                .map_err(|err| archive_err(format!("metadata.yaml: {err}")))?;
            let mut text = String::new();
            entry
                .read_to_string(&mut text)
                .map_err(|err| archive_err(format!("metadata.yaml: {err}")))?;
            text
        };
        let meta = parse_meta(path, &meta_text)?;

        let revision = match archive.by_name("revision") {
            Ok(mut entry) => {
                let mut text = String::new();
                entry
                    .read_to_string(&mut text)
                    .map_err(|err| archive_err(format!("revision: {err}")))?;
                parse_revision(path, &text)?
            }
            Err(zip::result::ZipError::FileNotFound) => 0,
            Err(err) => return Err(archive_err(format!("revision: {err}"))),
        };

        Ok(Charm {
            meta,
            revision,
            path: path.to_path_buf(),
        })
    }

    pub fn meta(&self) -> &CharmMeta {
        &self.meta
    }

    pub fn name(&self) -> &str {
        &self.meta.name
    }

    pub fn revision(&self) -> i32 {
        self.revision
    }

    /// Location the charm was read from; empty for in-memory charms.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_meta(path: &Path, text: &str) -> Result<CharmMeta, CharmError> {
    serde_yaml::from_str(text).map_err(|err| CharmError::Metadata {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })
}

fn parse_revision(path: &Path, text: &str) -> Result<i32, CharmError> {
    text.trim()
        .parse()
        .map_err(|_| CharmError::Revision {
            path: path.to_path_buf(),
            reason: format!("invalid revision file contents {:?}", text.trim()),
        })
}
