//! Local filesystem repository.
//!
//! Charms live under `<root>/<series>/<name>/` (extracted) or
//! `<root>/<series>/<name>.charm` (archived). A scan for an unversioned
//! identity returns the highest-revision candidate; corrupt entries are
//! logged and skipped so one bad directory never hides the rest.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::warn;

use charmkit_core::{Charm, CharmRef, CharmUrl, Schema, ARCHIVE_SUFFIX};

use crate::{CharmRevision, RepoError, Repository};

/// Repository rooted at a local directory.
pub struct LocalRepository {
    path: PathBuf,
    default_series: Option<String>,
}

impl LocalRepository {
    pub fn new(path: impl Into<PathBuf>) -> LocalRepository {
        LocalRepository {
            path: path.into(),
            default_series: None,
        }
    }

    /// Set a series applied to references that carry none.
    pub fn with_default_series(mut self, series: impl Into<String>) -> LocalRepository {
        self.default_series = Some(series.into());
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn not_found(&self, url: &CharmUrl) -> RepoError {
        RepoError::CharmNotFoundInRepo {
            repo_path: self.path.clone(),
            url: url.to_string(),
        }
    }
}

/// Candidates are non-hidden directories and `.charm` files; everything
/// else in a series directory is ignored.
fn might_be_charm(name: &str, is_dir: bool) -> bool {
    if name.starts_with('.') {
        return false;
    }
    is_dir || name.ends_with(ARCHIVE_SUFFIX)
}

impl Repository for LocalRepository {
    fn get(&self, url: &CharmUrl) -> Result<Charm, RepoError> {
        if url.schema() != Schema::Local {
            return Err(RepoError::NotLocal {
                url: url.to_string(),
            });
        }
        match fs::metadata(&self.path) {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) | Err(_) => {
                return Err(RepoError::RepositoryNotFound {
                    path: self.path.clone(),
                })
            }
        }

        let series_dir = self.path.join(url.series());
        // A missing series directory reads the same as an empty one.
        let Ok(entries) = fs::read_dir(&series_dir) else {
            return Err(self.not_found(url));
        };
        let mut names: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .collect();
        names.sort();

        let mut fallback: Option<Charm> = None;
        for entry_path in names {
            // Follows symbolic links to their target's metadata.
            let Ok(meta) = fs::metadata(&entry_path) else {
                continue;
            };
            let name = entry_path
                .file_name()
                .and_then(|n| n.to_str())
                .unwrap_or_default();
            if !might_be_charm(name, meta.is_dir()) {
                continue;
            }
            let charm = match Charm::read(&entry_path) {
                Ok(charm) => charm,
                Err(err) => {
                    warn!(path = %entry_path.display(), error = %err, "failed to load charm");
                    continue;
                }
            };
            if charm.name() != url.name() {
                continue;
            }
            if charm.revision() == url.revision() {
                return Ok(charm);
            }
            if fallback
                .as_ref()
                .map_or(true, |best| charm.revision() > best.revision())
            {
                fallback = Some(charm);
            }
        }

        match fallback {
            Some(charm) if url.revision() == -1 => Ok(charm),
            _ => Err(self.not_found(url)),
        }
    }

    fn latest(&self, urls: &[CharmUrl]) -> Result<Vec<CharmRevision>, RepoError> {
        let mut result = Vec::with_capacity(urls.len());
        for url in urls {
            match self.get(&url.with_revision(-1)) {
                Ok(charm) => result.push(CharmRevision {
                    revision: charm.revision(),
                    digest: String::new(),
                    err: None,
                }),
                Err(err) => result.push(CharmRevision {
                    revision: 0,
                    digest: String::new(),
                    err: Some(err),
                }),
            }
        }
        Ok(result)
    }

    fn resolve(&self, reference: &CharmRef) -> Result<CharmUrl, RepoError> {
        Ok(reference.resolve(self.default_series.as_deref())?)
    }
}
