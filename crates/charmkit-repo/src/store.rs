//! Charm store client.
//!
//! Talks to a remote charm index over HTTP:
//! - `GET <base>/charm-info?charms=<id>...[&stats=0]` for metadata,
//! - `GET <base>/charm-event?charms=<id>[@digest]` for publish events,
//! - `GET <base>/charm/<path>[?stats=0]` for archive bytes.
//!
//! Downloaded archives land in a digest-verified cache directory keyed by
//! the quoted canonical URL string; a cached file whose SHA256 matches the
//! store's reported digest is served without touching the network.

use std::fmt::Display;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use charmkit_core::{quote, Charm, CharmRef, CharmUrl, ARCHIVE_SUFFIX};

use crate::{CharmRevision, RepoError, Repository};

/// Base URL of the public charm store.
pub const DEFAULT_STORE_URL: &str = "https://store.charmkit.io";

/// Invoked with the request URL when the store answers 401, giving
/// interactive callers a chance to complete authorization out of band.
/// The failed request is still reported as an error.
pub type AuthHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Configuration for [`CharmStore::new`].
pub struct CharmStoreParams {
    /// Base URL of the charm index; [`DEFAULT_STORE_URL`] when empty.
    pub url: String,
    /// Directory holding downloaded charm archives. Must be configured;
    /// [`CharmStore::get`] panics on an empty path, as that is a host
    /// process setup bug rather than a runtime condition.
    pub cache_dir: PathBuf,
    /// HTTP client to use; a default blocking client when absent.
    pub http_client: Option<reqwest::blocking::Client>,
    /// Called when the store rejects a request as unauthorized.
    pub auth_handler: Option<AuthHandler>,
    /// Suppress usage-stat recording on the store side.
    pub test_mode: bool,
}

impl Default for CharmStoreParams {
    fn default() -> Self {
        CharmStoreParams {
            url: DEFAULT_STORE_URL.to_string(),
            cache_dir: PathBuf::new(),
            http_client: None,
            auth_handler: None,
            test_mode: false,
        }
    }
}

/// One record of a `charm-info` response.
#[derive(Debug, Clone, Deserialize)]
pub struct InfoResponse {
    #[serde(rename = "canonical-url", default)]
    pub canonical_url: String,
    #[serde(default)]
    pub revision: i32,
    #[serde(default)]
    pub sha256: String,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// One record of a `charm-event` response.
#[derive(Debug, Clone, Deserialize)]
pub struct EventResponse {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub revision: i32,
    #[serde(default)]
    pub digest: String,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub time: String,
}

/// Client for a remote charm index with a digest-verified local cache.
#[derive(Clone)]
pub struct CharmStore {
    base_url: String,
    cache_dir: PathBuf,
    client: reqwest::blocking::Client,
    auth_handler: Option<AuthHandler>,
    test_mode: bool,
}

impl CharmStore {
    pub fn new(params: CharmStoreParams) -> CharmStore {
        let base_url = if params.url.is_empty() {
            DEFAULT_STORE_URL.to_string()
        } else {
            params.url.trim_end_matches('/').to_string()
        };
        CharmStore {
            base_url,
            cache_dir: params.cache_dir,
            client: params
                .http_client
                .unwrap_or_else(reqwest::blocking::Client::new),
            auth_handler: params.auth_handler,
            test_mode: params.test_mode,
        }
    }

    /// A copy of this store with test mode set as given.
    pub fn with_test_mode(&self, test_mode: bool) -> CharmStore {
        CharmStore {
            test_mode,
            ..self.clone()
        }
    }

    fn send(&self, url: &str) -> Result<reqwest::blocking::Response, RepoError> {
        debug!(url, "charm store request");
        let response = self.client.get(url).send().map_err(rewrite_network_error)?;
        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                if let Some(handler) = &self.auth_handler {
                    handler(url);
                }
            }
            let body = response.text().unwrap_or_default();
            return Err(RepoError::InvalidStatus {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// One batched metadata query for all of `ids`, keyed by each id's
    /// string rendering. The response must carry one record per id.
    pub fn info<T: Display>(&self, ids: &[T]) -> Result<Vec<InfoResponse>, RepoError> {
        let mut query: Vec<(&str, String)> = ids
            .iter()
            .map(|id| ("charms", id.to_string()))
            .collect();
        if self.test_mode {
            query.push(("stats", "0".to_string()));
        }
        let url = format!(
            "{}/charm-info?{}",
            self.base_url,
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&query)
                .finish()
        );
        let infos: std::collections::HashMap<String, InfoResponse> = self.send(&url)?.json()?;

        let mut result = Vec::with_capacity(ids.len());
        for id in ids {
            let key = id.to_string();
            let mut info = infos
                .get(&key)
                .cloned()
                .ok_or_else(|| RepoError::MissingEntry { id: key.clone() })?;
            if info.errors.len() == 1 && info.errors[0] == "entry not found" {
                info.errors[0] = format!("charm not found: {key}");
            }
            result.push(info);
        }
        Ok(result)
    }

    /// Latest published event for `url`, or the event matching `digest`
    /// when one is given.
    pub fn event(&self, url: &CharmUrl, digest: &str) -> Result<EventResponse, RepoError> {
        let key = url.to_string();
        let query = if digest.is_empty() {
            key.clone()
        } else {
            format!("{key}@{digest}")
        };
        let request_url = format!(
            "{}/charm-event?{}",
            self.base_url,
            url::form_urlencoded::Serializer::new(String::new())
                .append_pair("charms", &query)
                .finish()
        );
        let mut events: std::collections::HashMap<String, EventResponse> =
            self.send(&request_url)?.json()?;
        let event = events
            .remove(&key)
            .ok_or_else(|| RepoError::MissingEntry { id: key.clone() })?;
        if event.errors.len() == 1 && event.errors[0] == "entry not found" {
            if digest.is_empty() {
                return Err(RepoError::EventNotFound { url: key });
            }
            return Err(RepoError::EventNotFoundDigest {
                url: key,
                digest: digest.to_string(),
            });
        }
        Ok(event)
    }

    fn revisions(&self, urls: &[CharmUrl]) -> Result<Vec<CharmRevision>, RepoError> {
        let infos = self.info(urls)?;
        let mut revisions = Vec::with_capacity(infos.len());
        for (url, info) in urls.iter().zip(infos) {
            for warning in &info.warnings {
                warn!(%url, warning, "charm store warning");
            }
            let err = if info.errors.is_empty() {
                None
            } else if info.errors.len() == 1 && info.errors[0].starts_with("charm not found") {
                Some(RepoError::CharmNotFound {
                    url: url.to_string(),
                })
            } else {
                Some(RepoError::StoreErrors {
                    id: url.to_string(),
                    messages: info.errors.clone(),
                })
            };
            revisions.push(CharmRevision {
                revision: info.revision,
                digest: info.sha256,
                err,
            });
        }
        Ok(revisions)
    }

    fn download(&self, url: &CharmUrl, dest: &Path) -> Result<(), RepoError> {
        let mut download_url = format!(
            "{}/charm/{}",
            self.base_url,
            url::form_urlencoded::byte_serialize(url.path().as_bytes()).collect::<String>()
        );
        if self.test_mode {
            download_url.push_str("?stats=0");
        }
        let mut response = self.send(&download_url)?;

        // Write to a sibling temp file, then rename into place, so a
        // concurrent reader never sees a partially-written archive.
        let mut tmp = tempfile::Builder::new()
            .prefix("charm-download")
            .tempfile_in(&self.cache_dir)?;
        io::copy(&mut response, tmp.as_file_mut())?;
        tmp.persist(dest).map_err(|err| RepoError::Io(err.error))?;
        Ok(())
    }
}

impl Repository for CharmStore {
    /// Fetch `url`, downloading into the cache only when the cached copy
    /// is absent or fails digest verification. Panics if the cache
    /// directory was left unconfigured.
    fn get(&self, url: &CharmUrl) -> Result<Charm, RepoError> {
        assert!(
            !self.cache_dir.as_os_str().is_empty(),
            "charm cache directory path is empty"
        );
        fs::create_dir_all(&self.cache_dir)?;

        let mut revisions = self.revisions(std::slice::from_ref(url))?;
        if revisions.len() != 1 {
            return Err(RepoError::UnexpectedResults(revisions.len()));
        }
        let rev_info = revisions.remove(0);
        if let Some(err) = rev_info.err {
            return Err(err);
        }

        let resolved = if url.revision() == -1 {
            url.with_revision(rev_info.revision)
        } else if url.revision() != rev_info.revision {
            return Err(RepoError::RevisionConflict {
                url: url.to_string(),
                got: rev_info.revision,
            });
        } else {
            url.clone()
        };

        let path = self
            .cache_dir
            .join(format!("{}{ARCHIVE_SUFFIX}", quote(&resolved.to_string())));
        if verify_digest(&path, &rev_info.digest).is_ok() {
            debug!(path = %path.display(), "charm cache hit");
        } else {
            self.download(&resolved, &path)?;
        }
        // Always re-check the final path: rejects both a corrupt cached
        // copy and a mismatched server response.
        verify_digest(&path, &rev_info.digest)?;
        Ok(Charm::read(&path)?)
    }

    fn latest(&self, urls: &[CharmUrl]) -> Result<Vec<CharmRevision>, RepoError> {
        if urls.is_empty() {
            return Ok(Vec::new());
        }
        let unversioned: Vec<CharmUrl> = urls.iter().map(|url| url.with_revision(-1)).collect();
        self.revisions(&unversioned)
    }

    fn resolve(&self, reference: &CharmRef) -> Result<CharmUrl, RepoError> {
        let infos = self.info(std::slice::from_ref(reference))?;
        let info = &infos[0];
        if info.canonical_url.is_empty() {
            return Err(RepoError::Unresolved {
                reference: reference.to_string(),
            });
        }
        Ok(CharmUrl::parse(&info.canonical_url)?)
    }
}

/// Check that the file at `path` hashes to the hex-encoded SHA256 `digest`.
pub(crate) fn verify_digest(path: &Path, digest: &str) -> Result<(), RepoError> {
    let file = fs::File::open(path)?;
    let mut reader = io::BufReader::new(file);
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    if hex::encode(hasher.finalize()) != digest {
        return Err(RepoError::DigestMismatch {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

fn rewrite_network_error(err: reqwest::Error) -> RepoError {
    if err.is_connect() || err.is_timeout() {
        RepoError::Connectivity {
            detail: err.to_string(),
        }
    } else {
        RepoError::Http(err)
    }
}
