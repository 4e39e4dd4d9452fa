//! charmkit-repo
//!
//! Repository backends that resolve charm identities to charms:
//! - `store`: HTTP charm store client with a digest-verified local cache
//! - `local`: filesystem repository of extracted charm directories and
//!   `.charm` archives
//! - `infer`: schema-based selection of the backend for a reference
//! - `testing`: in-memory mock store for exercising store-dependent code
//!
//! All backends implement the [`Repository`] trait.

use std::path::PathBuf;

use thiserror::Error;

use charmkit_core::{CharmError, CharmRef, CharmUrl, IdentityError};

pub mod infer;
pub mod local;
pub mod store;
pub mod testing;

pub use crate::infer::{infer, InferParams};
pub use crate::local::LocalRepository;
pub use crate::store::{
    AuthHandler, CharmStore, CharmStoreParams, EventResponse, InfoResponse, DEFAULT_STORE_URL,
};

/// Errors raised by repository backends.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("charm not found: {url}")]
    CharmNotFound { url: String },

    #[error("charm not found in {}: {url}", repo_path.display())]
    CharmNotFoundInRepo { repo_path: PathBuf, url: String },

    #[error("no repository found at {}", path.display())]
    RepositoryNotFound { path: PathBuf },

    #[error("store returned charm with wrong revision {got} for {url}")]
    RevisionConflict { url: String, got: i32 },

    #[error("bad SHA256 of {}", path.display())]
    DigestMismatch { path: PathBuf },

    #[error("cannot access the charm store, check your internet connection: {detail}")]
    Connectivity { detail: String },

    #[error("charm store returned response without charm {id}")]
    MissingEntry { id: String },

    #[error("charm store returned status {status}: {body}")]
    InvalidStatus { status: u16, body: String },

    #[error("charm store reported errors for {id}: {}", messages.join("; "))]
    StoreErrors { id: String, messages: Vec<String> },

    #[error("cannot resolve charm URL: no series in reference {reference}")]
    Unresolved { reference: String },

    #[error("no events found for {url}")]
    EventNotFound { url: String },

    #[error("no event found for {url} with digest {digest}")]
    EventNotFoundDigest { url: String, digest: String },

    #[error("local repository got URL with non-local schema: {url}")]
    NotLocal { url: String },

    #[error("path to local repository not specified")]
    LocalPathMissing,

    #[error("expected 1 result, got {0}")]
    UnexpectedResults(usize),

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Charm(#[from] CharmError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// The latest known revision of a charm, with per-item error reporting so
/// one bad identity does not sink a whole batch.
#[derive(Debug)]
pub struct CharmRevision {
    pub revision: i32,
    /// SHA256 of the charm archive, hex encoded; empty when the backend
    /// does not track digests.
    pub digest: String,
    pub err: Option<RepoError>,
}

/// A source of charms addressed by [`CharmUrl`].
pub trait Repository {
    /// Fetch the charm addressed by `url`, with revision -1 meaning the
    /// latest available.
    fn get(&self, url: &CharmUrl) -> Result<charmkit_core::Charm, RepoError>;

    /// Report the latest revision of each charm; revisions in the input
    /// URLs are ignored. The result has one entry per input, in order.
    fn latest(&self, urls: &[CharmUrl]) -> Result<Vec<CharmRevision>, RepoError>;

    /// Resolve a possibly series-less reference to a fully-qualified URL.
    fn resolve(&self, reference: &CharmRef) -> Result<CharmUrl, RepoError>;
}

/// Convenience wrapper around [`Repository::latest`] for a single charm.
pub fn latest_revision(repo: &dyn Repository, url: &CharmUrl) -> Result<i32, RepoError> {
    let mut revisions = repo.latest(std::slice::from_ref(url))?;
    if revisions.len() != 1 {
        return Err(RepoError::UnexpectedResults(revisions.len()));
    }
    let rev = revisions.remove(0);
    match rev.err {
        Some(err) => Err(err),
        None => Ok(rev.revision),
    }
}
