//! Backend selection.
//!
//! Dispatches on a reference's schema tag: store-schema references get a
//! [`CharmStore`] client, local-schema references get a [`LocalRepository`].
//! Unknown schemas never reach this point; identity parsing rejects them.

use std::path::PathBuf;

use charmkit_core::{CharmRef, Schema};

use crate::local::LocalRepository;
use crate::store::{AuthHandler, CharmStore, CharmStoreParams};
use crate::{RepoError, Repository};

/// Configuration consumed by [`infer`].
#[derive(Default)]
pub struct InferParams {
    /// Root of the local repository; required for local-schema references.
    pub local_repo_path: Option<PathBuf>,
    /// Base URL of the charm store; the public store when empty.
    pub store_url: String,
    /// Cache directory handed to the store backend.
    pub store_cache_dir: PathBuf,
    /// HTTP client handed to the store backend.
    pub store_http_client: Option<reqwest::blocking::Client>,
    /// Authorization callback handed to the store backend.
    pub store_auth_handler: Option<AuthHandler>,
}

/// Pick the repository backend able to serve `reference`.
pub fn infer(
    reference: &CharmRef,
    params: InferParams,
) -> Result<Box<dyn Repository>, RepoError> {
    match reference.schema() {
        Schema::Store => Ok(Box::new(CharmStore::new(CharmStoreParams {
            url: params.store_url,
            cache_dir: params.store_cache_dir,
            http_client: params.store_http_client,
            auth_handler: params.store_auth_handler,
            test_mode: false,
        }))),
        Schema::Local => match params.local_repo_path {
            Some(path) => Ok(Box::new(LocalRepository::new(path))),
            None => Err(RepoError::LocalPathMissing),
        },
    }
}
