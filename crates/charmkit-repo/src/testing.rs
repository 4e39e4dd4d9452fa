//! In-memory mock charm store.
//!
//! Lets store-dependent code run without a network. Charms are held in a
//! table keyed by unversioned URL string, then by revision; the table is
//! behind a mutex so concurrent callers see consistent state.

use std::collections::BTreeMap;

use anyhow::{bail, ensure, Result};
use parking_lot::Mutex;

use charmkit_core::{Charm, CharmRef, CharmUrl};

use crate::{CharmRevision, RepoError, Repository};

#[derive(Default)]
struct MockState {
    /// Unversioned URL string -> revision -> charm.
    charms: BTreeMap<String, BTreeMap<i32, Charm>>,
    auth_attrs: String,
    test_mode: bool,
    default_series: String,
}

/// A [`Repository`] backed by an in-memory charm table.
pub struct MockStore {
    state: Mutex<MockState>,
}

impl Default for MockStore {
    fn default() -> Self {
        MockStore::new()
    }
}

impl MockStore {
    pub fn new() -> MockStore {
        MockStore {
            state: Mutex::new(MockState {
                default_series: "precise".to_string(),
                ..MockState::default()
            }),
        }
    }

    pub fn set_default_series(&self, series: impl Into<String>) {
        self.state.lock().default_series = series.into();
    }

    pub fn default_series(&self) -> String {
        self.state.lock().default_series.clone()
    }

    pub fn set_auth_attrs(&self, attrs: impl Into<String>) {
        self.state.lock().auth_attrs = attrs.into();
    }

    pub fn auth_attrs(&self) -> String {
        self.state.lock().auth_attrs.clone()
    }

    pub fn set_test_mode(&self, test_mode: bool) {
        self.state.lock().test_mode = test_mode;
    }

    pub fn test_mode(&self) -> bool {
        self.state.lock().test_mode
    }

    /// Publish `charm` under `url`, which must carry an explicit revision
    /// agreeing with the charm's own name and revision.
    pub fn set_charm(&self, url: &CharmUrl, charm: Charm) -> Result<()> {
        ensure!(
            url.revision() >= 0,
            "mock store requires a revisioned URL: {url}"
        );
        if charm.name() != url.name() || charm.revision() != url.revision() {
            bail!(
                "charm does not match its URL {url}: got {}-{}",
                charm.name(),
                charm.revision()
            );
        }
        let base = url.with_revision(-1).to_string();
        self.state
            .lock()
            .charms
            .entry(base)
            .or_default()
            .insert(url.revision(), charm);
        Ok(())
    }

    /// Withdraw the single revision named by `url`.
    pub fn remove_charm(&self, url: &CharmUrl) {
        let base = url.with_revision(-1).to_string();
        let mut state = self.state.lock();
        if let Some(revisions) = state.charms.get_mut(&base) {
            revisions.remove(&url.revision());
        }
    }

    fn interpret(&self, url: &CharmUrl) -> Result<Charm, RepoError> {
        let state = self.state.lock();
        let base = url.with_revision(-1).to_string();
        let not_found = || RepoError::CharmNotFound {
            url: url.to_string(),
        };
        let revisions = state.charms.get(&base).ok_or_else(not_found)?;
        let charm = if url.revision() == -1 {
            revisions.values().next_back()
        } else {
            revisions.get(&url.revision())
        };
        charm.cloned().ok_or_else(not_found)
    }
}

impl Repository for MockStore {
    fn get(&self, url: &CharmUrl) -> Result<Charm, RepoError> {
        self.interpret(url)
    }

    fn latest(&self, urls: &[CharmUrl]) -> Result<Vec<CharmRevision>, RepoError> {
        let mut result = Vec::with_capacity(urls.len());
        for url in urls {
            match self.interpret(&url.with_revision(-1)) {
                Ok(charm) => result.push(CharmRevision {
                    revision: charm.revision(),
                    digest: format!("digest-{}", charm.revision()),
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
        let default_series = self.state.lock().default_series.clone();
        Ok(reference.resolve(Some(&default_series))?)
    }
}

#[cfg(test)]
mod tests {
    use charmkit_core::CharmMeta;

    use super::*;
    use crate::latest_revision;

    fn charm(name: &str, revision: i32) -> Charm {
        Charm::new(
            CharmMeta {
                name: name.to_string(),
                summary: String::new(),
                description: String::new(),
            },
            revision,
        )
    }

    fn populated() -> MockStore {
        let store = MockStore::new();
        for revision in [2, 5, 9] {
            let url = CharmUrl::parse(&format!("store:precise/wordpress-{revision}")).unwrap();
            store.set_charm(&url, charm("wordpress", revision)).unwrap();
        }
        store
    }

    #[test]
    fn set_charm_rejects_mismatches() {
        let store = MockStore::new();
        let unversioned = CharmUrl::parse("store:precise/wordpress").unwrap();
        assert!(store.set_charm(&unversioned, charm("wordpress", 1)).is_err());

        let url = CharmUrl::parse("store:precise/wordpress-1").unwrap();
        assert!(store.set_charm(&url, charm("mysql", 1)).is_err());
        assert!(store.set_charm(&url, charm("wordpress", 2)).is_err());
        store.set_charm(&url, charm("wordpress", 1)).unwrap();
    }

    #[test]
    fn get_exact_and_latest_revision() {
        let store = populated();
        let exact = CharmUrl::parse("store:precise/wordpress-5").unwrap();
        assert_eq!(store.get(&exact).unwrap().revision(), 5);

        let unversioned = exact.with_revision(-1);
        assert_eq!(store.get(&unversioned).unwrap().revision(), 9);

        let missing = exact.with_revision(4);
        assert!(matches!(
            store.get(&missing),
            Err(RepoError::CharmNotFound { .. })
        ));
    }

    #[test]
    fn latest_isolates_failures() {
        let store = populated();
        let wordpress = CharmUrl::parse("store:precise/wordpress").unwrap();
        let ghost = CharmUrl::parse("store:precise/ghost").unwrap();
        let revisions = store.latest(&[wordpress.clone(), ghost]).unwrap();
        assert_eq!(revisions.len(), 2);
        assert_eq!(revisions[0].revision, 9);
        assert!(revisions[0].err.is_none());
        assert!(matches!(
            revisions[1].err,
            Some(RepoError::CharmNotFound { .. })
        ));

        assert_eq!(latest_revision(&store, &wordpress).unwrap(), 9);
    }

    #[test]
    fn resolve_applies_default_series() {
        let store = populated();
        let reference = CharmRef::parse("store:wordpress").unwrap();
        let url = store.resolve(&reference).unwrap();
        assert_eq!(url.to_string(), "store:precise/wordpress");

        store.set_default_series("trusty");
        assert_eq!(
            store.resolve(&reference).unwrap().to_string(),
            "store:trusty/wordpress"
        );
    }

    #[test]
    fn remove_charm_withdraws_one_revision() {
        let store = populated();
        let url = CharmUrl::parse("store:precise/wordpress-9").unwrap();
        store.remove_charm(&url);
        assert!(store.get(&url).is_err());
        assert_eq!(store.get(&url.with_revision(-1)).unwrap().revision(), 5);
    }

    #[test]
    fn attributes_are_shared_across_callers() {
        let store = populated();
        assert!(!store.test_mode());
        store.set_test_mode(true);
        assert!(store.test_mode());
        store.set_auth_attrs("token=abc");
        assert_eq!(store.auth_attrs(), "token=abc");
        assert_eq!(store.default_series(), "precise");
    }
}
