//! Local filesystem repository tests over tempdir fixtures.

use std::fs;
use std::io::Write;
use std::path::Path;

use zip::write::FileOptions;

use charmkit_core::{CharmRef, CharmUrl};
use charmkit_repo::{LocalRepository, RepoError, Repository};

fn write_charm_dir(root: &Path, series: &str, dir_name: &str, name: &str, revision: i32) {
    let charm_dir = root.join(series).join(dir_name);
    fs::create_dir_all(&charm_dir).unwrap();
    fs::write(
        charm_dir.join("metadata.yaml"),
        format!("name: {name}\nsummary: test charm\n"),
    )
    .unwrap();
    fs::write(charm_dir.join("revision"), revision.to_string()).unwrap();
}

fn write_charm_archive(root: &Path, series: &str, file_name: &str, name: &str, revision: i32) {
    let series_dir = root.join(series);
    fs::create_dir_all(&series_dir).unwrap();
    let file = fs::File::create(series_dir.join(file_name)).unwrap();
    let mut zip = zip::ZipWriter::new(file);
    zip.start_file("metadata.yaml", FileOptions::default()).unwrap();
    write!(zip, "name: {name}\nsummary: test charm\n").unwrap();
    zip.start_file("revision", FileOptions::default()).unwrap();
    write!(zip, "{revision}").unwrap();
    zip.finish().unwrap();
}

#[test]
fn unversioned_get_picks_highest_revision() {
    let root = tempfile::tempdir().unwrap();
    for (dir, revision) in [("wordpress-a", 2), ("wordpress-b", 5), ("wordpress-c", 9)] {
        write_charm_dir(root.path(), "precise", dir, "wordpress", revision);
    }
    let repo = LocalRepository::new(root.path());
    let url = CharmUrl::parse("local:precise/wordpress").unwrap();
    assert_eq!(repo.get(&url).unwrap().revision(), 9);
}

#[test]
fn exact_revision_match_wins() {
    let root = tempfile::tempdir().unwrap();
    for (dir, revision) in [("wordpress-a", 2), ("wordpress-b", 5), ("wordpress-c", 9)] {
        write_charm_dir(root.path(), "precise", dir, "wordpress", revision);
    }
    let repo = LocalRepository::new(root.path());
    let url = CharmUrl::parse("local:precise/wordpress-5").unwrap();
    assert_eq!(repo.get(&url).unwrap().revision(), 5);

    // An explicit revision nobody has is a miss, not a fallback.
    let missing = url.with_revision(4);
    assert!(matches!(
        repo.get(&missing),
        Err(RepoError::CharmNotFoundInRepo { .. })
    ));
}

#[test]
fn archives_are_candidates_too() {
    let root = tempfile::tempdir().unwrap();
    write_charm_archive(root.path(), "precise", "wordpress.charm", "wordpress", 4);
    let repo = LocalRepository::new(root.path());
    let url = CharmUrl::parse("local:precise/wordpress").unwrap();
    assert_eq!(repo.get(&url).unwrap().revision(), 4);
}

#[test]
fn corrupt_and_irrelevant_entries_are_skipped() {
    let root = tempfile::tempdir().unwrap();
    let series_dir = root.path().join("precise");
    write_charm_dir(root.path(), "precise", "wordpress", "wordpress", 3);

    // None of these may abort or pollute the scan.
    fs::create_dir_all(series_dir.join(".hidden")).unwrap();
    fs::create_dir_all(series_dir.join("broken")).unwrap();
    fs::write(series_dir.join("broken").join("metadata.yaml"), ": not yaml").unwrap();
    fs::write(series_dir.join("notes.txt"), "not a charm").unwrap();
    fs::write(series_dir.join("bogus.charm"), "not a zip").unwrap();
    write_charm_dir(root.path(), "precise", "mysql", "mysql", 1);

    let repo = LocalRepository::new(root.path());
    let url = CharmUrl::parse("local:precise/wordpress").unwrap();
    assert_eq!(repo.get(&url).unwrap().revision(), 3);
}

#[test]
fn missing_root_is_repository_not_found() {
    let root = tempfile::tempdir().unwrap();
    let repo = LocalRepository::new(root.path().join("nope"));
    let url = CharmUrl::parse("local:precise/wordpress").unwrap();
    assert!(matches!(
        repo.get(&url),
        Err(RepoError::RepositoryNotFound { .. })
    ));
}

#[test]
fn missing_series_dir_reads_as_not_found() {
    let root = tempfile::tempdir().unwrap();
    write_charm_dir(root.path(), "precise", "wordpress", "wordpress", 3);
    let repo = LocalRepository::new(root.path());
    let url = CharmUrl::parse("local:trusty/wordpress").unwrap();
    assert!(matches!(
        repo.get(&url),
        Err(RepoError::CharmNotFoundInRepo { .. })
    ));
}

#[test]
fn store_schema_urls_are_rejected() {
    let root = tempfile::tempdir().unwrap();
    let repo = LocalRepository::new(root.path());
    let url = CharmUrl::parse("store:precise/wordpress").unwrap();
    assert!(matches!(repo.get(&url), Err(RepoError::NotLocal { .. })));
}

#[test]
fn latest_reports_per_charm() {
    let root = tempfile::tempdir().unwrap();
    write_charm_dir(root.path(), "precise", "wordpress", "wordpress", 6);
    let repo = LocalRepository::new(root.path());

    let wordpress = CharmUrl::parse("local:precise/wordpress-2").unwrap();
    let ghost = CharmUrl::parse("local:precise/ghost").unwrap();
    let revisions = repo.latest(&[wordpress, ghost]).unwrap();
    assert_eq!(revisions.len(), 2);
    // Revisions on the input are ignored.
    assert_eq!(revisions[0].revision, 6);
    assert!(revisions[0].digest.is_empty());
    assert!(revisions[0].err.is_none());
    assert!(matches!(
        revisions[1].err,
        Some(RepoError::CharmNotFoundInRepo { .. })
    ));
}

#[test]
fn resolve_uses_default_series() {
    let root = tempfile::tempdir().unwrap();
    let reference = CharmRef::parse("local:wordpress").unwrap();

    let bare = LocalRepository::new(root.path());
    assert!(bare.resolve(&reference).is_err());

    let repo = LocalRepository::new(root.path()).with_default_series("trusty");
    assert_eq!(
        repo.resolve(&reference).unwrap().to_string(),
        "local:trusty/wordpress"
    );

    let qualified = CharmRef::parse("local:precise/wordpress-2").unwrap();
    assert_eq!(
        repo.resolve(&qualified).unwrap().to_string(),
        "local:precise/wordpress-2"
    );
}
