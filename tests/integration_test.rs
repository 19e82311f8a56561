// tests/integration_test.rs

//! End-to-end install and uninstall flows over a local repository

use flate2::Compression;
use flate2::write::GzEncoder;
use pallet::db::PackageDb;
use pallet::installer::{Installer, System};
use pallet::package::{Package, PackageId};
use pallet::Error;
use pallet::repository::{LocalRepository, Repository};
use pallet::tree;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::path::Path;
use tempfile::TempDir;

fn write_artifact(repo_dir: &Path, rel_path: &str, files: &[(&str, &[u8])]) -> (String, i64) {
    let full = repo_dir.join(rel_path);
    fs::create_dir_all(full.parent().unwrap()).unwrap();

    let file = File::create(&full).unwrap();
    let enc = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(enc);
    for (path, body) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, *path, *body).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();

    let data = fs::read(&full).unwrap();
    let checksum = format!("{:x}", Sha256::digest(&data));
    (checksum, data.len() as i64)
}

fn pkg(category: &str, name: &str, version: &str, requires: Vec<PackageId>) -> Package {
    Package::new(PackageId::new(name, category, version), requires, vec![])
}

/// A repository with app/tool@1.0 depending on libs/dep@2.0, where the
/// tool package carries a finalizer
fn build_repository(marker: &Path) -> TempDir {
    let repo = TempDir::new().unwrap();

    let dep = pkg("libs", "dep", "2.0", vec![]);
    let tool = pkg(
        "app",
        "tool",
        "1.0",
        vec![PackageId::new("dep", "libs", "2.0")],
    );

    let (dep_sum, dep_size) =
        write_artifact(repo.path(), "artifacts/dep.tar.gz", &[("usr/lib/dep.so", b"dep")]);
    let (tool_sum, tool_size) = write_artifact(
        repo.path(),
        "artifacts/tool.tar.gz",
        &[("usr/bin/tool", b"tool"), ("etc/tool.conf", b"conf")],
    );

    let tree_root = repo.path().join("tree");
    tree::save_tree(&tree_root, &[dep.clone(), tool.clone()]).unwrap();
    fs::write(
        tree::package_dir(&tree_root, &tool).join(tree::FINALIZER_FILE),
        format!("install:\n  - touch {}\n", marker.display()),
    )
    .unwrap();

    let metadata = serde_json::json!({
        "name": "local",
        "packages": [tool, dep],
        "artifacts": [
            {"path": "artifacts/dep.tar.gz", "checksum": dep_sum, "size": dep_size,
             "package": {"name": "dep", "category": "libs", "version": "2.0"}},
            {"path": "artifacts/tool.tar.gz", "checksum": tool_sum, "size": tool_size,
             "package": {"name": "tool", "category": "app", "version": "1.0"}},
        ],
    });
    fs::write(
        repo.path().join("metadata.json"),
        serde_json::to_string_pretty(&metadata).unwrap(),
    )
    .unwrap();

    repo
}

fn test_system() -> (TempDir, System) {
    let target = TempDir::new().unwrap();
    let system = System {
        target: target.path().to_path_buf(),
        db: PackageDb::open_in_memory().unwrap(),
    };
    (target, system)
}

#[test]
fn test_install_with_dependency_and_finalizer() {
    let marker_dir = TempDir::new().unwrap();
    let marker = marker_dir.path().join("configured");
    let repo = build_repository(&marker);
    let (_target, system) = test_system();

    let installer = Installer::new(
        vec![Box::new(LocalRepository::new("local", repo.path(), 1)) as Box<dyn Repository>],
        2,
    );

    let wanted = vec![Package::reference(PackageId::new("tool", "app", "1.0"))];
    installer.install(&system, &wanted).unwrap();

    // Files extracted into the target root
    assert!(system.target.join("usr/bin/tool").exists());
    assert!(system.target.join("etc/tool.conf").exists());
    assert!(system.target.join("usr/lib/dep.so").exists());

    // Both packages recorded, with their file lists
    let installed = system.db.installed().unwrap();
    let fps: Vec<String> = installed.iter().map(|p| p.fingerprint()).collect();
    assert_eq!(fps, vec!["app/tool@1.0", "libs/dep@2.0"]);
    assert_eq!(
        system.db.get_package_files("app/tool@1.0").unwrap(),
        vec!["etc/tool.conf", "usr/bin/tool"]
    );

    // Finalizer ran
    assert!(marker.exists());
}

#[test]
fn test_reinstall_is_noop() {
    let marker_dir = TempDir::new().unwrap();
    let marker = marker_dir.path().join("configured");
    let repo = build_repository(&marker);
    let (_target, system) = test_system();

    let installer = Installer::new(
        vec![Box::new(LocalRepository::new("local", repo.path(), 1)) as Box<dyn Repository>],
        1,
    );
    let wanted = vec![Package::reference(PackageId::new("tool", "app", "1.0"))];

    installer.install(&system, &wanted).unwrap();
    assert!(marker.exists());
    fs::remove_file(&marker).unwrap();

    // Second request changes nothing and runs no finalizer again
    installer.install(&system, &wanted).unwrap();
    assert_eq!(system.db.installed().unwrap().len(), 2);
    assert!(!marker.exists());
}

#[test]
fn test_uninstall_removes_orphaned_dependency() {
    let marker_dir = TempDir::new().unwrap();
    let repo = build_repository(&marker_dir.path().join("configured"));
    let (_target, system) = test_system();

    let installer = Installer::new(
        vec![Box::new(LocalRepository::new("local", repo.path(), 1)) as Box<dyn Repository>],
        1,
    );
    installer
        .install(
            &system,
            &[Package::reference(PackageId::new("tool", "app", "1.0"))],
        )
        .unwrap();

    installer
        .uninstall(&system, &PackageId::new("tool", "app", "1.0"))
        .unwrap();

    // The dependency was only needed by tool, so it goes too
    assert!(system.db.installed().unwrap().is_empty());
    assert!(!system.target.join("usr/bin/tool").exists());
    assert!(!system.target.join("usr/lib/dep.so").exists());
}

#[test]
fn test_uninstall_not_installed() {
    let (_target, system) = test_system();
    let installer = Installer::new(vec![], 1);

    let err = installer
        .uninstall(&system, &PackageId::new("ghost", "app", "1.0"))
        .unwrap_err();
    assert!(matches!(err, Error::NotInstalledError(_)));
    assert!(system.db.installed().unwrap().is_empty());
}

#[test]
fn test_install_unknown_package_fails() {
    let marker_dir = TempDir::new().unwrap();
    let repo = build_repository(&marker_dir.path().join("configured"));
    let (_target, system) = test_system();

    let installer = Installer::new(
        vec![Box::new(LocalRepository::new("local", repo.path(), 1)) as Box<dyn Repository>],
        1,
    );

    let err = installer
        .install(
            &system,
            &[Package::reference(PackageId::new("ghost", "app", "9.9"))],
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotFoundError(_)));
}

#[test]
fn test_completed_jobs_keep_state_when_sibling_fails() {
    let repo = TempDir::new().unwrap();
    let good = pkg("app", "aaa", "1.0", vec![]);
    let bad = pkg("app", "bad", "1.0", vec![]);

    let (good_sum, good_size) =
        write_artifact(repo.path(), "artifacts/aaa.tar.gz", &[("usr/bin/aaa", b"aaa")]);
    let (_, bad_size) =
        write_artifact(repo.path(), "artifacts/bad.tar.gz", &[("usr/bin/bad", b"bad")]);

    // The second artifact's recorded checksum does not match its bytes
    let metadata = serde_json::json!({
        "name": "mixed",
        "packages": [good, bad],
        "artifacts": [
            {"path": "artifacts/aaa.tar.gz", "checksum": good_sum, "size": good_size,
             "package": {"name": "aaa", "category": "app", "version": "1.0"}},
            {"path": "artifacts/bad.tar.gz", "checksum": "0".repeat(64), "size": bad_size,
             "package": {"name": "bad", "category": "app", "version": "1.0"}},
        ],
    });
    fs::write(
        repo.path().join("metadata.json"),
        serde_json::to_string(&metadata).unwrap(),
    )
    .unwrap();

    let (_target, system) = test_system();
    // One worker: jobs run in fingerprint order, aaa before bad
    let installer = Installer::new(
        vec![Box::new(LocalRepository::new("mixed", repo.path(), 1)) as Box<dyn Repository>],
        1,
    );

    let err = installer
        .install(
            &system,
            &[
                Package::reference(PackageId::new("aaa", "app", "1.0")),
                Package::reference(PackageId::new("bad", "app", "1.0")),
            ],
        )
        .unwrap_err();
    assert!(matches!(err, Error::JobsFailed { .. }));

    // The completed job keeps its extracted files and its recorded state
    assert!(system.target.join("usr/bin/aaa").exists());
    assert!(system.db.find_package("app/aaa@1.0").unwrap().is_some());
    assert_eq!(
        system.db.get_package_files("app/aaa@1.0").unwrap(),
        vec!["usr/bin/aaa"]
    );
    assert!(system.db.find_package("app/bad@1.0").unwrap().is_none());
}

fn single_package_repo(payload: &str) -> TempDir {
    let repo = TempDir::new().unwrap();
    let solo = pkg("app", "solo", "1.0", vec![]);
    let (sum, size) = write_artifact(
        repo.path(),
        "artifacts/solo.tar.gz",
        &[(payload, b"payload")],
    );
    let metadata = serde_json::json!({
        "name": "repo",
        "packages": [solo],
        "artifacts": [
            {"path": "artifacts/solo.tar.gz", "checksum": sum, "size": size,
             "package": {"name": "solo", "category": "app", "version": "1.0"}},
        ],
    });
    fs::write(
        repo.path().join("metadata.json"),
        serde_json::to_string(&metadata).unwrap(),
    )
    .unwrap();
    repo
}

#[test]
fn test_priority_ties_keep_configuration_order() {
    // Both repositories provide app/solo@1.0 at the same priority; the
    // one configured first must win
    let zeta = single_package_repo("usr/bin/from_zeta");
    let alpha = single_package_repo("usr/bin/from_alpha");

    let (_target, system) = test_system();
    let installer = Installer::new(
        vec![
            Box::new(LocalRepository::new("zeta", zeta.path(), 1)) as Box<dyn Repository>,
            Box::new(LocalRepository::new("alpha", alpha.path(), 1)) as Box<dyn Repository>,
        ],
        1,
    );

    installer
        .install(
            &system,
            &[Package::reference(PackageId::new("solo", "app", "1.0"))],
        )
        .unwrap();

    assert_eq!(
        system.db.get_package_files("app/solo@1.0").unwrap(),
        vec!["usr/bin/from_zeta"]
    );
}

#[test]
fn test_ambiguous_artifact_fails_before_dispatch() {
    let repo = TempDir::new().unwrap();
    let only = pkg("app", "solo", "1.0", vec![]);
    let (sum, size) =
        write_artifact(repo.path(), "artifacts/solo.tar.gz", &[("usr/bin/solo", b"x")]);

    // Two artifacts bound to the same compile-spec package
    let metadata = serde_json::json!({
        "name": "broken",
        "packages": [only],
        "artifacts": [
            {"path": "artifacts/solo.tar.gz", "checksum": sum, "size": size,
             "package": {"name": "solo", "category": "app", "version": "1.0"}},
            {"path": "artifacts/solo-rebuild.tar.gz", "checksum": sum, "size": size,
             "package": {"name": "solo", "category": "app", "version": "1.0"}},
        ],
    });
    fs::write(
        repo.path().join("metadata.json"),
        serde_json::to_string(&metadata).unwrap(),
    )
    .unwrap();

    let (_target, system) = test_system();
    let installer = Installer::new(
        vec![Box::new(LocalRepository::new("broken", repo.path(), 1)) as Box<dyn Repository>],
        1,
    );

    let err = installer
        .install(
            &system,
            &[Package::reference(PackageId::new("solo", "app", "1.0"))],
        )
        .unwrap_err();
    assert!(matches!(err, Error::IntegrityError(_)));

    // Failed before any extraction or recording
    assert!(!system.target.join("usr/bin/solo").exists());
    assert!(system.db.installed().unwrap().is_empty());
}
