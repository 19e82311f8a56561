// src/installer/mod.rs

//! Package installation and removal
//!
//! The installer drives the full install pipeline: synchronize
//! repositories, resolve the request with the solver, download, extract
//! and record artifacts over a worker pool, then run finalizers in
//! dependency order. Removal walks the recorded
//! files of every package the solver asserts out, dependents first.

pub mod finalizer;
pub mod pool;

use crate::db::PackageDb;
use crate::error::{Error, Result};
use crate::package::{Package, PackageId};
use crate::repository::{
    self, Artifact, Repository, RepositoryClient, SyncedRepository, fetch_artifact,
};
use crate::solver::{Solver, SolverStrategy};
use crate::tree;
use finalizer::Finalizer;
use flate2::read::GzDecoder;
use pool::WorkerPool;
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// The machine being operated on: a filesystem root and the database
/// recording what is installed there
pub struct System {
    pub target: PathBuf,
    pub db: PackageDb,
}

/// A package bound to the artifact that provides it and the repository
/// the artifact downloads from
#[derive(Debug, Clone)]
pub struct ArtifactMatch {
    pub package: Package,
    pub artifact: Artifact,
    pub repo_base: String,
    pub tree_root: PathBuf,
}

pub struct Installer {
    repositories: Vec<Box<dyn Repository>>,
    concurrency: usize,
}

impl Installer {
    /// Create an installer over the given repositories; `concurrency`
    /// bounds both solver parallelism and artifact workers
    pub fn new(repositories: Vec<Box<dyn Repository>>, concurrency: usize) -> Self {
        Self {
            repositories,
            concurrency: concurrency.max(1),
        }
    }

    fn strategy(&self) -> SolverStrategy {
        if self.concurrency > 1 {
            SolverStrategy::Parallel(self.concurrency)
        } else {
            SolverStrategy::Sequential
        }
    }

    /// Synchronize every repository, highest priority first. The sort is
    /// stable: equal priorities keep their configuration order.
    fn sync_all(&self) -> Result<Vec<SyncedRepository>> {
        let mut synced = self
            .repositories
            .iter()
            .map(|r| r.sync())
            .collect::<Result<Vec<_>>>()?;
        synced.sort_by(|a, b| b.priority.cmp(&a.priority));
        Ok(synced)
    }

    /// Install `wanted` and everything it requires onto `system`.
    ///
    /// Already-installed packages are retained and never re-dispatched,
    /// so repeating a request is a no-op. Every requested package must
    /// match exactly one artifact before any download starts.
    pub fn install(&self, system: &System, wanted: &[Package]) -> Result<()> {
        if wanted.is_empty() {
            return Ok(());
        }

        let synced = self.sync_all()?;
        let world = repository::world(&synced);

        // Every requested package must exist in the merged world
        let world_fps: HashSet<String> = world.iter().map(|p| p.fingerprint()).collect();
        for pkg in wanted {
            let fp = pkg.fingerprint();
            if !world_fps.contains(&fp) {
                return Err(Error::NotFoundError(format!(
                    "Package {} is not provided by any repository",
                    fp
                )));
            }
        }

        let installed = system.db.installed()?;
        let installed_fps: HashSet<String> =
            installed.iter().map(|p| p.fingerprint()).collect();

        let solver = Solver::new(&installed, &world, self.strategy());
        let solution = solver.install(wanted)?;

        // Bind artifacts up front: an unmatched or ambiguous package
        // fails the whole request before anything is downloaded
        let mut matches: Vec<ArtifactMatch> = Vec::new();
        for assert in solution.asserts() {
            if !assert.value || !assert.package.flagged {
                continue;
            }
            if installed_fps.contains(&assert.package.fingerprint()) {
                continue;
            }
            matches.push(match_artifact(&synced, &assert.package)?);
        }
        matches.sort_by_key(|m| m.package.fingerprint());

        info!("Installing {} package(s)", matches.len());

        let match_index: HashMap<String, ArtifactMatch> = matches
            .iter()
            .map(|m| (m.package.fingerprint(), m.clone()))
            .collect();

        // Fan out download + extraction. Each completed job records its
        // package and file list immediately, so a failing sibling never
        // leaves extracted files without database state.
        let staging = tempfile::tempdir()?;
        let client = RepositoryClient::new()?;

        let pool = WorkerPool::new(self.concurrency);
        pool.execute(matches, |m: &ArtifactMatch| {
            let fp = m.package.fingerprint();
            let dest_dir = staging.path().join(fp.replace(['/', '@'], "_"));
            fs::create_dir_all(&dest_dir)?;

            let archive = fetch_artifact(&client, &m.repo_base, &m.artifact, &dest_dir)?;
            let files = extract_archive(&archive, &system.target)?;
            debug!("Extracted {} file(s) for {}", files.len(), fp);

            if system.db.find_package(&fp)?.is_some() {
                system.db.update_package(&m.package)?;
            } else {
                system.db.create_package(&m.package)?;
            }
            system.db.set_package_files(&fp, &files)?;
            info!("Installed {}", fp);
            Ok(())
        })?;

        // Run finalizers dependencies-first, at most once per fingerprint
        // per request even when several roots reach the same package
        let mut finalized: HashSet<String> = HashSet::new();
        for root in wanted {
            for assert in solution.order(&root.fingerprint())? {
                if !assert.value || !assert.package.flagged {
                    continue;
                }
                let fp = assert.package.fingerprint();
                // Only packages this request actually installed
                let Some(m) = match_index.get(&fp) else { continue };
                if !finalized.insert(fp.clone()) {
                    continue;
                }
                if let Some(path) = tree::finalizer_path(&m.tree_root, &assert.package) {
                    Finalizer::from_file(&path)?.run_install(&fp)?;
                }
            }
        }

        Ok(())
    }

    /// Remove `target` and any dependencies left orphaned by its removal
    pub fn uninstall(&self, system: &System, target: &PackageId) -> Result<()> {
        let installed = system.db.installed()?;
        let target_fp = target.fingerprint();
        let target_pkg = installed
            .iter()
            .find(|p| p.fingerprint() == target_fp)
            .cloned()
            .ok_or_else(|| Error::NotInstalledError(target_fp.clone()))?;

        // Closed world: the installed set is the only universe removal
        // reasons about
        let solver = Solver::new(&installed, &installed, SolverStrategy::Sequential);
        let solution = solver.uninstall(&target_pkg)?;

        info!("Removing {} package(s)", solution.len());

        // Dependents first, the order the solution already carries
        for assert in solution.asserts() {
            let fp = assert.package.fingerprint();
            for file in system.db.get_package_files(&fp)? {
                let path = system.target.join(&file);
                match fs::remove_file(&path) {
                    Ok(()) => debug!("Removed {}", path.display()),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                        warn!("File already absent: {}", path.display())
                    }
                    Err(e) => {
                        return Err(Error::IoError(format!(
                            "Failed removing {}: {}",
                            path.display(),
                            e
                        )));
                    }
                }
            }
            system.db.remove_package_files(&fp)?;
            system.db.remove_package(&fp)?;
            info!("Removed {}", fp);
        }

        Ok(())
    }
}

/// Find the single artifact providing `pkg`, scanning repositories in
/// priority order. The first repository carrying the package wins; more
/// than one artifact within that repository is an integrity error.
fn match_artifact(synced: &[SyncedRepository], pkg: &Package) -> Result<ArtifactMatch> {
    let fp = pkg.fingerprint();
    for repo in synced {
        let found: Vec<&Artifact> = repo
            .index
            .iter()
            .filter(|a| a.package.as_ref().is_some_and(|p| p.fingerprint() == fp))
            .collect();
        if found.is_empty() {
            continue;
        }
        if found.len() > 1 {
            return Err(Error::IntegrityError(format!(
                "Multiple artifacts provide {} in repository {}",
                fp, repo.name
            )));
        }
        return Ok(ArtifactMatch {
            package: pkg.clone(),
            artifact: found[0].clone(),
            repo_base: repo.base_url.clone(),
            tree_root: repo.tree_root.clone(),
        });
    }
    Err(Error::IntegrityError(format!("No artifact provides {}", fp)))
}

/// Unpack a gzip-compressed tarball into `target`, returning the
/// relative paths of the regular files it contained, sorted
fn extract_archive(archive: &Path, target: &Path) -> Result<Vec<String>> {
    fs::create_dir_all(target)?;
    let file = File::open(archive)?;
    let mut ar = tar::Archive::new(GzDecoder::new(file));

    let mut files = Vec::new();
    for entry in ar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let is_dir = entry.header().entry_type().is_dir();
        entry.unpack_in(target)?;
        if !is_dir {
            files.push(path.to_string_lossy().into_owned());
        }
    }
    files.sort();
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn synced(name: &str, priority: i32, artifacts: Vec<Artifact>) -> SyncedRepository {
        SyncedRepository {
            name: name.to_string(),
            priority,
            packages: vec![],
            index: artifacts,
            tree_root: PathBuf::from("/nonexistent"),
            base_url: String::new(),
        }
    }

    fn artifact(path: &str, pkg: Option<PackageId>) -> Artifact {
        Artifact {
            path: path.to_string(),
            checksum: "0".repeat(64),
            size: 1,
            package: pkg,
        }
    }

    #[test]
    fn test_match_artifact_single() {
        let id = PackageId::new("curl", "net", "8.4");
        let repo = synced("main", 1, vec![artifact("curl.tar.gz", Some(id.clone()))]);
        let pkg = Package::new(id, vec![], vec![]);

        let m = match_artifact(&[repo], &pkg).unwrap();
        assert_eq!(m.artifact.path, "curl.tar.gz");
    }

    #[test]
    fn test_match_artifact_missing() {
        let repo = synced("main", 1, vec![]);
        let pkg = Package::new(PackageId::new("curl", "net", "8.4"), vec![], vec![]);

        let err = match_artifact(&[repo], &pkg).unwrap_err();
        assert!(matches!(err, Error::IntegrityError(_)));
    }

    #[test]
    fn test_match_artifact_ambiguous() {
        let id = PackageId::new("curl", "net", "8.4");
        let repo = synced(
            "main",
            1,
            vec![
                artifact("a.tar.gz", Some(id.clone())),
                artifact("b.tar.gz", Some(id.clone())),
            ],
        );
        let pkg = Package::new(id, vec![], vec![]);

        let err = match_artifact(&[repo], &pkg).unwrap_err();
        assert!(matches!(err, Error::IntegrityError(_)));
    }

    #[test]
    fn test_match_artifact_prefers_first_repository() {
        let id = PackageId::new("curl", "net", "8.4");
        let high = synced("high", 10, vec![artifact("high.tar.gz", Some(id.clone()))]);
        let low = synced("low", 1, vec![artifact("low.tar.gz", Some(id.clone()))]);
        let pkg = Package::new(id, vec![], vec![]);

        // Caller passes repositories already sorted by priority
        let m = match_artifact(&[high, low], &pkg).unwrap();
        assert_eq!(m.artifact.path, "high.tar.gz");
    }

    #[test]
    fn test_match_artifact_ignores_unbound_artifacts() {
        let id = PackageId::new("curl", "net", "8.4");
        let repo = synced(
            "main",
            1,
            vec![artifact("stray.tar.gz", None), artifact("curl.tar.gz", Some(id.clone()))],
        );
        let pkg = Package::new(id, vec![], vec![]);

        let m = match_artifact(&[repo], &pkg).unwrap();
        assert_eq!(m.artifact.path, "curl.tar.gz");
    }

    #[test]
    fn test_extract_archive() {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use std::io::Write;

        let dir = tempfile::tempdir().unwrap();
        let target = tempfile::tempdir().unwrap();
        let archive_path = dir.path().join("pkg.tar.gz");

        let file = File::create(&archive_path).unwrap();
        let enc = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(enc);

        let mut header = tar::Header::new_gnu();
        header.set_size(5);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, "usr/bin/tool", &b"hello"[..])
            .unwrap();
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();

        let files = extract_archive(&archive_path, target.path()).unwrap();
        assert_eq!(files, vec!["usr/bin/tool"]);
        assert_eq!(
            fs::read(target.path().join("usr/bin/tool")).unwrap(),
            b"hello"
        );
    }
}
