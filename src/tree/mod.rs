// src/tree/mod.rs

//! Package definition trees
//!
//! A tree is a directory hierarchy with one directory per package,
//! holding its `definition.yaml` and optionally a `finalizer.yaml`.
//! Trees are how repositories ship package metadata alongside built
//! artifacts.

use crate::error::{Error, Result};
use crate::package::Package;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Per-package definition file name
pub const DEFINITION_FILE: &str = "definition.yaml";

/// Per-package finalizer file name
pub const FINALIZER_FILE: &str = "finalizer.yaml";

/// Directory a package's definition lives in, relative to the tree root.
/// An empty category contributes no path segment.
pub fn package_dir(root: &Path, pkg: &Package) -> PathBuf {
    let mut dir = root.to_path_buf();
    if !pkg.id.category.is_empty() {
        dir.push(&pkg.id.category);
    }
    dir.push(&pkg.id.name);
    dir.push(&pkg.id.version);
    dir
}

/// Path to a package's finalizer within a tree, if present
pub fn finalizer_path(root: &Path, pkg: &Package) -> Option<PathBuf> {
    let path = package_dir(root, pkg).join(FINALIZER_FILE);
    path.exists().then_some(path)
}

/// Write every package definition under `root`
pub fn save_tree(root: &Path, packages: &[Package]) -> Result<()> {
    for pkg in packages {
        let dir = package_dir(root, pkg);
        fs::create_dir_all(&dir).map_err(|e| {
            Error::IoError(format!("Failed to create {}: {}", dir.display(), e))
        })?;
        let path = dir.join(DEFINITION_FILE);
        fs::write(&path, pkg.to_yaml()?).map_err(|e| {
            Error::IoError(format!("Failed to write {}: {}", path.display(), e))
        })?;
        debug!("Saved definition for {}", pkg.fingerprint());
    }
    Ok(())
}

/// Load every package definition found under `root`, in deterministic
/// fingerprint order. A later definition with the same fingerprint
/// replaces an earlier one.
pub fn load_tree(root: &Path) -> Result<Vec<Package>> {
    let mut found: BTreeMap<String, Package> = BTreeMap::new();
    if root.exists() {
        walk(root, &mut found)?;
    }
    debug!("Loaded {} definitions from {}", found.len(), root.display());
    Ok(found.into_values().collect())
}

fn walk(dir: &Path, found: &mut BTreeMap<String, Package>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|e| {
        Error::IoError(format!("Failed to read {}: {}", dir.display(), e))
    })?;

    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            walk(&path, found)?;
        } else if path.file_name().is_some_and(|n| n == DEFINITION_FILE) {
            let data = fs::read_to_string(&path).map_err(|e| {
                Error::IoError(format!("Failed to read {}: {}", path.display(), e))
            })?;
            let pkg = Package::from_yaml(&data)?;
            found.insert(pkg.fingerprint(), pkg);
        }
    }
    Ok(())
}
