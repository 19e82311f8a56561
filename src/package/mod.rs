// src/package/mod.rs

//! Package model
//!
//! Packages are immutable value objects exchanged by clone. Identity is the
//! (category, name, version) triple; the fingerprint is the deterministic
//! string rendering of that triple and is the map key used throughout the
//! solver, the installer, and the database.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Package identity: category (namespace), name, and version
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageId {
    pub name: String,
    #[serde(default)]
    pub category: String,
    pub version: String,
}

impl PackageId {
    pub fn new(name: &str, category: &str, version: &str) -> Self {
        Self {
            name: name.to_string(),
            category: category.to_string(),
            version: version.to_string(),
        }
    }

    /// Deterministic identity key: `category/name@version`
    pub fn fingerprint(&self) -> String {
        format!("{}/{}@{}", self.category, self.name, self.version)
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.fingerprint())
    }
}

fn flagged_default() -> bool {
    true
}

/// A package definition: identity plus dependency and conflict edges
///
/// `flagged` marks packages that carry a resolved definition (loaded from a
/// world index, a definition tree, or the database) as opposed to bare
/// references created with [`Package::reference`]. The installer only
/// dispatches artifacts and finalizers for flagged packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    #[serde(flatten)]
    pub id: PackageId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub requires: Vec<PackageId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conflicts: Vec<PackageId>,
    #[serde(skip_serializing, default = "flagged_default")]
    pub flagged: bool,
}

impl Package {
    /// Create a package with a resolved definition
    pub fn new(id: PackageId, requires: Vec<PackageId>, conflicts: Vec<PackageId>) -> Self {
        Self {
            id,
            requires,
            conflicts,
            flagged: true,
        }
    }

    /// Create a bare reference to an identity with no definition attached
    pub fn reference(id: PackageId) -> Self {
        Self {
            id,
            requires: Vec::new(),
            conflicts: Vec::new(),
            flagged: false,
        }
    }

    pub fn fingerprint(&self) -> String {
        self.id.fingerprint()
    }

    /// Two packages are the same entity when their identity fields match
    pub fn matches(&self, other: &Package) -> bool {
        self.id == other.id
    }

    /// Serialize this definition as a YAML document
    pub fn to_yaml(&self) -> crate::error::Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| crate::error::Error::ParseError(format!("Failed serializing {}: {}", self.id, e)))
    }

    /// Parse a definition from a YAML document
    pub fn from_yaml(data: &str) -> crate::error::Result<Self> {
        serde_yaml::from_str(data)
            .map_err(|e| crate::error::Error::ParseError(format!("Invalid package definition: {}", e)))
    }
}
