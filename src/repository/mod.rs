// src/repository/mod.rs

//! Repository management and artifact downloading
//!
//! This module provides functionality for:
//! - Managing configured package repositories (stored in the database)
//! - Synchronizing repository metadata into an in-memory world
//! - Downloading artifacts with retry support
//! - Verifying artifact checksums

use crate::db::PackageDb;
use crate::db::models::RepositoryRecord;
use crate::error::{Error, Result};
use crate::package::{Package, PackageId};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Well-known name of the repository index document
pub const METADATA_FILE: &str = "metadata.json";

/// Default timeout for HTTP requests (30 seconds)
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Maximum retry attempts for failed downloads
const MAX_RETRIES: u32 = 3;

/// Retry delay in milliseconds
const RETRY_DELAY_MS: u64 = 1000;

/// Repository metadata format (simple JSON index)
#[derive(Debug, Serialize, Deserialize)]
pub struct RepositoryMetadata {
    pub name: String,
    /// Package definitions visible from this repository
    pub packages: Vec<Package>,
    /// Built artifacts, each bound to a package by its compile spec
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// A downloadable build output in a repository index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Path relative to the repository base
    pub path: String,
    pub checksum: String,
    pub size: i64,
    /// The compile-spec package this artifact was built for; an absent
    /// value is an integrity error when the artifact is matched
    pub package: Option<PackageId>,
}

/// A repository after synchronization: its package index, artifact index,
/// and the local tree directory holding per-package definition files
#[derive(Debug, Clone)]
pub struct SyncedRepository {
    pub name: String,
    pub priority: i32,
    pub packages: Vec<Package>,
    pub index: Vec<Artifact>,
    /// Local directory with per-package definition trees (finalizers)
    pub tree_root: PathBuf,
    /// Base the artifact paths resolve against (http(s) URL or local dir)
    pub base_url: String,
}

/// A configured package source that can be synchronized
pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    /// Fetch the repository index and return its synced form
    fn sync(&self) -> Result<SyncedRepository>;
}

/// The merged world: every package definition visible across `repos`,
/// which are expected to be sorted by priority already. The first
/// occurrence of a fingerprint wins during resolution.
pub fn world(repos: &[SyncedRepository]) -> Vec<Package> {
    repos.iter().flat_map(|r| r.packages.iter().cloned()).collect()
}

/// HTTP client wrapper with retry support
pub struct RepositoryClient {
    client: Client,
    max_retries: u32,
}

impl RepositoryClient {
    /// Create a new repository client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .map_err(|e| Error::InitError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_retries: MAX_RETRIES,
        })
    }

    /// Fetch repository metadata from URL with retry support
    pub fn fetch_metadata(&self, url: &str) -> Result<RepositoryMetadata> {
        let metadata_url = if url.ends_with('/') {
            format!("{}{}", url, METADATA_FILE)
        } else {
            format!("{}/{}", url, METADATA_FILE)
        };

        info!("Fetching repository metadata from {}", metadata_url);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(&metadata_url).send() {
                Ok(response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            metadata_url
                        )));
                    }

                    let metadata: RepositoryMetadata = response.json().map_err(|e| {
                        Error::ParseError(format!("Failed to parse metadata JSON: {}", e))
                    })?;

                    info!(
                        "Fetched metadata: {} packages, {} artifacts",
                        metadata.packages.len(),
                        metadata.artifacts.len()
                    );
                    return Ok(metadata);
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to fetch metadata after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Metadata fetch attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }

    /// Download a file to the specified path with retry support
    pub fn download_file(&self, url: &str, dest_path: &Path) -> Result<()> {
        debug!("Downloading {} to {}", url, dest_path.display());

        // Create parent directory if it doesn't exist
        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::IoError(format!("Failed to create directory {}: {}", parent.display(), e))
            })?;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.client.get(url).send() {
                Ok(mut response) => {
                    if !response.status().is_success() {
                        return Err(Error::DownloadError(format!(
                            "HTTP {} from {}",
                            response.status(),
                            url
                        )));
                    }

                    // Write to temporary file first
                    let temp_path = dest_path.with_extension("tmp");
                    let mut file = File::create(&temp_path).map_err(|e| {
                        Error::IoError(format!("Failed to create file {}: {}", temp_path.display(), e))
                    })?;

                    // Copy response body to file
                    io::copy(&mut response, &mut file).map_err(|e| {
                        Error::IoError(format!("Failed to write downloaded data: {}", e))
                    })?;

                    // Atomic rename from temp to final destination
                    fs::rename(&temp_path, dest_path).map_err(|e| {
                        Error::IoError(format!(
                            "Failed to move {} to {}: {}",
                            temp_path.display(),
                            dest_path.display(),
                            e
                        ))
                    })?;

                    debug!("Downloaded to {}", dest_path.display());
                    return Ok(());
                }
                Err(e) => {
                    if attempt >= self.max_retries {
                        return Err(Error::DownloadError(format!(
                            "Failed to download after {} attempts: {}",
                            attempt, e
                        )));
                    }
                    warn!("Download attempt {} failed: {}, retrying...", attempt, e);
                    std::thread::sleep(Duration::from_millis(RETRY_DELAY_MS * attempt as u64));
                }
            }
        }
    }
}

/// Fetch one artifact from its owning repository into `dest_dir`,
/// verifying the recorded checksum.
///
/// The repository base may be an http(s) URL or a local directory path;
/// local bases cover file-based repositories and tests.
pub fn fetch_artifact(
    client: &RepositoryClient,
    repo_base: &str,
    artifact: &Artifact,
    dest_dir: &Path,
) -> Result<PathBuf> {
    let filename = artifact
        .path
        .rsplit('/')
        .next()
        .filter(|f| !f.is_empty())
        .ok_or_else(|| Error::IntegrityError(format!("Artifact has no file name: {}", artifact.path)))?;
    let dest_path = dest_dir.join(filename);

    if repo_base.starts_with("http://") || repo_base.starts_with("https://") {
        let url = format!("{}/{}", repo_base.trim_end_matches('/'), artifact.path);
        client.download_file(&url, &dest_path)?;
    } else {
        let src = Path::new(repo_base).join(&artifact.path);
        fs::copy(&src, &dest_path).map_err(|e| {
            Error::DownloadError(format!("Failed copying artifact {}: {}", src.display(), e))
        })?;
    }

    verify_checksum(&dest_path, &artifact.checksum)?;
    Ok(dest_path)
}

/// Verify file checksum matches expected value
pub fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    use sha2::{Digest, Sha256};

    debug!("Verifying checksum for {}", path.display());

    let mut file = File::open(path).map_err(|e| {
        Error::IoError(format!("Failed to open file for checksum: {}", e))
    })?;

    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(|e| {
        Error::IoError(format!("Failed to read file for checksum: {}", e))
    })?;

    let actual = format!("{:x}", hasher.finalize());

    if actual != expected {
        return Err(Error::ChecksumMismatch {
            expected: expected.to_string(),
            actual,
        });
    }

    debug!("Checksum verified: {}", expected);
    Ok(())
}

/// A repository served over HTTP(S)
///
/// Synchronization fetches the metadata index and, when the server
/// provides one, the definition tree archive (`tree.tar.gz`) so install
/// finalizers can be located locally.
pub struct HttpRepository {
    pub name: String,
    pub url: String,
    pub priority: i32,
    /// Local directory holding the synced tree for this repository
    pub cache_dir: PathBuf,
}

impl HttpRepository {
    pub fn new(name: &str, url: &str, priority: i32, cache_dir: &Path) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            priority,
            cache_dir: cache_dir.join(name),
        }
    }

    fn sync_tree(&self, client: &RepositoryClient) -> PathBuf {
        let tree_root = self.cache_dir.join("tree");
        let archive_url = format!("{}/tree.tar.gz", self.url.trim_end_matches('/'));
        let archive_path = self.cache_dir.join("tree.tar.gz");

        match client.download_file(&archive_url, &archive_path) {
            Ok(()) => {
                if let Err(e) = unpack_tree(&archive_path, &tree_root) {
                    warn!("Failed unpacking tree for {}: {}", self.name, e);
                }
                let _ = fs::remove_file(&archive_path);
            }
            Err(e) => debug!("Repository {} provides no tree archive: {}", self.name, e),
        }

        tree_root
    }
}

fn unpack_tree(archive_path: &Path, tree_root: &Path) -> Result<()> {
    fs::create_dir_all(tree_root)?;
    let file = File::open(archive_path)?;
    let mut archive = tar::Archive::new(flate2::read::GzDecoder::new(file));
    archive.unpack(tree_root)?;
    Ok(())
}

impl Repository for HttpRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync(&self) -> Result<SyncedRepository> {
        info!("Synchronizing repository: {}", self.name);
        let client = RepositoryClient::new()?;
        let metadata = client.fetch_metadata(&self.url)?;
        let tree_root = self.sync_tree(&client);

        Ok(SyncedRepository {
            name: self.name.clone(),
            priority: self.priority,
            packages: metadata.packages,
            index: metadata.artifacts,
            tree_root,
            base_url: self.url.clone(),
        })
    }
}

/// A repository on the local filesystem: a directory holding
/// `metadata.json`, the artifacts it references, and a `tree/` directory
/// with per-package definitions.
pub struct LocalRepository {
    pub name: String,
    pub path: PathBuf,
    pub priority: i32,
}

impl LocalRepository {
    pub fn new(name: &str, path: &Path, priority: i32) -> Self {
        Self {
            name: name.to_string(),
            path: path.to_path_buf(),
            priority,
        }
    }
}

impl Repository for LocalRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn sync(&self) -> Result<SyncedRepository> {
        info!("Synchronizing local repository: {}", self.name);
        let metadata_path = self.path.join(METADATA_FILE);
        let data = fs::read_to_string(&metadata_path).map_err(|e| {
            Error::SyncError(format!("Failed reading {}: {}", metadata_path.display(), e))
        })?;
        let metadata: RepositoryMetadata = serde_json::from_str(&data)
            .map_err(|e| Error::ParseError(format!("Failed to parse metadata JSON: {}", e)))?;

        Ok(SyncedRepository {
            name: self.name.clone(),
            priority: self.priority,
            packages: metadata.packages,
            index: metadata.artifacts,
            tree_root: self.path.join("tree"),
            base_url: self.path.to_string_lossy().into_owned(),
        })
    }
}

/// Check if repository metadata needs refresh
pub fn needs_sync(repo: &RepositoryRecord) -> bool {
    match &repo.last_sync {
        None => true, // Never synced
        Some(last_sync) => {
            // Parse timestamp and check if expired
            match parse_timestamp(last_sync) {
                Ok(last_sync_time) => {
                    let now = SystemTime::now()
                        .duration_since(UNIX_EPOCH)
                        .unwrap_or_default()
                        .as_secs();

                    let age_seconds = now.saturating_sub(last_sync_time);
                    age_seconds > repo.metadata_expire as u64
                }
                Err(_) => true, // If we can't parse timestamp, force sync
            }
        }
    }
}

/// Get current timestamp as ISO 8601 string
pub fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Parse ISO 8601 timestamp to Unix seconds
fn parse_timestamp(timestamp: &str) -> Result<u64> {
    use chrono::DateTime;

    let dt = DateTime::parse_from_rfc3339(timestamp)
        .map_err(|e| Error::ParseError(format!("Invalid timestamp: {}", e)))?;

    Ok(dt.timestamp() as u64)
}

/// Add a new repository to the database
pub fn add_repository(
    db: &PackageDb,
    name: String,
    url: String,
    enabled: bool,
    priority: i32,
) -> Result<RepositoryRecord> {
    // Check if repository with this name already exists
    if db.find_repository(&name)?.is_some() {
        return Err(Error::ConflictError(format!(
            "Repository '{}' already exists",
            name
        )));
    }

    let mut repo = RepositoryRecord::new(name, url);
    repo.enabled = enabled;
    repo.priority = priority;

    db.insert_repository(&mut repo)?;

    info!("Added repository: {} ({})", repo.name, repo.url);
    Ok(repo)
}

/// Remove a repository from the database
pub fn remove_repository(db: &PackageDb, name: &str) -> Result<()> {
    let repo = db
        .find_repository(name)?
        .ok_or_else(|| Error::NotFoundError(format!("Repository '{}' not found", name)))?;

    let id = repo
        .id
        .ok_or_else(|| Error::InitError("Repository record has no ID".to_string()))?;
    db.delete_repository(id)?;
    info!("Removed repository: {}", name);
    Ok(())
}

/// Enable or disable a repository
pub fn set_repository_enabled(db: &PackageDb, name: &str, enabled: bool) -> Result<()> {
    let mut repo = db
        .find_repository(name)?
        .ok_or_else(|| Error::NotFoundError(format!("Repository '{}' not found", name)))?;

    repo.enabled = enabled;
    db.update_repository(&repo)?;

    info!(
        "Repository '{}' {}",
        name,
        if enabled { "enabled" } else { "disabled" }
    );
    Ok(())
}

/// Record a completed sync on the repository's database row
pub fn mark_synced(db: &PackageDb, name: &str) -> Result<()> {
    if let Some(mut repo) = db.find_repository(name)? {
        repo.last_sync = Some(current_timestamp());
        db.update_repository(&repo)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn test_db() -> PackageDb {
        PackageDb::open_in_memory().unwrap()
    }

    #[test]
    fn test_add_repository() {
        let db = test_db();

        let repo = add_repository(
            &db,
            "test-repo".to_string(),
            "https://example.com/repo".to_string(),
            true,
            10,
        )
        .unwrap();

        assert_eq!(repo.name, "test-repo");
        assert_eq!(repo.url, "https://example.com/repo");
        assert!(repo.enabled);
        assert_eq!(repo.priority, 10);
    }

    #[test]
    fn test_add_duplicate_repository() {
        let db = test_db();

        add_repository(
            &db,
            "test-repo".to_string(),
            "https://example.com/repo".to_string(),
            true,
            10,
        )
        .unwrap();

        // Try to add duplicate
        let result = add_repository(
            &db,
            "test-repo".to_string(),
            "https://example.com/other".to_string(),
            true,
            10,
        );

        assert!(matches!(result.unwrap_err(), Error::ConflictError(_)));
    }

    #[test]
    fn test_remove_repository() {
        let db = test_db();

        add_repository(
            &db,
            "test-repo".to_string(),
            "https://example.com/repo".to_string(),
            true,
            10,
        )
        .unwrap();

        remove_repository(&db, "test-repo").unwrap();
        assert!(db.find_repository("test-repo").unwrap().is_none());
    }

    #[test]
    fn test_enable_disable_repository() {
        let db = test_db();

        add_repository(
            &db,
            "test-repo".to_string(),
            "https://example.com/repo".to_string(),
            true,
            10,
        )
        .unwrap();

        // Disable
        set_repository_enabled(&db, "test-repo", false).unwrap();
        let repo = db.find_repository("test-repo").unwrap().unwrap();
        assert!(!repo.enabled);

        // Enable
        set_repository_enabled(&db, "test-repo", true).unwrap();
        let repo = db.find_repository("test-repo").unwrap().unwrap();
        assert!(repo.enabled);
    }

    #[test]
    fn test_needs_sync() {
        let repo_never_synced = RepositoryRecord::new("test".to_string(), "url".to_string());
        assert!(needs_sync(&repo_never_synced));

        let mut repo_recently_synced = RepositoryRecord::new("test".to_string(), "url".to_string());
        repo_recently_synced.last_sync = Some(current_timestamp());
        repo_recently_synced.metadata_expire = 3600; // 1 hour
        assert!(!needs_sync(&repo_recently_synced));
    }

    #[test]
    fn test_timestamp_functions() {
        let ts = current_timestamp();
        let parsed = parse_timestamp(&ts).unwrap();
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs();

        // Should be within a few seconds
        assert!((now as i64 - parsed as i64).abs() < 5);
    }

    #[test]
    fn test_local_repository_sync() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = r#"{
            "name": "local",
            "packages": [
                {"name": "curl", "category": "net", "version": "8.4"}
            ],
            "artifacts": [
                {"path": "artifacts/curl.tar.gz", "checksum": "abc", "size": 10,
                 "package": {"name": "curl", "category": "net", "version": "8.4"}}
            ]
        }"#;
        fs::write(dir.path().join(METADATA_FILE), metadata).unwrap();

        let repo = LocalRepository::new("local", dir.path(), 5);
        let synced = repo.sync().unwrap();

        assert_eq!(synced.name, "local");
        assert_eq!(synced.priority, 5);
        assert_eq!(synced.packages.len(), 1);
        assert_eq!(synced.packages[0].fingerprint(), "net/curl@8.4");
        assert_eq!(synced.index.len(), 1);
        assert_eq!(
            synced.index[0].package.as_ref().unwrap().fingerprint(),
            "net/curl@8.4"
        );
    }

    #[test]
    fn test_local_repository_sync_without_metadata_fails() {
        let dir = tempfile::tempdir().unwrap();
        let repo = LocalRepository::new("empty", dir.path(), 0);
        assert!(matches!(repo.sync().unwrap_err(), Error::SyncError(_)));
    }

    #[test]
    fn test_world_preserves_repository_order() {
        let mk = |name: &str, pkg: &str, priority: i32| SyncedRepository {
            name: name.to_string(),
            priority,
            packages: vec![Package::new(PackageId::new(pkg, "app", "1.0"), vec![], vec![])],
            index: vec![],
            tree_root: PathBuf::from("/tmp"),
            base_url: String::new(),
        };

        let repos = vec![mk("high", "a", 10), mk("low", "b", 1)];
        let merged = world(&repos);
        assert_eq!(merged[0].id.name, "a");
        assert_eq!(merged[1].id.name, "b");
    }

    #[test]
    fn test_verify_checksum_detects_corruption() {
        use sha2::{Digest, Sha256};

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"artifact body").unwrap();

        let expected = format!("{:x}", Sha256::digest(b"artifact body"));
        verify_checksum(file.path(), &expected).unwrap();

        let err = verify_checksum(file.path(), "deadbeef").unwrap_err();
        assert!(matches!(err, Error::ChecksumMismatch { .. }));
    }

    #[test]
    fn test_fetch_artifact_from_local_base() {
        use sha2::{Digest, Sha256};

        let repo_dir = tempfile::tempdir().unwrap();
        let dest_dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(repo_dir.path().join("artifacts")).unwrap();
        fs::write(repo_dir.path().join("artifacts/pkg.tar.gz"), b"bytes").unwrap();

        let artifact = Artifact {
            path: "artifacts/pkg.tar.gz".to_string(),
            checksum: format!("{:x}", Sha256::digest(b"bytes")),
            size: 5,
            package: None,
        };

        let client = RepositoryClient::new().unwrap();
        let fetched = fetch_artifact(
            &client,
            &repo_dir.path().to_string_lossy(),
            &artifact,
            dest_dir.path(),
        )
        .unwrap();

        assert_eq!(fs::read(fetched).unwrap(), b"bytes");
    }
}
