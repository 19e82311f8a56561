// src/installer/finalizer.rs

//! Post-install finalizers
//!
//! A finalizer is a small YAML document shipped next to a package's
//! definition, listing shell commands to run after its artifact has
//! been placed on the target system.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Finalizer {
    /// Commands run after the package's files are in place
    #[serde(default)]
    pub install: Vec<String>,
    /// Commands for removal; declared in the format but not wired into
    /// the uninstall flow
    #[serde(default)]
    pub uninstall: Vec<String>,
}

impl Finalizer {
    pub fn from_yaml(data: &str) -> Result<Self> {
        serde_yaml::from_str(data)
            .map_err(|e| Error::ParseError(format!("Invalid finalizer: {}", e)))
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path).map_err(|e| {
            Error::IoError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&data)
    }

    /// Run the install commands in order, stopping at the first failure
    pub fn run_install(&self, fingerprint: &str) -> Result<()> {
        for cmd in &self.install {
            info!("Running finalizer for {}: {}", fingerprint, cmd);
            run_command(fingerprint, cmd)?;
        }
        Ok(())
    }
}

fn run_command(fingerprint: &str, cmd: &str) -> Result<()> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(cmd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| {
            Error::FinalizerError(format!("Failed to spawn finalizer for {}: {}", fingerprint, e))
        })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !stdout.is_empty() {
        debug!("Finalizer stdout: {}", stdout.trim_end());
    }
    if !stderr.is_empty() {
        warn!("Finalizer stderr: {}", stderr.trim_end());
    }

    if !output.status.success() {
        return Err(Error::FinalizerError(format!(
            "Finalizer for {} failed ({}): {}{}",
            fingerprint, output.status, stdout, stderr
        )));
    }
    Ok(())
}
