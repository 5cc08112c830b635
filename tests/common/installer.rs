//! Recording package installer

use async_trait::async_trait;
use offline_servicing::apply::PackageInstaller;
use offline_servicing::{ApplyError, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Installer that records every attempted package path
///
/// Rejects packages whose file name is listed in `reject` (exact, with
/// extension), so a test can fail `c3.msu` while accepting `c3.cab`.
#[derive(Default)]
pub struct RecordingInstaller {
    attempts: Mutex<Vec<PathBuf>>,
    reject: Vec<String>,
}

impl RecordingInstaller {
    /// Installer rejecting the given file names
    pub fn rejecting(names: &[&str]) -> Self {
        Self {
            attempts: Mutex::new(Vec::new()),
            reject: names.iter().map(|n| n.to_string()).collect(),
        }
    }

    /// Every package path handed to the installer, in order
    pub fn attempts(&self) -> Vec<PathBuf> {
        self.attempts.lock().unwrap().clone()
    }

    /// File names of every attempt, in order
    pub fn attempted_names(&self) -> Vec<String> {
        self.attempts()
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }
}

#[async_trait]
impl PackageInstaller for RecordingInstaller {
    async fn add_package(&self, _mount: &Path, package: &Path) -> Result<()> {
        self.attempts.lock().unwrap().push(package.to_path_buf());
        let name = package
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if self.reject.contains(&name) {
            return Err(ApplyError::PackageFailed {
                package: package.to_path_buf(),
                reason: "0x800f081e: The specified package is not applicable to this image."
                    .to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}
