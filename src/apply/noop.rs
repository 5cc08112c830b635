//! No-op installer for hosts without DISM

use super::traits::PackageInstaller;
use async_trait::async_trait;
use std::path::Path;

/// Installer used when no DISM binary is available or configured
///
/// Every apply attempt fails with `Error::NotSupported`, which the engine
/// records as a per-artifact Failure. Fetching and validation still work,
/// so a cache can be staged on a host that cannot apply it.
pub struct NoOpInstaller;

#[async_trait]
impl PackageInstaller for NoOpInstaller {
    async fn add_package(&self, _mount: &Path, _package: &Path) -> crate::Result<()> {
        Err(crate::Error::NotSupported(
            "Applying packages requires the dism binary. \
             Configure dism_path in config or ensure dism is in PATH."
                .into(),
        ))
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}
