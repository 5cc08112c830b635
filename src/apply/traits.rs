//! Trait for package installation into a mounted image

use async_trait::async_trait;
use std::path::Path;

/// Trait for adding one package to a mounted offline image
///
/// Implementations are synchronous OS-level operations from the engine's
/// point of view: there is no engine-level timeout, and a hang is an
/// external-tool failure.
///
/// # Examples
///
/// ```no_run
/// use offline_servicing::apply::{DismInstaller, PackageInstaller};
/// use std::path::Path;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let installer = DismInstaller::from_path().expect("dism not found");
/// installer
///     .add_package(Path::new(r"C:\mount"), Path::new(r"C:\cache\kb5037768.msu"))
///     .await?;
/// # Ok(())
/// # }
/// ```
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Add `package` to the image mounted at `mount`
    ///
    /// # Errors
    ///
    /// Returns [`ApplyError::PackageFailed`](crate::error::ApplyError::PackageFailed)
    /// when the installer rejects the package, and
    /// [`Error::ExternalTool`](crate::Error::ExternalTool) when it cannot be run.
    async fn add_package(&self, mount: &Path, package: &Path) -> crate::Result<()>;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}
