//! DISM-based package installer

use super::traits::PackageInstaller;
use crate::error::ApplyError;
use crate::utils::ExitStatus;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// DISM exit code for an installed package that needs a restart to finish
pub const EXIT_SUCCESS_REBOOT_REQUIRED: i32 = 3010;

/// Installer driving `dism /Image:<mount> /Add-Package`
pub struct DismInstaller {
    binary_path: PathBuf,
    scratch_dir: Option<PathBuf>,
}

impl DismInstaller {
    /// Create an installer with an explicit binary path
    pub fn new(binary_path: PathBuf) -> Self {
        Self {
            binary_path,
            scratch_dir: None,
        }
    }

    /// Attempt to find dism in PATH
    pub fn from_path() -> Option<Self> {
        which::which("dism").ok().map(Self::new)
    }

    /// Hand DISM a scratch directory for package extraction
    pub fn with_scratch_dir(mut self, scratch_dir: Option<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir;
        self
    }

    fn args(&self, mount: &Path, package: &Path) -> Vec<String> {
        let mut args = vec![
            format!("/Image:{}", mount.display()),
            "/Add-Package".to_string(),
            format!("/PackagePath:{}", package.display()),
        ];
        if let Some(scratch) = &self.scratch_dir {
            args.push(format!("/ScratchDir:{}", scratch.display()));
        }
        args.push("/NoRestart".to_string());
        args
    }
}

#[async_trait]
impl PackageInstaller for DismInstaller {
    async fn add_package(&self, mount: &Path, package: &Path) -> crate::Result<()> {
        let output = Command::new(&self.binary_path)
            .args(self.args(mount, package))
            .output()
            .await
            .map_err(|e| crate::Error::ExternalTool(format!("Failed to execute dism: {}", e)))?;

        parse_dism_output(
            &output.stdout,
            &output.stderr,
            ExitStatus::from(output.status.success()),
            output.status.code(),
        )
        .map_err(|reason| {
            crate::Error::from(ApplyError::PackageFailed {
                package: package.to_path_buf(),
                reason,
            })
        })?;

        if output.status.code() == Some(EXIT_SUCCESS_REBOOT_REQUIRED) {
            tracing::info!(
                package = %package.display(),
                "Package added, restart required to complete"
            );
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "dism"
    }
}

/// Parse DISM output into success or a failure reason
///
/// DISM reports failures as an `Error: <code>` line followed by a message.
/// When that line is missing the exit code is reported instead. Exit code
/// 3010 without an error line means the package was added and a restart is
/// pending, which counts as success.
pub fn parse_dism_output(
    stdout: &[u8],
    stderr: &[u8],
    exit_status: ExitStatus,
    exit_code: Option<i32>,
) -> Result<(), String> {
    let output = String::from_utf8_lossy(stdout);
    let error_output = String::from_utf8_lossy(stderr);
    let combined = format!("{}\n{}", output, error_output);

    let mut lines = combined.lines().map(str::trim);
    let error_line = lines.by_ref().find(|l| l.starts_with("Error:"));

    let succeeded =
        exit_status.is_success() || exit_code == Some(EXIT_SUCCESS_REBOOT_REQUIRED);
    if succeeded && error_line.is_none() {
        return Ok(());
    }

    match error_line {
        Some(line) => {
            let code = line.trim_start_matches("Error:").trim();
            let message = lines
                .find(|l| !l.is_empty())
                .unwrap_or("no message");
            Err(format!("{code}: {message}"))
        }
        None => Err(match exit_code {
            Some(code) => format!("dism exited with code {code:#x}"),
            None => "dism terminated by signal".to_string(),
        }),
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    const SUCCESS: &str = "\
Deployment Image Servicing and Management tool
Version: 10.0.19041.3636

Image Version: 10.0.19045.4291

Processing 1 of 1 - Adding package Package_for_RollupFix~31bf3856ad364e35~amd64~~19041.4412.1.14
[==========================100.0%==========================]
The operation completed successfully.
";

    const NOT_APPLICABLE: &str = "\
Deployment Image Servicing and Management tool
Version: 10.0.19041.3636

Image Version: 10.0.19045.4291

An error occurred trying to open - C:\\cache\\c3.msu Error: 0x800f082f

Error: 0x800f081e

The specified package is not applicable to this image.

The DISM log file can be found at C:\\Windows\\Logs\\DISM\\dism.log
";

    #[test]
    fn successful_run_parses_ok() {
        assert!(parse_dism_output(SUCCESS.as_bytes(), b"", ExitStatus::Success, Some(0)).is_ok());
    }

    #[test]
    fn restart_required_exit_counts_as_added() {
        let output = format!("{SUCCESS}Restart Windows to complete this operation.\n");
        let result = parse_dism_output(
            output.as_bytes(),
            b"",
            ExitStatus::Failure,
            Some(EXIT_SUCCESS_REBOOT_REQUIRED),
        );
        assert!(result.is_ok());
    }

    #[test]
    fn restart_required_exit_with_error_line_is_a_failure() {
        let reason = parse_dism_output(
            NOT_APPLICABLE.as_bytes(),
            b"",
            ExitStatus::Failure,
            Some(EXIT_SUCCESS_REBOOT_REQUIRED),
        )
        .unwrap_err();
        assert!(reason.starts_with("0x800f081e"));
    }

    #[test]
    fn error_code_and_message_are_extracted() {
        let reason = parse_dism_output(
            NOT_APPLICABLE.as_bytes(),
            b"",
            ExitStatus::Failure,
            Some(-2146498530),
        )
        .unwrap_err();
        assert_eq!(
            reason,
            "0x800f081e: The specified package is not applicable to this image."
        );
    }

    #[test]
    fn missing_error_line_reports_exit_code() {
        let reason = parse_dism_output(b"", b"", ExitStatus::Failure, Some(87)).unwrap_err();
        assert_eq!(reason, "dism exited with code 0x57");
        let reason = parse_dism_output(b"", b"", ExitStatus::Failure, None).unwrap_err();
        assert!(reason.contains("signal"));
    }

    #[test]
    fn args_carry_image_package_and_scratch() {
        let installer = DismInstaller::new(PathBuf::from("dism"))
            .with_scratch_dir(Some(PathBuf::from("/scratch")));
        let args = installer.args(Path::new("/mnt/image"), Path::new("/cache/c1.msu"));
        assert_eq!(
            args,
            vec![
                "/Image:/mnt/image",
                "/Add-Package",
                "/PackagePath:/cache/c1.msu",
                "/ScratchDir:/scratch",
                "/NoRestart",
            ]
        );
    }

    #[test]
    fn test_from_path_consistency_with_which_crate() {
        assert_eq!(
            which::which("dism").is_ok(),
            DismInstaller::from_path().is_some()
        );
    }

    #[tokio::test]
    async fn missing_binary_is_an_external_tool_error() {
        let installer = DismInstaller::new(PathBuf::from("/nonexistent/dism-xyz"));
        let err = installer
            .add_package(Path::new("/mnt/image"), Path::new("c1.msu"))
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::ExternalTool(_)));
    }
}
