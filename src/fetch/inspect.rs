//! Cabinet inspection handlers
//!
//! Validation is two-tier: the in-process [`StructuredCabInspector`] runs
//! first, and the [`ListingInspector`] (an external lister) is consulted
//! when the structured read cannot be used. [`NoOpInspector`] stands in for
//! a tier that is unavailable on this host.

use super::cab::{is_marker, read_cab_file_names};
use crate::types::InspectionMethod;
use crate::utils::ExitStatus;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Trait for checking a container for the metadata marker
///
/// # Errors
///
/// Implementations return an error when they cannot inspect the container
/// at all (unparseable file, missing tool, tool failure). `Ok(false)` means
/// the inspection ran and the marker is absent.
#[async_trait]
pub trait ContainerInspector: Send + Sync {
    /// Whether the container's file table lists `marker`
    async fn contains_marker(&self, container: &Path, marker: &str) -> crate::Result<bool>;

    /// Which inspection tier this handler implements
    fn method(&self) -> InspectionMethod;

    /// Human-readable name for logging
    fn name(&self) -> &'static str;
}

/// In-process reader of the cabinet file table
pub struct StructuredCabInspector;

#[async_trait]
impl ContainerInspector for StructuredCabInspector {
    async fn contains_marker(&self, container: &Path, marker: &str) -> crate::Result<bool> {
        let names = read_cab_file_names(container).await?;
        Ok(names.iter().any(|name| is_marker(name, marker)))
    }

    fn method(&self) -> InspectionMethod {
        InspectionMethod::Structured
    }

    fn name(&self) -> &'static str {
        "structured-cab"
    }
}

/// External cabinet lister flavours
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListerKind {
    /// Windows `expand -D`
    Expand,
    /// `cabextract -l`
    Cabextract,
    /// `7z l`
    SevenZip,
}

impl ListerKind {
    /// Detect the lister from its binary name
    pub fn from_binary(path: &Path) -> Option<Self> {
        let stem = path.file_stem()?.to_str()?.to_lowercase();
        match stem.as_str() {
            "expand" => Some(Self::Expand),
            "cabextract" => Some(Self::Cabextract),
            "7z" | "7za" | "7zz" => Some(Self::SevenZip),
            _ => None,
        }
    }

    fn list_args(self) -> &'static [&'static str] {
        match self {
            Self::Expand => &["-D"],
            Self::Cabextract => &["-l"],
            Self::SevenZip => &["l"],
        }
    }
}

/// Cabinet inspection through an external lister's table of contents
pub struct ListingInspector {
    binary_path: PathBuf,
    kind: ListerKind,
}

impl ListingInspector {
    /// Create an inspector for an explicit lister binary
    pub fn new(binary_path: PathBuf, kind: ListerKind) -> Self {
        Self { binary_path, kind }
    }

    /// Create an inspector for a configured binary, detecting its flavour
    ///
    /// Returns `None` if the binary name is not a known lister.
    pub fn from_binary(binary_path: PathBuf) -> Option<Self> {
        let kind = ListerKind::from_binary(&binary_path)?;
        Some(Self::new(binary_path, kind))
    }

    /// Attempt to find a cabinet lister in PATH
    ///
    /// `expand` is only considered on Windows, where it is the cabinet tool
    /// rather than the coreutils tab expander.
    pub fn from_path() -> Option<Self> {
        let mut candidates = vec![("cabextract", ListerKind::Cabextract)];
        if cfg!(windows) {
            candidates.insert(0, ("expand", ListerKind::Expand));
        }
        candidates.extend([
            ("7z", ListerKind::SevenZip),
            ("7zz", ListerKind::SevenZip),
        ]);

        candidates
            .into_iter()
            .find_map(|(name, kind)| which::which(name).ok().map(|p| Self::new(p, kind)))
    }

    /// Which lister flavour this inspector drives
    pub fn kind(&self) -> ListerKind {
        self.kind
    }
}

#[async_trait]
impl ContainerInspector for ListingInspector {
    async fn contains_marker(&self, container: &Path, marker: &str) -> crate::Result<bool> {
        let output = Command::new(&self.binary_path)
            .args(self.kind.list_args())
            .arg(container)
            .output()
            .await
            .map_err(|e| {
                crate::Error::ExternalTool(format!(
                    "Failed to execute {}: {}",
                    self.binary_path.display(),
                    e
                ))
            })?;

        parse_listing_output(
            &output.stdout,
            &output.stderr,
            ExitStatus::from(output.status.success()),
            marker,
        )
    }

    fn method(&self) -> InspectionMethod {
        InspectionMethod::Listing
    }

    fn name(&self) -> &'static str {
        match self.kind {
            ListerKind::Expand => "expand",
            ListerKind::Cabextract => "cabextract",
            ListerKind::SevenZip => "7z",
        }
    }
}

/// Inspector used when a tier is unavailable on this host
pub struct NoOpInspector;

#[async_trait]
impl ContainerInspector for NoOpInspector {
    async fn contains_marker(&self, _container: &Path, _marker: &str) -> crate::Result<bool> {
        Err(crate::Error::NotSupported(
            "Cabinet listing requires expand, cabextract or 7z. \
             Configure cab_lister_path in config or ensure one is in PATH."
                .into(),
        ))
    }

    fn method(&self) -> InspectionMethod {
        InspectionMethod::Listing
    }

    fn name(&self) -> &'static str {
        "noop"
    }
}

/// Parse a lister's output for the marker
///
/// A failed run is an inspection error, not a negative result, so the
/// caller can tell "could not look" from "looked and did not find".
pub fn parse_listing_output(
    stdout: &[u8],
    stderr: &[u8],
    exit_status: ExitStatus,
    marker: &str,
) -> crate::Result<bool> {
    let output = String::from_utf8_lossy(stdout);

    if !exit_status.is_success() {
        let error_output = String::from_utf8_lossy(stderr);
        let detail = error_output
            .lines()
            .chain(output.lines())
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("no output");
        return Err(crate::Error::ExternalTool(format!(
            "cabinet lister failed: {detail}"
        )));
    }

    Ok(listing_contains_marker(&output, marker))
}

/// Whether any line of a listing names the marker as a whole file name
///
/// Listers print the name last on each line, preceded by whitespace, a
/// column separator or a path separator depending on the tool.
pub fn listing_contains_marker(listing: &str, marker: &str) -> bool {
    let marker = marker.to_lowercase();
    listing.lines().any(|line| {
        let line = line.trim_end().to_lowercase();
        match line.strip_suffix(marker.as_str()) {
            Some("") => true,
            Some(prefix) => prefix.ends_with([' ', '\t', '|', ':', '\\', '/']),
            None => false,
        }
    })
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::cab::tests::build_cab;

    #[tokio::test]
    async fn structured_inspector_finds_marker() {
        let dir = tempfile::tempdir().unwrap();
        let with = dir.path().join("with.cab");
        let without = dir.path().join("without.cab");
        tokio::fs::write(&with, build_cab(&["Update.mum", "a.manifest"])).await.unwrap();
        tokio::fs::write(&without, build_cab(&["a.manifest"])).await.unwrap();

        let inspector = StructuredCabInspector;
        assert!(inspector.contains_marker(&with, "update.mum").await.unwrap());
        assert!(!inspector.contains_marker(&without, "update.mum").await.unwrap());
        assert_eq!(inspector.method(), InspectionMethod::Structured);
    }

    #[tokio::test]
    async fn structured_inspector_errors_on_unparseable_container() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("odd.cab");
        tokio::fs::write(&path, b"ISc(").await.unwrap();

        assert!(StructuredCabInspector.contains_marker(&path, "update.mum").await.is_err());
    }

    #[test]
    fn listing_formats_of_each_tool_are_recognized() {
        let expand = "Microsoft (R) File Expansion Utility\n\
                      c1.cab: update.mum\n\
                      c1.cab: amd64_component.manifest\n\
                      2 files total.\n";
        let cabextract = "Viewing cabinet: c1.cab\n File size | Date       Time     | Name\n\
                          -----------+---------------------+-------------\n\
                          \x20     1234 | 14.05.2024 10:00:00 | update.mum\n";
        let seven_zip = "   Date      Time    Attr         Size   Compressed  Name\n\
                         2024-05-14 10:00:00 ....A         1234               update.mum\n";

        for listing in [expand, cabextract, seven_zip] {
            assert!(listing_contains_marker(listing, "update.mum"), "{listing}");
        }
    }

    #[test]
    fn listing_requires_whole_name_match() {
        assert!(!listing_contains_marker("c1.cab: notupdate.mum\n", "update.mum"));
        assert!(!listing_contains_marker("c1.cab: update.mum.bak\n", "update.mum"));
        assert!(listing_contains_marker("update.mum\n", "update.mum"));
        assert!(listing_contains_marker("   1234 | x64\\UPDATE.MUM  \n", "update.mum"));
    }

    #[test]
    fn failed_listing_is_an_error_not_a_miss() {
        let err =
            parse_listing_output(b"", b"Can't open c1.cab\n", ExitStatus::Failure, "update.mum")
                .unwrap_err();
        assert!(matches!(err, crate::Error::ExternalTool(ref m) if m.contains("Can't open")));

        let found =
            parse_listing_output(b"c1.cab: update.mum\n", b"", ExitStatus::Success, "update.mum")
                .unwrap();
        assert!(found);
    }

    #[test]
    fn lister_kind_is_detected_from_binary_name() {
        assert_eq!(
            ListerKind::from_binary(Path::new("C:/Windows/System32/expand.exe")),
            Some(ListerKind::Expand)
        );
        assert_eq!(
            ListerKind::from_binary(Path::new("/usr/bin/cabextract")),
            Some(ListerKind::Cabextract)
        );
        assert_eq!(ListerKind::from_binary(Path::new("/usr/bin/7zz")), Some(ListerKind::SevenZip));
        assert_eq!(ListerKind::from_binary(Path::new("/usr/bin/unzip")), None);
        assert!(ListingInspector::from_binary(PathBuf::from("/usr/bin/unzip")).is_none());
    }

    #[test]
    fn from_path_consistency_with_which_crate() {
        let any_found = which::which("cabextract").is_ok()
            || which::which("7z").is_ok()
            || which::which("7zz").is_ok()
            || (cfg!(windows) && which::which("expand").is_ok());
        assert_eq!(ListingInspector::from_path().is_some(), any_found);
    }

    #[tokio::test]
    async fn missing_binary_is_an_external_tool_error() {
        let inspector = ListingInspector::new(
            PathBuf::from("/nonexistent/cabextract-xyz"),
            ListerKind::Cabextract,
        );
        let err = inspector
            .contains_marker(Path::new("c1.cab"), "update.mum")
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::ExternalTool(_)));
    }

    #[tokio::test]
    async fn noop_inspector_is_not_supported() {
        let result = NoOpInspector.contains_marker(Path::new("c1.cab"), "update.mum").await;
        match result {
            Err(crate::Error::NotSupported(msg)) => assert!(msg.contains("cab_lister_path")),
            other => panic!("Expected NotSupported error, got {other:?}"),
        }
    }
}
