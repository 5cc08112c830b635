//! Core types for offline-servicing

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Stable catalog identifier of an update
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UpdateId(pub String);

impl UpdateId {
    /// Create a new UpdateId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UpdateId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Functional category of an update
///
/// Derived once from display-name heuristics when the catalog result is
/// resolved, and never changed afterwards. Determines both the cache folder
/// and the apply ordering.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    /// Servicing stack update (must precede cumulative updates)
    ServicingStack,
    /// Cumulative update for the operating system
    CumulativeUpdate,
    /// Runtime framework component (e.g. .NET Framework)
    RuntimeComponent,
    /// Cumulative update for a runtime framework
    RuntimeComponentCumulative,
    /// Setup / Safe OS dynamic update
    DynamicUpdate,
    /// Anything not matched by an explicit marker
    Optional,
    /// Antimalware definitions; never serviced offline
    Definition,
}

impl Classification {
    /// All classifications, in cache-folder listing order
    pub const ALL: [Classification; 7] = [
        Classification::ServicingStack,
        Classification::CumulativeUpdate,
        Classification::RuntimeComponent,
        Classification::RuntimeComponentCumulative,
        Classification::DynamicUpdate,
        Classification::Optional,
        Classification::Definition,
    ];

    /// Name of the cache folder holding artifacts of this classification
    pub fn folder_name(self) -> &'static str {
        match self {
            Classification::ServicingStack => "ServicingStack",
            Classification::CumulativeUpdate => "CumulativeUpdate",
            Classification::RuntimeComponent => "RuntimeComponent",
            Classification::RuntimeComponentCumulative => "RuntimeComponentCumulative",
            Classification::DynamicUpdate => "DynamicUpdate",
            Classification::Optional => "Optional",
            Classification::Definition => "Definition",
        }
    }

    /// Inverse of [`folder_name`](Self::folder_name)
    pub fn from_folder_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.folder_name() == name)
    }

    /// Integer encoding used by the history database
    pub fn to_i32(self) -> i32 {
        match self {
            Classification::ServicingStack => 0,
            Classification::CumulativeUpdate => 1,
            Classification::RuntimeComponent => 2,
            Classification::RuntimeComponentCumulative => 3,
            Classification::DynamicUpdate => 4,
            Classification::Optional => 5,
            Classification::Definition => 6,
        }
    }

    /// Decode from the history database (unknown values map to Optional)
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => Classification::ServicingStack,
            1 => Classification::CumulativeUpdate,
            2 => Classification::RuntimeComponent,
            3 => Classification::RuntimeComponentCumulative,
            4 => Classification::DynamicUpdate,
            6 => Classification::Definition,
            _ => Classification::Optional,
        }
    }
}

impl std::fmt::Display for Classification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.folder_name())
    }
}

/// Binary container an update file is distributed in
///
/// A `.cab` is a valid `.msu` payload once relabeled on platform families
/// that accept `.msu` packages offline, which is what the apply engine's
/// fallback relies on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerFormat {
    /// Cabinet, single component (format A)
    Cab,
    /// Self-extracting update package (format B)
    Msu,
}

impl ContainerFormat {
    /// File extension without the dot
    pub fn extension(self) -> &'static str {
        match self {
            ContainerFormat::Cab => "cab",
            ContainerFormat::Msu => "msu",
        }
    }

    /// Detect the format from a file extension (case-insensitive)
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "cab" => Some(ContainerFormat::Cab),
            "msu" => Some(ContainerFormat::Msu),
            _ => None,
        }
    }

    /// Detect the format from a bare file name
    pub fn from_file_name(file_name: &str) -> Option<Self> {
        Self::from_path(Path::new(file_name))
    }
}

impl std::fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// One downloadable file belonging to an update
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Owning update
    pub update_id: UpdateId,
    /// File name as published by the catalog
    pub file_name: String,
    /// Absolute URL or catalog content path
    pub locator: String,
    /// Extension-derived container format (`None` for anything but cab/msu)
    pub format: Option<ContainerFormat>,
    /// SHA-256 digest (lowercase hex) if the catalog publishes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Size in bytes if known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
}

/// One resolved catalog entry
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateDescriptor {
    /// Stable catalog identifier
    pub id: UpdateId,
    /// Display name
    pub title: String,
    /// Product the update targets (e.g. "Windows 10")
    pub product: String,
    /// Target build/version string (e.g. "22H2")
    pub build: String,
    /// Classification derived at resolution time
    pub classification: Classification,
    /// Whether the catalog marks this update superseded
    pub superseded: bool,
    /// Last revision timestamp
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_at: Option<DateTime<Utc>>,
    /// Downloadable content
    pub content: Vec<ContentItem>,
}

/// How a cabinet's marker was confirmed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InspectionMethod {
    /// In-process parse of the cabinet file table
    Structured,
    /// External lister output
    Listing,
}

/// Validation state of a materialized artifact
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ValidationState {
    /// Downloaded, not yet inspected (never persists past the fetch call)
    Unvalidated,
    /// Marker found
    Valid {
        /// Which inspection confirmed the marker
        method: InspectionMethod,
    },
    /// `.msu` package; its structure is not inspected
    Exempt,
    /// Neither inspection could run; retained under the fail-open policy
    Unverified,
    /// Already present in the cache; not re-fetched or re-inspected
    Cached,
    /// Marker missing; file deleted
    InvalidDeleted,
}

impl ValidationState {
    /// Whether an artifact in this state may enter the apply phase
    pub fn is_appliable(self) -> bool {
        matches!(
            self,
            ValidationState::Valid { .. }
                | ValidationState::Exempt
                | ValidationState::Unverified
                | ValidationState::Cached
        )
    }
}

/// A content item materialized in the local cache
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LocalArtifact {
    /// Owning update
    pub update_id: UpdateId,
    /// Owning update's display name
    pub title: String,
    /// Owning update's classification
    pub classification: Classification,
    /// Current on-disk location
    pub path: PathBuf,
    /// Format the catalog published the file in
    pub original_format: ContainerFormat,
    /// Validation state
    pub state: ValidationState,
}

impl LocalArtifact {
    /// Format implied by the current on-disk file name
    pub fn current_format(&self) -> ContainerFormat {
        ContainerFormat::from_path(&self.path).unwrap_or(self.original_format)
    }

    /// Current on-disk file name
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Result of one apply attempt sequence
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStatus {
    /// First attempt succeeded
    Success,
    /// First attempt failed, fallback attempt succeeded
    FallbackSuccess,
    /// Every attempt failed
    Failure,
}

impl ApplyStatus {
    /// Integer encoding used by the history database
    pub fn to_i32(self) -> i32 {
        match self {
            ApplyStatus::Success => 0,
            ApplyStatus::FallbackSuccess => 1,
            ApplyStatus::Failure => 2,
        }
    }

    /// Decode from the history database (unknown values map to Failure)
    pub fn from_i32(value: i32) -> Self {
        match value {
            0 => ApplyStatus::Success,
            1 => ApplyStatus::FallbackSuccess,
            _ => ApplyStatus::Failure,
        }
    }
}

/// Outcome of applying one artifact
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ApplyOutcome {
    /// Owning update
    pub update_id: UpdateId,
    /// Owning update's classification
    pub classification: Classification,
    /// On-disk path after the apply sequence (matches `format`)
    pub path: PathBuf,
    /// Format of the last attempt
    pub format: ContainerFormat,
    /// Result
    pub status: ApplyStatus,
    /// Error detail when `status` is Failure (both messages for a failed fallback)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Counts reported for every completed batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Descriptors returned by the resolver
    pub resolved: usize,
    /// Files downloaded in this batch
    pub fetched: usize,
    /// Files already present in the cache
    pub skipped_cached: usize,
    /// Files rejected before download (format or incompatible pattern)
    pub filtered: usize,
    /// Files deleted because the marker was missing
    pub validation_deleted: usize,
    /// Files whose transfer failed
    pub transfer_failed: usize,
    /// Cached files pruned by the supersedence audit
    pub pruned: usize,
    /// Artifacts applied on the first attempt
    pub applied_success: usize,
    /// Artifacts applied through the fallback format
    pub applied_fallback: usize,
    /// Artifacts whose apply failed
    pub applied_failed: usize,
    /// Whether the caller cancelled the batch
    pub cancelled: bool,
}

impl BatchSummary {
    /// Fold apply outcomes into the apply counters
    pub fn record_outcomes(&mut self, outcomes: &[ApplyOutcome]) {
        for outcome in outcomes {
            match outcome.status {
                ApplyStatus::Success => self.applied_success += 1,
                ApplyStatus::FallbackSuccess => self.applied_fallback += 1,
                ApplyStatus::Failure => self.applied_failed += 1,
            }
        }
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "fetched {}, cached {}, validation-deleted {}, applied {}, fallback {}, failed {}",
            self.fetched,
            self.skipped_cached,
            self.validation_deleted,
            self.applied_success,
            self.applied_fallback,
            self.applied_failed
        )?;
        if self.transfer_failed > 0 {
            write!(f, ", transfer-failed {}", self.transfer_failed)?;
        }
        if self.pruned > 0 {
            write!(f, ", pruned {}", self.pruned)?;
        }
        if self.cancelled {
            f.write_str(" (cancelled)")?;
        }
        Ok(())
    }
}

/// Pipeline stage
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Catalog query and classification
    Resolve,
    /// Supersedence audit of the cache partition
    Audit,
    /// Download and validation
    Fetch,
    /// Package installation into the mounted image
    Apply,
}

/// Event emitted during a servicing batch
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// Batch started
    BatchStarted {
        /// Product being serviced
        product: String,
        /// Build being serviced
        build: String,
    },

    /// Catalog resolution finished
    Resolved {
        /// Number of applicable descriptors
        count: usize,
    },

    /// Cached artifact removed by the supersedence audit
    ArtifactPruned {
        /// Removed file
        path: PathBuf,
    },

    /// Download starting
    Fetching {
        /// Owning update
        update_id: UpdateId,
        /// File being downloaded
        file_name: String,
    },

    /// Content already cached, download skipped
    CacheHit {
        /// Owning update
        update_id: UpdateId,
        /// Cached file
        path: PathBuf,
    },

    /// Download and validation finished
    Fetched {
        /// Owning update
        update_id: UpdateId,
        /// Cached file
        path: PathBuf,
        /// Validation result
        state: ValidationState,
    },

    /// Download failed
    TransferFailed {
        /// Owning update
        update_id: UpdateId,
        /// File that failed
        file_name: String,
        /// Error message
        error: String,
    },

    /// Marker check failed and the file was deleted
    ValidationFailed {
        /// Owning update
        update_id: UpdateId,
        /// Deleted file
        path: PathBuf,
    },

    /// Apply attempt starting
    Applying {
        /// Owning update
        update_id: UpdateId,
        /// Package path handed to the installer
        path: PathBuf,
        /// Format of this attempt
        format: ContainerFormat,
    },

    /// Apply sequence finished for one artifact
    Applied {
        /// Outcome
        outcome: ApplyOutcome,
    },

    /// Batch finished
    BatchComplete {
        /// Summary counts
        summary: BatchSummary,
    },
}
