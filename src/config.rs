//! Configuration types for offline-servicing

use crate::error::{Error, Result};
use crate::types::Classification;
use serde::{Deserialize, Serialize};
use std::{path::Path, path::PathBuf, time::Duration};

/// The image being serviced
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicingTarget {
    /// Product name (default: "Windows 10")
    #[serde(default = "default_product")]
    pub product: String,

    /// Build/version string as it appears in catalog titles (default: "22H2")
    #[serde(default = "default_build")]
    pub build: String,

    /// Architecture token as it appears in catalog titles (default: "x64")
    #[serde(default = "default_architecture")]
    pub architecture: String,
}

impl Default for ServicingTarget {
    fn default() -> Self {
        Self {
            product: default_product(),
            build: default_build(),
            architecture: default_architecture(),
        }
    }
}

/// Caller-supplied switches gating optional classifications
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    /// Keep Optional-classified updates (default: false)
    #[serde(default)]
    pub include_optional: bool,

    /// Keep DynamicUpdate-classified updates (default: false)
    #[serde(default)]
    pub include_dynamic: bool,
}

/// Which catalog backend answers queries
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CatalogBackendKind {
    /// Curated index keyed by product/architecture/build/classification (default)
    #[default]
    CuratedIndex,
    /// Enterprise software-distribution catalog queried by category filter
    Enterprise,
}

/// Username/password pair for basic authentication
#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    /// Account name
    pub username: String,
    /// Account password
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Catalog backend settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CatalogConfig {
    /// Selected backend
    #[serde(default)]
    pub backend: CatalogBackendKind,

    /// Base URL of the curated index
    #[serde(default)]
    pub curated_index_url: Option<String>,

    /// Base URL of the enterprise catalog server
    #[serde(default)]
    pub enterprise_url: Option<String>,

    /// Credentials for the selected backend
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Per-request timeout (default: 30 seconds)
    #[serde(default = "default_catalog_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            backend: CatalogBackendKind::default(),
            curated_index_url: None,
            enterprise_url: None,
            credentials: None,
            timeout: default_catalog_timeout(),
        }
    }
}

/// Local artifact cache settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Cache root (default: "./cache")
    ///
    /// Partitions live at `<root>/<product>/<build>/<architecture>`.
    #[serde(default = "default_cache_root")]
    pub root: PathBuf,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            root: default_cache_root(),
        }
    }
}

/// Content download settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-file transfer timeout (default: 30 minutes)
    #[serde(default = "default_fetch_timeout", with = "duration_serde")]
    pub timeout: Duration,

    /// Credentials sent with content downloads
    #[serde(default)]
    pub credentials: Option<Credentials>,

    /// Check downloaded bytes against catalog-published SHA-256 digests (default: true)
    #[serde(default = "default_true")]
    pub verify_digests: bool,

    /// Case-insensitive regexes for filenames that fail on a clean offline image
    #[serde(default = "default_incompatible_patterns")]
    pub incompatible_patterns: Vec<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout: default_fetch_timeout(),
            credentials: None,
            verify_digests: true,
            incompatible_patterns: default_incompatible_patterns(),
        }
    }
}

/// What to do with a cabinet neither inspection method could examine
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnverifiablePolicy {
    /// Keep the file and apply it (default)
    #[default]
    Retain,
    /// Delete the file as if the marker were missing
    Delete,
}

/// Cabinet validation settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// File that must be present in a cabinet's file table (default: "update.mum")
    #[serde(default = "default_marker_file")]
    pub marker_file: String,

    /// Handling of cabinets that could not be inspected
    #[serde(default)]
    pub unverifiable_policy: UnverifiablePolicy,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            marker_file: default_marker_file(),
            unverifiable_policy: UnverifiablePolicy::default(),
        }
    }
}

/// Apply path selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyStrategySetting {
    /// Pick from the target product's platform family (default)
    #[default]
    Auto,
    /// Relabel cabinets as `.msu`, fall back to `.cab` on failure
    RelabelWithFallback,
    /// Apply every file in its published format
    Direct,
}

/// Apply engine settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ApplyConfig {
    /// Strategy selection
    #[serde(default)]
    pub strategy: ApplyStrategySetting,

    /// Scratch directory handed to the installer
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

/// External tool paths
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Path to the dism executable (auto-detected if None)
    #[serde(default)]
    pub dism_path: Option<PathBuf>,

    /// Path to a cabinet lister: expand, cabextract or 7z (auto-detected if None)
    #[serde(default)]
    pub cab_lister_path: Option<PathBuf>,

    /// Whether to search PATH for external binaries if explicit paths not set (default: true)
    #[serde(default = "default_true")]
    pub search_path: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            dism_path: None,
            cab_lister_path: None,
            search_path: true,
        }
    }
}

/// Retry configuration for transient transport failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 2 seconds)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Servicing history storage
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// SQLite database path (default: "./servicing.db")
    #[serde(default = "default_database_path")]
    pub database_path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

/// One entry of the classification rule table
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationRule {
    /// Classification assigned when the pattern matches
    pub classification: Classification,
    /// Case-insensitive regex matched against "<title> <category>"
    pub pattern: String,
}

impl ClassificationRule {
    fn new(classification: Classification, pattern: &str) -> Self {
        Self {
            classification,
            pattern: pattern.to_string(),
        }
    }
}

/// Catalog heuristics, kept as data
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleConfig {
    /// Classification rules, first match wins; unmatched entries are Optional
    #[serde(default = "default_classification_rules")]
    pub classification: Vec<ClassificationRule>,

    /// Titles matching any of these are never serviced offline
    #[serde(default = "default_exclusions")]
    pub exclusions: Vec<String>,
}

impl Default for RuleConfig {
    fn default() -> Self {
        Self {
            classification: default_classification_rules(),
            exclusions: default_exclusions(),
        }
    }
}

/// Main configuration for [`ImageServicer`](crate::ImageServicer)
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Image being serviced
    #[serde(default)]
    pub target: ServicingTarget,

    /// Optional classification switches
    #[serde(default)]
    pub toggles: FeatureToggles,

    /// Catalog backend selection and endpoints
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Artifact cache location
    #[serde(default)]
    pub cache: CacheConfig,

    /// Content download behavior
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Cabinet validation behavior
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Apply engine behavior
    #[serde(default)]
    pub apply: ApplyConfig,

    /// External tool paths
    #[serde(default)]
    pub tools: ToolsConfig,

    /// Transport retry behavior
    #[serde(default)]
    pub retry: RetryConfig,

    /// History database
    #[serde(default)]
    pub persistence: PersistenceConfig,

    /// Classification and exclusion rules
    #[serde(default)]
    pub rules: RuleConfig,
}

/// Explicit per-batch context handed to every pipeline component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServicingContext {
    /// Product being serviced
    pub product: String,
    /// Build being serviced
    pub build: String,
    /// Architecture being serviced
    pub architecture: String,
    /// Optional classification switches
    pub toggles: FeatureToggles,
    /// Backend answering catalog queries
    pub backend: CatalogBackendKind,
    /// Cache partition for this product/build
    pub partition_root: PathBuf,
}

impl Config {
    /// Load configuration from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to read config file '{}': {}", path.display(), e),
            ))
        })?;
        let config: Config = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check settings that cannot be expressed through serde alone
    pub fn validate(&self) -> Result<()> {
        for (key, value) in [
            ("target.product", &self.target.product),
            ("target.build", &self.target.build),
            ("target.architecture", &self.target.architecture),
        ] {
            if value.trim().is_empty() {
                return Err(Error::config(key, format!("{key} must not be empty")));
            }
        }

        let (key, url) = match self.catalog.backend {
            CatalogBackendKind::CuratedIndex => {
                ("catalog.curated_index_url", &self.catalog.curated_index_url)
            }
            CatalogBackendKind::Enterprise => {
                ("catalog.enterprise_url", &self.catalog.enterprise_url)
            }
        };
        let url = url
            .as_deref()
            .ok_or_else(|| Error::config(key, "selected catalog backend has no URL"))?;
        url::Url::parse(url).map_err(|e| Error::config(key, format!("invalid URL '{url}': {e}")))?;

        let marker = &self.validation.marker_file;
        if marker.is_empty() || marker.contains(['/', '\\']) {
            return Err(Error::config(
                "validation.marker_file",
                "marker must be a bare file name",
            ));
        }

        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be at least 1.0",
            ));
        }

        let patterns = self
            .rules
            .classification
            .iter()
            .map(|r| ("rules.classification", &r.pattern))
            .chain(self.rules.exclusions.iter().map(|p| ("rules.exclusions", p)))
            .chain(
                self.fetch
                    .incompatible_patterns
                    .iter()
                    .map(|p| ("fetch.incompatible_patterns", p)),
            );
        for (key, pattern) in patterns {
            regex::Regex::new(pattern)
                .map_err(|e| Error::config(key, format!("invalid pattern '{pattern}': {e}")))?;
        }

        Ok(())
    }

    /// Cache partition for the configured product/build/architecture
    pub fn partition_root(&self) -> PathBuf {
        crate::cache::CacheLayout::partition_for(&self.cache.root, &self.target)
            .root()
            .to_path_buf()
    }

    /// Build the explicit context passed to pipeline components
    pub fn context(&self) -> ServicingContext {
        ServicingContext {
            product: self.target.product.clone(),
            build: self.target.build.clone(),
            architecture: self.target.architecture.clone(),
            toggles: self.toggles,
            backend: self.catalog.backend,
            partition_root: self.partition_root(),
        }
    }
}

fn default_product() -> String {
    "Windows 10".into()
}

fn default_build() -> String {
    "22H2".into()
}

fn default_architecture() -> String {
    "x64".into()
}

fn default_true() -> bool {
    true
}

fn default_catalog_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30 * 60)
}

fn default_cache_root() -> PathBuf {
    PathBuf::from("./cache")
}

fn default_database_path() -> PathBuf {
    PathBuf::from("./servicing.db")
}

fn default_marker_file() -> String {
    "update.mum".into()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_incompatible_patterns() -> Vec<String> {
    vec![
        // component metadata only
        r"(?i)componentmetadata|component-metadata|\bmetadata\.cab$".into(),
        // express / delta payloads
        r"(?i)express|[-_.]delta[-_.]|psfx".into(),
        // require a baseline already present on the image
        r"(?i)baseless|baseline".into(),
    ]
}

fn default_classification_rules() -> Vec<ClassificationRule> {
    use Classification::*;
    vec![
        ClassificationRule::new(
            Definition,
            r"(?i)definition update|security intelligence update|antimalware platform",
        ),
        ClassificationRule::new(ServicingStack, r"(?i)servicing stack update"),
        ClassificationRule::new(
            RuntimeComponentCumulative,
            r"(?i)cumulative update for \.net framework",
        ),
        ClassificationRule::new(
            CumulativeUpdate,
            concat!(
                r"(?i)cumulative update for (windows|microsoft server operating system)",
                r"|monthly quality rollup",
            ),
        ),
        ClassificationRule::new(RuntimeComponent, r"(?i)\.net framework"),
        ClassificationRule::new(
            DynamicUpdate,
            r"(?i)dynamic update|setup update|safe os|gdr-du",
        ),
    ]
}

fn default_exclusions() -> Vec<String> {
    vec![
        // feature upgrades
        r"(?i)feature update to".into(),
        // full edition upgrades
        r"(?i)upgrade to windows|edition upgrade".into(),
        // language packs
        r"(?i)language (interface )?pack|language feature".into(),
        // edition bundles
        r"(?i)(business|consumer) editions|multi-edition".into(),
    ]
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
