//! Classification and exclusion rule tables

use crate::config::RuleConfig;
use crate::error::CatalogError;
use crate::types::Classification;
use regex::Regex;

/// Windows 10 builds that share the "version 1903 and later" category
const WINDOWS_10_UNIFIED_BUILDS: &[&str] =
    &["1903", "1909", "2004", "20H2", "21H1", "21H2", "22H2"];

/// Compiled form of [`RuleConfig`]
#[derive(Debug, Clone)]
pub struct RuleSet {
    classification: Vec<(Classification, Regex)>,
    exclusions: Vec<Regex>,
}

impl RuleSet {
    /// Compile the rule table, keeping its priority order
    pub fn compile(config: &RuleConfig) -> Result<Self, CatalogError> {
        let classification = config
            .classification
            .iter()
            .map(|rule| Ok((rule.classification, compile_pattern(&rule.pattern)?)))
            .collect::<Result<Vec<_>, CatalogError>>()?;
        let exclusions = config
            .exclusions
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, CatalogError>>()?;

        Ok(Self {
            classification,
            exclusions,
        })
    }

    /// Classify an entry by display name and category, first match wins
    ///
    /// Entries no rule matches are [`Classification::Optional`].
    pub fn classify(&self, title: &str, category: Option<&str>) -> Classification {
        let haystack = match category {
            Some(category) => format!("{title} {category}"),
            None => title.to_string(),
        };
        self.classification
            .iter()
            .find(|(_, re)| re.is_match(&haystack))
            .map(|(c, _)| *c)
            .unwrap_or(Classification::Optional)
    }

    /// The exclusion pattern a title matches, if any
    pub fn exclusion_for(&self, title: &str) -> Option<&str> {
        self.exclusions
            .iter()
            .find(|re| re.is_match(title))
            .map(|re| re.as_str())
    }
}

fn compile_pattern(pattern: &str) -> Result<Regex, CatalogError> {
    Regex::new(pattern).map_err(|e| CatalogError::InvalidRule {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

/// Catalog category covering a product/build
///
/// Catalog categories follow product lifecycle families rather than single
/// builds, so several builds map onto one category.
pub fn lifecycle_category(product: &str, build: &str) -> String {
    let build_upper = build.trim().to_uppercase();
    match product.trim() {
        "Windows 10" if WINDOWS_10_UNIFIED_BUILDS.contains(&build_upper.as_str()) => {
            "Windows 10, version 1903 and later".to_string()
        }
        "Windows 10" if build_upper.contains("LTSB") || build_upper.contains("LTSC") => {
            "Windows 10 LTSB".to_string()
        }
        "Windows Server 2022" => "Microsoft Server operating system-21H2".to_string(),
        "Windows Server 2025" => "Microsoft Server operating system-24H2".to_string(),
        "Windows Server 2012 R2" => "Windows Server 2012 R2".to_string(),
        other => other.to_string(),
    }
}

/// Catalog category holding dynamic updates for a product
pub fn dynamic_category(product: &str) -> String {
    format!("{} GDR-DU", product.trim())
}
