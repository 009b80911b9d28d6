//! Run configuration.
//!
//! Every field has a default, so an empty JSON object (or no file at all)
//! reproduces the stock crawl of `libc6-i386` across Launchpad's Ubuntu archive.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid path pattern '{pattern}' for package '{package}': {source}")]
    InvalidPattern {
        package: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("Invalid base URL '{0}'")]
    InvalidBaseUrl(String),
}

/// An external program plus leading arguments placed before the fixed ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl ToolCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub(crate) fn command(&self) -> tokio::process::Command {
        let mut command = tokio::process::Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// A path pattern matched against virtual paths from their start.
#[derive(Debug, Clone)]
pub struct PathPattern {
    source: String,
    regex: Regex,
}

impl PathPattern {
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            source: source.to_string(),
            regex: anchored(source)?,
        })
    }

    /// The pattern text as written; also the `path` of package records.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub fn is_match(&self, virtual_path: &str) -> bool {
        self.regex.is_match(virtual_path)
    }
}

impl PartialEq for PathPattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for PathPattern {}

/// Compiles `pattern` so it only matches at the start of the haystack.
pub(crate) fn anchored(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?:{})", pattern))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HarvestConfig {
    pub base_url: String,
    pub releases: Vec<String>,
    pub archs: Vec<String>,
    /// Package name to the path patterns of interest inside its archives.
    pub packages: BTreeMap<String, Vec<String>>,
    pub extract_tool: ToolCommand,
    pub symbols_tool: ToolCommand,
    /// `nm` type codes whose lines never enter a symbol table.
    pub excluded_symbol_types: Vec<char>,
    pub max_concurrent_downloads: usize,
    pub store_path: PathBuf,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        let releases = [
            "trusty", "warty", "hoary", "breezy", "dapper", "edgy", "feisty", "gutsy", "hardy",
            "intrepid", "jaunty", "karmic", "lucid", "maverick", "natty", "oneiric", "precise",
            "quantal", "raring", "saucy", "utopic", "vivid", "wily", "xenial", "yakkety",
        ];
        let archs = [
            "amd64", "arm64", "armel", "armhf", "ia64", "i386", "ppc64el", "powerpc", "sparc",
        ];

        let mut packages = BTreeMap::new();
        packages.insert(
            "libc6-i386".to_string(),
            vec![r".*libc(-.*)?\.so(\..*)?".to_string()],
        );

        Self {
            base_url: "https://launchpad.net".to_string(),
            releases: releases.iter().map(|s| s.to_string()).collect(),
            archs: archs.iter().map(|s| s.to_string()).collect(),
            packages,
            extract_tool: ToolCommand::new("dpkg"),
            symbols_tool: ToolCommand::new("nm"),
            excluded_symbol_types: vec!['U'],
            max_concurrent_downloads: 8,
            store_path: PathBuf::from("libcat.db"),
        }
    }
}

impl HarvestConfig {
    /// Loads a JSON config file; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_json::from_str(content)?;
        config.releases = dedup_preserving_order(config.releases);
        config.archs = dedup_preserving_order(config.archs);
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_releases<I, S>(mut self, releases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.releases = dedup_preserving_order(releases.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_archs<I, S>(mut self, archs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.archs = dedup_preserving_order(archs.into_iter().map(Into::into).collect());
        self
    }

    /// Replaces the package table with a single package.
    pub fn with_package<I, S>(mut self, name: impl Into<String>, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.packages.clear();
        self.packages
            .insert(name.into(), patterns.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_extract_tool(mut self, tool: ToolCommand) -> Self {
        self.extract_tool = tool;
        self
    }

    pub fn with_symbols_tool(mut self, tool: ToolCommand) -> Self {
        self.symbols_tool = tool;
        self
    }

    pub fn with_max_concurrent_downloads(mut self, limit: usize) -> Self {
        self.max_concurrent_downloads = limit;
        self
    }

    /// Compiles every package's path patterns, failing on the first bad one.
    pub fn compile_patterns(&self) -> Result<BTreeMap<String, Vec<PathPattern>>, ConfigError> {
        self.packages
            .iter()
            .map(|(package, patterns)| {
                let compiled = patterns
                    .iter()
                    .map(|pattern| {
                        PathPattern::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                            package: package.clone(),
                            pattern: pattern.clone(),
                            source,
                        })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                Ok((package.clone(), compiled))
            })
            .collect()
    }
}

fn dedup_preserving_order(items: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_stock_crawl() {
        let config = HarvestConfig::default();
        assert_eq!(config.base_url, "https://launchpad.net");
        assert_eq!(config.releases.first().map(String::as_str), Some("trusty"));
        assert_eq!(config.releases.len(), 25);
        assert!(config.archs.contains(&"i386".to_string()));
        assert_eq!(config.extract_tool.program, "dpkg");
        assert_eq!(config.symbols_tool.program, "nm");
        assert_eq!(config.excluded_symbol_types, vec!['U']);
        assert!(config.packages.contains_key("libc6-i386"));
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config = HarvestConfig::from_json("{}").unwrap();
        assert_eq!(config.max_concurrent_downloads, 8);
        assert_eq!(config.store_path, PathBuf::from("libcat.db"));
    }

    #[test]
    fn test_json_overrides_and_dedups_releases() {
        let config = HarvestConfig::from_json(
            r#"{
                "releases": ["trusty", "xenial", "trusty"],
                "archs": ["amd64"],
                "packages": {"zlib1g": ["/lib/.*libz\\.so.*"]},
                "symbols_tool": {"program": "llvm-nm", "args": ["--no-demangle"]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.releases, vec!["trusty", "xenial"]);
        assert_eq!(config.archs, vec!["amd64"]);
        assert_eq!(config.packages["zlib1g"], vec![r"/lib/.*libz\.so.*"]);
        assert_eq!(config.symbols_tool.args, vec!["--no-demangle"]);
        assert_eq!(config.extract_tool.program, "dpkg");
    }

    #[test]
    fn test_invalid_pattern_is_reported() {
        let config = HarvestConfig::default().with_package("broken", ["(unclosed"]);
        let err = config.compile_patterns().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPattern { ref package, .. } if package == "broken"));
    }

    #[test]
    fn test_path_pattern_is_prefix_anchored() {
        let pattern = PathPattern::new(r"/lib/.*\.so").unwrap();
        assert!(pattern.is_match("/lib/libc.so.6"));
        assert!(!pattern.is_match("/usr/lib/libc.so.6"));
        assert_eq!(pattern.as_str(), r"/lib/.*\.so");
    }
}
