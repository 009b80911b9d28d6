//! Top-level harvest pipeline.
//!
//! [`HarvestPipeline`] wires the stages together for one run:
//! Crawler → ArchiveUnpacker → PathMatcher → SymbolExtractor → DedupStore.
//! - Async execution via `tokio`
//! - Structured logging via `tracing`
//! - Temporary archives and trees cleaned up via RAII (`Drop` on `TempExtraction`)

use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument};

use crate::config::{ConfigError, HarvestConfig};
use crate::executor::DownloadLimiter;
use crate::harvest::archive::ArchiveScraper;
use crate::harvest::crawler::{CrawlTarget, Crawler};
use crate::harvest::symbols::SymbolExtractor;
use crate::harvest::unpack::ArchiveUnpacker;
use crate::traits::{DedupStore, FetchError, HttpClient, StoreError};

// ============================================================================
// Pipeline Types
// ============================================================================

/// Counters for one run.
///
/// A second run over an unchanged archive and store scrapes nothing: every
/// archive it reaches lands in `packages_skipped`.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestStats {
    /// Archives downloaded and processed
    pub packages_scraped: u64,

    /// Archives whose every pattern was already recorded
    pub packages_skipped: u64,

    /// Binaries whose symbol table was extracted and saved
    pub binaries_scraped: u64,

    /// Binaries already present in the store
    pub binaries_skipped: u64,

    /// Wall time of the whole run (milliseconds)
    pub duration_ms: u64,
}

// ============================================================================
// Pipeline Errors
// ============================================================================

/// Errors that can occur during a harvest.
#[derive(thiserror::Error, Debug)]
pub enum HarvestError {
    /// Transport failure; aborts only the branch it happened in
    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    /// Dedup store failure
    #[error("Store failed: {0}")]
    Store(#[from] StoreError),

    /// Temp file, temp dir or tool spawn failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    #[error("Invalid link pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Download limiter closed")]
    LimiterClosed(#[from] tokio::sync::AcquireError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ============================================================================
// Pipeline Executor
// ============================================================================

/// One configured harvest run.
///
/// # Example
///
/// ```ignore
/// use deb_symbol_harvester::{HarvestConfig, HarvestPipeline, MemoryStore, ReqwestClient};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = HarvestConfig::default().with_releases(["xenial"]);
///     let pipeline = HarvestPipeline::new(
///         &config,
///         Arc::new(ReqwestClient::new()?),
///         Arc::new(MemoryStore::new()),
///     )?;
///     let stats = pipeline.run().await;
///     println!("{} binaries scraped", stats.binaries_scraped);
///     Ok(())
/// }
/// ```
pub struct HarvestPipeline {
    crawler: Crawler,
    archives: Arc<ArchiveScraper>,
    targets: Vec<CrawlTarget>,
}

impl HarvestPipeline {
    /// Builds the pipeline and the full (release, arch, package) target list.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Config`] for an unparsable base URL or path pattern.
    pub fn new(
        config: &HarvestConfig,
        http: Arc<dyn HttpClient>,
        store: Arc<dyn DedupStore>,
    ) -> Result<Self, HarvestError> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|_| ConfigError::InvalidBaseUrl(config.base_url.clone()))?;
        let patterns = config.compile_patterns()?;

        let mut targets = Vec::new();
        for release in &config.releases {
            for arch in &config.archs {
                for (package, package_patterns) in &patterns {
                    targets.push(CrawlTarget {
                        release: release.clone(),
                        arch: arch.clone(),
                        package: package.clone(),
                        patterns: package_patterns.clone(),
                    });
                }
            }
        }

        let archives = Arc::new(ArchiveScraper::new(
            http.clone(),
            store,
            ArchiveUnpacker::new(config.extract_tool.clone()),
            SymbolExtractor::new(config.symbols_tool.clone())
                .with_excluded_types(config.excluded_symbol_types.iter().copied()),
            DownloadLimiter::new(config.max_concurrent_downloads),
        ));
        let crawler = Crawler::new(http, base_url, archives.clone())?;

        Ok(Self {
            crawler,
            archives,
            targets,
        })
    }

    pub fn targets(&self) -> &[CrawlTarget] {
        &self.targets
    }

    /// Crawls every target and returns the run's counters.
    ///
    /// Individual failures are logged where they happen and never end the run.
    #[instrument(skip(self), fields(targets = self.targets.len()))]
    pub async fn run(&self) -> HarvestStats {
        let start = Instant::now();
        info!("Starting crawl");

        self.crawler.crawl(&self.targets).await;

        let mut stats = self.archives.stats();
        stats.duration_ms = start.elapsed().as_millis() as u64;
        info!(
            "{} binaries scraped, {} skipped",
            stats.binaries_scraped, stats.binaries_skipped
        );
        info!(
            "{} packages scraped, {} skipped",
            stats.packages_scraped, stats.packages_skipped
        );
        stats
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolCommand;
    use crate::store::MemoryStore;
    use crate::testing::{fake_dpkg, fake_nm, MockHttp, ToolLog};

    const BASE: &str = "http://launchpad.test";

    /// Two releases whose index pages both lead to the same archive, plus a
    /// second archive only reachable from xenial.
    fn archive_web() -> MockHttp {
        let http = MockHttp::new();
        let shared = "http://librarian.test/1/libc6-i386_2.19_amd64.deb";
        let newer = "http://librarian.test/2/libc6-i386_2.23_amd64.deb";

        for release in ["trusty", "xenial"] {
            let index = format!("{}/ubuntu/{}/amd64/libc6-i386/", BASE, release);
            http.page(
                &index,
                200,
                format!(r#"<ul><li><a href="/ubuntu/{}/amd64/libc6-i386/v">v</a></li></ul>"#, release),
            );
            let mut page = format!(r#"<a href="{}">deb</a>"#, shared);
            if release == "xenial" {
                page.push_str(&format!(r#"<a href="{}">deb</a>"#, newer));
            }
            http.page(&format!("{}v", index), 200, page);
        }
        http.page(shared, 200, "0000000000001139 T foo\n0000000000001140 U bar\n");
        http.page(newer, 200, "0000000000002000 T foo\n0000000000003000 W baz\n");
        http
    }

    fn config(tools: &std::path::Path, log: &ToolLog) -> HarvestConfig {
        HarvestConfig::default()
            .with_base_url(BASE)
            .with_releases(["trusty", "xenial", "trusty"])
            .with_archs(["amd64"])
            .with_package("libc6-i386", [r".*libc(-.*)?\.so(\..*)?", "/usr/lib32/"])
            .with_extract_tool(fake_dpkg(tools, log))
            .with_symbols_tool(fake_nm(tools, log))
            .with_max_concurrent_downloads(2)
    }

    #[test]
    fn test_targets_cross_product() {
        let config = HarvestConfig::default()
            .with_releases(["trusty", "xenial"])
            .with_archs(["amd64", "i386", "armhf"]);
        let pipeline = HarvestPipeline::new(
            &config,
            Arc::new(MockHttp::new()),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        assert_eq!(pipeline.targets().len(), 6);
        assert_eq!(
            pipeline.targets()[5].index_path(),
            "/ubuntu/xenial/armhf/libc6-i386/"
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let http: Arc<dyn HttpClient> = Arc::new(MockHttp::new());
        let store: Arc<dyn DedupStore> = Arc::new(MemoryStore::new());

        let bad_url = HarvestConfig::default().with_base_url("not a url");
        assert!(matches!(
            HarvestPipeline::new(&bad_url, http.clone(), store.clone()),
            Err(HarvestError::Config(ConfigError::InvalidBaseUrl(_)))
        ));

        let bad_pattern = HarvestConfig::default().with_package("x", ["["]);
        assert!(matches!(
            HarvestPipeline::new(&bad_pattern, http, store),
            Err(HarvestError::Config(ConfigError::InvalidPattern { .. }))
        ));
    }

    #[tokio::test]
    async fn test_full_run_is_idempotent() {
        let tools = tempfile::tempdir().unwrap();
        let log = ToolLog::new(tools.path());
        let http = Arc::new(archive_web());
        let store = Arc::new(MemoryStore::new());
        let config = config(tools.path(), &log);

        let first = HarvestPipeline::new(&config, http.clone(), store.clone())
            .unwrap()
            .run()
            .await;
        assert_eq!(first.packages_scraped, 2);
        assert_eq!(first.packages_skipped, 0);
        assert_eq!(first.binaries_scraped, 4);
        assert_eq!(http.requests_matching("libc6-i386_2.19_amd64.deb"), 1);

        let packages = store.packages().unwrap();
        let binaries = store.binaries().unwrap();
        assert_eq!(packages.len(), 4);
        assert_eq!(binaries.len(), 4);
        let old = &binaries[0];
        assert_eq!(old.name, "libc6-i386_2.19_amd64.deb/lib32/libc-2.19.so");
        assert_eq!(old.symbols.len(), 1);
        assert_eq!(old.symbols["foo"], 4409);
        let newer = binaries
            .iter()
            .find(|b| b.name == "libc6-i386_2.23_amd64.deb/usr/lib32/libfoo.so.1")
            .unwrap();
        assert_eq!(newer.symbols["baz"], 0x3000);

        let downloads_before = http.requests_matching(".deb");
        let extractions_before = log.count("dpkg");

        let second = HarvestPipeline::new(&config, http.clone(), store.clone())
            .unwrap()
            .run()
            .await;
        assert_eq!(second.packages_scraped, 0);
        assert_eq!(second.packages_skipped, 2);
        assert_eq!(second.binaries_scraped, 0);
        assert_eq!(http.requests_matching(".deb"), downloads_before);
        assert_eq!(log.count("dpkg"), extractions_before);
        assert_eq!(store.packages().unwrap(), packages);
        assert_eq!(store.binaries().unwrap(), binaries);
    }

    #[tokio::test]
    async fn test_unreachable_index_does_not_stop_run() {
        let tools = tempfile::tempdir().unwrap();
        let log = ToolLog::new(tools.path());
        let http = Arc::new(archive_web());
        http.fail(&format!("{}/ubuntu/trusty/amd64/libc6-i386/", BASE));
        let store = Arc::new(MemoryStore::new());

        let stats = HarvestPipeline::new(&config(tools.path(), &log), http.clone(), store.clone())
            .unwrap()
            .run()
            .await;

        // The shared archive is still reached through xenial.
        assert_eq!(stats.packages_scraped, 2);
        assert_eq!(store.binaries().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_broken_extract_tool_records_empty_patterns() {
        let tools = tempfile::tempdir().unwrap();
        let log = ToolLog::new(tools.path());
        let http = Arc::new(archive_web());
        let store = Arc::new(MemoryStore::new());
        let config = config(tools.path(), &log)
            .with_extract_tool(ToolCommand::new("sh").with_args(["-c", "exit 1", "dpkg"]));

        let stats = HarvestPipeline::new(&config, http, store.clone())
            .unwrap()
            .run()
            .await;

        assert_eq!(stats.packages_scraped, 2);
        assert_eq!(stats.binaries_scraped, 0);
        assert!(store.binaries().unwrap().is_empty());
        assert_eq!(store.packages().unwrap().len(), 4);
    }
}
