//! Archive-level scrape: dedup check, download, unpack, match, extract, record.

use reqwest::Url;
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, instrument, warn};

use crate::config::PathPattern;
use crate::executor::{gather, try_gather, DownloadLimiter};
use crate::harvest::paths::{PathMatch, PathMatcher};
use crate::harvest::pipeline::{HarvestError, HarvestStats};
use crate::harvest::symbols::SymbolExtractor;
use crate::harvest::unpack::ArchiveUnpacker;
use crate::traits::{DedupStore, HttpClient, StoreError};

#[derive(Debug, Default)]
struct Counters {
    packages_scraped: AtomicU64,
    packages_skipped: AtomicU64,
    binaries_scraped: AtomicU64,
    binaries_skipped: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Turns archive URLs into package and binary records.
///
/// Shared by every crawl branch of a run; holds the run's in-flight set and counters.
pub struct ArchiveScraper {
    http: Arc<dyn HttpClient>,
    store: Arc<dyn DedupStore>,
    unpacker: ArchiveUnpacker,
    symbols: SymbolExtractor,
    limiter: DownloadLimiter,
    in_flight: Mutex<HashSet<String>>,
    counters: Counters,
}

impl ArchiveScraper {
    pub fn new(
        http: Arc<dyn HttpClient>,
        store: Arc<dyn DedupStore>,
        unpacker: ArchiveUnpacker,
        symbols: SymbolExtractor,
        limiter: DownloadLimiter,
    ) -> Self {
        Self {
            http,
            store,
            unpacker,
            symbols,
            limiter,
            in_flight: Mutex::new(HashSet::new()),
            counters: Counters::default(),
        }
    }

    /// Counter snapshot; `duration_ms` is left at zero.
    pub fn stats(&self) -> HarvestStats {
        HarvestStats {
            packages_scraped: self.counters.packages_scraped.load(Ordering::Relaxed),
            packages_skipped: self.counters.packages_skipped.load(Ordering::Relaxed),
            binaries_scraped: self.counters.binaries_scraped.load(Ordering::Relaxed),
            binaries_skipped: self.counters.binaries_skipped.load(Ordering::Relaxed),
            duration_ms: 0,
        }
    }

    /// Inserts `name` into the in-flight set; `false` if it was already there.
    fn claim(&self, name: &str) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string())
    }

    /// Scrapes one archive for the given path patterns.
    ///
    /// Patterns already recorded for this archive are dropped before download;
    /// when none remain the archive is not fetched at all.
    ///
    /// # Errors
    ///
    /// Store failures during the dedup check, transport failures and unpack
    /// failures abort the archive. Failures while processing one pattern are
    /// logged and do not affect the other patterns.
    #[instrument(skip(self, patterns))]
    pub async fn scrape_archive(
        &self,
        url: &str,
        patterns: &[PathPattern],
    ) -> Result<(), HarvestError> {
        let name = archive_name(url)?;
        if !self.claim(&name) {
            debug!(archive = %name, "Archive already in flight");
            return Ok(());
        }

        let pending = self.pending_patterns(&name, patterns).await?;
        if pending.is_empty() {
            Counters::bump(&self.counters.packages_skipped);
            debug!(archive = %name, "Archive already scraped");
            return Ok(());
        }

        let _permit = self.limiter.acquire().await?;
        let response = self.http.get(url).await?;
        if response.status != 200 {
            warn!("HTTP {} {}", response.status, url);
            return Ok(());
        }
        debug!("HTTP {} {}", response.status, url);

        let extraction = self.unpacker.unpack(response.body).await?;

        let matcher = PathMatcher::new(pending);
        let root = extraction.path().to_path_buf();
        let grouped =
            tokio::task::spawn_blocking(move || matcher.matches_by_pattern(&root)).await?;

        gather(
            grouped
                .into_iter()
                .map(|(pattern, found)| self.scrape_pattern(&name, pattern, found)),
        )
        .await;
        drop(extraction);

        Counters::bump(&self.counters.packages_scraped);
        info!(archive = %name, "Archive scraped");
        Ok(())
    }

    /// Patterns with no package record yet. Any lookup failure fails the whole check.
    async fn pending_patterns(
        &self,
        name: &str,
        patterns: &[PathPattern],
    ) -> Result<Vec<PathPattern>, StoreError> {
        let store = &self.store;
        let lookups = patterns.iter().map(move |pattern| async move {
            let existing = store.find_package(name, pattern.as_str()).await?;
            Ok::<_, StoreError>(existing.is_none().then(|| pattern.clone()))
        });
        Ok(try_gather(lookups).await?.into_iter().flatten().collect())
    }

    /// Records `(archive, pattern)` only once every matched binary is done.
    async fn scrape_pattern(
        &self,
        archive: &str,
        pattern: PathPattern,
        found: Vec<PathMatch>,
    ) -> Result<(), HarvestError> {
        debug!(archive, pattern = pattern.as_str(), files = found.len(), "Pattern matched");
        try_gather(
            found
                .iter()
                .map(|m| self.scrape_binary(m.binary_name(archive), &m.real_path)),
        )
        .await?;
        self.store.save_package(archive, pattern.as_str()).await?;
        Ok(())
    }

    /// Extracts and stores the symbol table of one binary unless it is already stored.
    #[instrument(skip(self, path))]
    pub async fn scrape_binary(&self, name: String, path: &Path) -> Result<(), HarvestError> {
        debug!("Processing {}", name);
        if self.store.find_binary(&name).await?.is_some() {
            Counters::bump(&self.counters.binaries_skipped);
            return Ok(());
        }

        let symbols = self.symbols.extract(path).await?;
        self.store.save_binary(&name, &symbols).await?;
        Counters::bump(&self.counters.binaries_scraped);
        Ok(())
    }
}

/// Last path segment of `url`, e.g. `libc6-i386_2.19-0ubuntu6_amd64.deb`.
pub fn archive_name(url: &str) -> Result<String, HarvestError> {
    let parsed = Url::parse(url).map_err(|e| HarvestError::InvalidUrl {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .ok_or_else(|| HarvestError::InvalidUrl {
            url: url.to_string(),
            message: "no file name in path".to_string(),
        })
}
