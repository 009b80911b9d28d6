//! Three-level crawl: package index, package page, archive.

use reqwest::Url;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use crate::config::PathPattern;
use crate::executor::gather;
use crate::harvest::archive::ArchiveScraper;
use crate::harvest::links::LinkExtractor;
use crate::harvest::pipeline::HarvestError;
use crate::traits::HttpClient;

/// One (release, architecture, package) combination to crawl.
#[derive(Debug, Clone)]
pub struct CrawlTarget {
    pub release: String,
    pub arch: String,
    pub package: String,
    pub patterns: Vec<PathPattern>,
}

impl CrawlTarget {
    /// e.g. `/ubuntu/trusty/amd64/libc6-i386/`
    pub fn index_path(&self) -> String {
        format!("/ubuntu/{}/{}/{}/", self.release, self.arch, self.package)
    }
}

pub struct Crawler {
    http: Arc<dyn HttpClient>,
    base_url: Url,
    archives: Arc<ArchiveScraper>,
    deb_links: LinkExtractor,
}

impl Crawler {
    pub fn new(
        http: Arc<dyn HttpClient>,
        base_url: Url,
        archives: Arc<ArchiveScraper>,
    ) -> Result<Self, HarvestError> {
        Ok(Self {
            http,
            base_url,
            archives,
            deb_links: LinkExtractor::new(r".*\.deb")?,
        })
    }

    /// Crawls every target concurrently; a failing target never stops the others.
    pub async fn crawl(&self, targets: &[CrawlTarget]) {
        gather(targets.iter().map(|target| self.scrape_index(target))).await;
    }

    /// Fetches a package index and crawls every version page it links to.
    #[instrument(skip(self, target), fields(release = %target.release, arch = %target.arch, package = %target.package))]
    pub async fn scrape_index(&self, target: &CrawlTarget) -> Result<(), HarvestError> {
        let index_path = target.index_path();
        let url = resolve(&self.base_url, &index_path)?;
        let response = self.http.get(url.as_str()).await?;
        if response.status != 200 {
            debug!("HTTP {} {}", response.status, url);
            return Ok(());
        }
        debug!("HTTP {} {}", response.status, url);

        let page_links = LinkExtractor::new(&format!("{}.+", regex::escape(&index_path)))?;
        let mut pages = Vec::new();
        page_links
            .extract(response.body, |href| pages.push(href))
            .await?;

        let pages: Vec<Url> = pages
            .iter()
            .filter_map(|href| resolve(&url, href).ok())
            .collect();
        debug!(count = pages.len(), "Package pages discovered");

        gather(
            pages
                .into_iter()
                .map(|page| self.scrape_package(page, &target.patterns)),
        )
        .await;
        Ok(())
    }

    /// Fetches one package version page and scrapes every archive it links to.
    #[instrument(skip(self, url, patterns), fields(url = %url))]
    pub async fn scrape_package(
        &self,
        url: Url,
        patterns: &[PathPattern],
    ) -> Result<(), HarvestError> {
        let response = self.http.get(url.as_str()).await?;
        if response.status != 200 {
            warn!("HTTP {} {}", response.status, url);
            return Ok(());
        }
        debug!("HTTP {} {}", response.status, url);

        let mut archives = Vec::new();
        self.deb_links
            .extract(response.body, |href| archives.push(href))
            .await?;

        let archives: Vec<Url> = archives
            .iter()
            .filter_map(|href| resolve(&url, href).ok())
            .collect();

        gather(
            archives
                .iter()
                .map(|archive| self.archives.scrape_archive(archive.as_str(), patterns)),
        )
        .await;
        Ok(())
    }
}

/// Resolves `href` against the page it was found on.
fn resolve(page: &Url, href: &str) -> Result<Url, HarvestError> {
    page.join(href).map_err(|e| {
        warn!(href, error = %e, "Skipping unresolvable link");
        HarvestError::InvalidUrl {
            url: href.to_string(),
            message: e.to_string(),
        }
    })
}
