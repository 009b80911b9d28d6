//! Harvest module - crawl, unpack and symbol extraction pipeline.
//!
//! This module provides the stages of a harvest run, leaves first:
//! - **Links**: streaming anchor discovery via [`LinkExtractor`]
//! - **Symbols**: `nm -D` output to a symbol table via [`SymbolExtractor`]
//! - **Unpack**: scoped temp archive and tree via [`ArchiveUnpacker`]
//! - **Paths**: virtual-path matching via [`PathMatcher`]
//! - **Crawl**: index → package page → archive via [`Crawler`] and [`ArchiveScraper`]
//! - **Pipeline**: the configured run via [`pipeline::HarvestPipeline`]

pub mod archive;
pub mod crawler;
pub mod links;
pub mod paths;
pub mod pipeline;
pub mod symbols;
pub mod unpack;

// Re-export commonly used types
pub use archive::{archive_name, ArchiveScraper};
pub use crawler::{CrawlTarget, Crawler};
pub use links::LinkExtractor;
pub use paths::{PathMatch, PathMatcher};
pub use pipeline::{HarvestError, HarvestPipeline, HarvestStats};
pub use symbols::SymbolExtractor;
pub use unpack::{ArchiveUnpacker, TempExtraction};
