//! Civic transparency data ingestion core.
//!
//! A polite, prioritized crawler and document-ingestion pipeline for a
//! fixed allowlist of local-government web properties. Fetched pages
//! are quality-scored and mined for links; discovered data files (CSV,
//! PDF, Excel, plain text) run through format-aware extractors into
//! schema-validated records; every fetch, failure, redirect and citation
//! feeds a coverage monitor that reports against expected counts.
//!
//! The crate is organised around three subsystems:
//! - crawl orchestration: [`registry`], [`frontier`], [`fetch`],
//!   [`orchestrator`]
//! - the document pipeline: [`classify`], [`links`], [`pipeline`],
//!   [`extract`], [`validate`]
//! - telemetry: [`quality`], [`citations`], [`monitor`], [`storage`]

pub mod citations;
pub mod classify;
pub mod config;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod frontier;
pub mod links;
pub mod monitor;
pub mod orchestrator;
pub mod pipeline;
pub mod quality;
pub mod records;
pub mod registry;
pub mod storage;
pub mod testing;
pub mod validate;

pub use config::CrawlConfig;
pub use error::{ConfigError, ErrorKind, ExtractError, FetchError};
pub use fetch::{Fetch, FetchResult, HttpFetcher, PoliteFetcher, RetryPolicy, RobotsCache};
pub use frontier::{EnqueueOutcome, Frontier, FrontierItem, MemoryFrontier};
pub use monitor::MonitorHandle;
pub use orchestrator::{CrawlOutcome, Orchestrator};
pub use records::{Category, StorageRecord};
pub use registry::{SeedEntry, SeedRegistry};
pub use storage::{JsonlSink, MemorySink, NullSink, StorageSink};
