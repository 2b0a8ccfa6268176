//! Scheduled RSS/Atom ingestion.
//!
//! Each run selects feeds that are due, fetches and parses them, stores the
//! items it has not seen before, tracks per-feed health and hands new items
//! to an auto-share stage. See [`ingest::Ingestor`] for the entry point.

pub mod config;
pub mod feed;
pub mod ingest;
pub mod storage;
pub mod util;
