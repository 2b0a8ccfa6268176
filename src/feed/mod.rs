//! Feed retrieval and normalization.
//!
//! - [`parser`] turns RSS/Atom bytes into a [`ParsedFeed`] using `feed-rs`
//! - [`fetcher`] downloads a feed over HTTP with a timeout and size cap
//!
//! Nothing here touches storage; the ingest pipeline decides what to do with
//! a parsed feed.

mod fetcher;
mod parser;

pub use fetcher::{FeedFetcher, FetchError};
pub use parser::{derive_guid, parse_feed, sniff_image, ParseError, ParsedFeed};
