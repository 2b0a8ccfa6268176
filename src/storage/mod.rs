//! Persistence for feeds, feed items and the auto-share outbox.
//!
//! The pipeline talks to storage only through the [`FeedStore`] trait.
//! [`Database`] implements it over SQLite; [`MemoryStore`] is an in-memory
//! fake with the same constraint semantics.

mod feeds;
mod items;
mod memory;
mod schema;
mod store;
mod types;

pub use memory::MemoryStore;
pub use schema::Database;
pub use store::FeedStore;
pub use types::{
    Feed, FeedHealth, FeedItem, FeedMetadata, FeedStatus, ItemStatus, NewFeed, ParsedItem,
    PendingShare, ShareMode, ShareQueueEntry, StoreError,
};
