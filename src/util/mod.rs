//! Utility functions for common operations.
//!
//! - **URL validation**: keeps feed fetches away from internal network hosts
//! - **Text processing**: control-character stripping and safe truncation for
//!   text that comes from remote feeds
//!
//! # Examples
//!
//! ```
//! use feedrelay::util::{clean_text, validate_url};
//!
//! let url = validate_url("https://example.com/feed.xml").unwrap();
//! assert_eq!(url.scheme(), "https");
//!
//! assert_eq!(clean_text("  Hello\u{7} "), Some("Hello".to_string()));
//! ```

mod text;
mod url_validator;

pub use text::{clean_text, strip_control_chars, truncate_chars};
pub use url_validator::{validate_feed_url, validate_url, UrlValidationError};
