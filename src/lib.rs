//! Reads hAtom pages (and plain RSS, Atom or JSON feeds) from a URL into a
//! [`Feed`] of entries, and republishes them as Sparkle appcasts.

pub mod core;

pub use crate::core::appcast::{render_appcast, AppcastError, AppcastOptions};
pub use crate::core::config::{ConfigError, FetchConfig};
pub use crate::core::feed::fetcher::build_client;
pub use crate::core::feed::types::{Author, Enclosure, Entry, FeedFormat};
pub use crate::core::feed::{Feed, FeedError};
pub use crate::core::listing::render_text;
