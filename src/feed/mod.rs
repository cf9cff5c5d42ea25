//! Getting feeds from the network into [`FeedItem`](crate::storage::FeedItem)s.
//!
//! - [`parser`] - RSS/Atom/RSSHub XML to items, with HTML stripped from text
//! - [`transport`] - ordered fallback over direct, proxied and relayed fetches
//! - [`rsshub`] - the RSSHub mirror strategy and body inspection rules
//! - [`discovery`] - finding a site's feed from its home page address
//! - [`validation`] - user input to a feed verdict
//! - [`favicon`] - site icon lookup
//! - [`scheduler`] - the fetch cycle over all enabled sources

pub mod discovery;
pub mod favicon;
pub mod parser;
pub mod rsshub;
pub mod scheduler;
pub mod transport;
pub mod validation;

#[cfg(test)]
pub(crate) mod testing;

pub use discovery::{DiscoveredFeed, Discovery, DiscoveryError};
pub use favicon::{refresh_missing_favicons, FaviconRefresh, FaviconResolver};
pub use parser::{normalize, FeedMetadata, ParsedFeed};
pub use scheduler::{FetchError, FetchSummary, Scheduler, SchedulerError, SourceReport};
pub use transport::{
    http_client, CascadeError, FeedTransport, Payload, Route, Transport, TransportError,
};
pub use validation::{ValidationFailure, ValidationReport, Validator};
