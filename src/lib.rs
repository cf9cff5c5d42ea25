//! feedpulse: RSS acquisition that keeps working when sites push back.
//!
//! Feeds are fetched through an ordered cascade of transports (direct,
//! same-origin proxy, public relays, RSSHub mirrors), normalized into a
//! single item shape, and stored in SQLite without duplicates. Trending
//! lists from Zhihu, Weibo and Xiaohongshu ride along as pseudo-sources.

pub mod config;
pub mod feed;
pub mod hot;
pub mod proxy;
pub mod storage;
pub mod util;
