//! Initiators driving the interconnect: a grant-table client and a caching
//! client.

pub mod caching;
pub mod table;

pub use caching::{CacheWindow, CachingClient, CachingState};
pub use table::{AccessOutcome, DirectAccessTable, TableClient, TableClientStats};
