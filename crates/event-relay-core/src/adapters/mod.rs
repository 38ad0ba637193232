//! # Infrastructure Adapters
//!
//! Infrastructure implementations of the record store and analytics sink
//! interfaces.

pub mod ga4_http;
pub mod memory_store;

pub use ga4_http::{Ga4HttpSink, Ga4SinkConfig, GA4_COLLECT_URL, GA4_DEBUG_URL};
pub use memory_store::InMemoryRecordStore;
