//! Order Stats Backend Library
//!
//! Exposes the core modules for use by the binaries and integration tests:
//! order validation and dispatch, the SQLite aggregate store, the durable
//! order queue, the consumer loop and the HTTP read API.

pub mod api;
pub mod models;
pub mod processing;
pub mod queue;
pub mod storage;
pub mod worker;
