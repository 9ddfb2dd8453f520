//! Persistence for the compilation pipeline.
//!
//! This crate provides:
//! - The `Store` trait the Coordinator persists through
//! - A Firestore REST backend (service account auth, token cache, retries,
//!   `updateTime` preconditions)
//! - An in-memory backend for tests and local runs
//! - The source-key dedup index and the monthly render ledger

pub mod client;
pub mod error;
pub mod firestore_store;
pub mod memory;
pub mod metrics;
pub mod retry;
pub mod store;
pub mod token_cache;
pub mod types;

pub use client::{FirestoreClient, FirestoreConfig};
pub use error::{FirestoreError, FirestoreResult, StoreError, StoreResult};
pub use firestore_store::FirestoreStore;
pub use memory::MemoryStore;
pub use store::{source_key_hash, Store, Versioned};
pub use types::{Document, Value};
