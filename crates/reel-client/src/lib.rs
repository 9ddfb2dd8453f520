//! Client for the worker-facing Coordinator API.
//!
//! Workers never talk to the data store. Everything they read or write goes
//! through [`CoordinatorApi`], implemented over HTTP by [`CoordinatorClient`].

pub mod api;
pub mod client;
pub mod config;
pub mod error;

pub use api::CoordinatorApi;
pub use client::CoordinatorClient;
pub use config::CoordinatorClientConfig;
pub use error::{ClientError, ClientResult};
