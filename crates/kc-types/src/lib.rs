//! Shared type definitions for kcast
//!
//! Plain data shared by the REST client, the SSH runtime and the CLI. Nothing
//! in here performs I/O.

pub mod access;
pub mod config;
pub mod node;

pub use access::{AccessGrant, OpenAccessGrantRequest};
pub use config::{ApiConfig, ConfigFile, SshSettings};
pub use node::{Cloud, Cluster, ItemList, Node, NodeNetwork};
