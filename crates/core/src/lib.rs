//! dirsync core library.
//!
//! This crate provides the foundational components for resolving users and
//! group memberships out of an LDAP directory: configuration, the paged
//! search driver, group resolution strategies, user record mapping and
//! export of the resolved records.

pub mod config;
pub mod directory;
pub mod errors;
pub mod export;
pub mod models;

// Re-exports for convenience.
pub use config::AppConfig;
pub use directory::DirectoryConnector;
pub use errors::CoreError;
pub use models::{Resolution, UserRecord};
