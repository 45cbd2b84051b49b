//! Directory resolution engine.
//!
//! Leaf modules (escaping, templates, DN handling, filters) feed the paged
//! search driver, which the group resolver and record builder build on.
//! [`connector::DirectoryConnector`] runs a whole resolution.

pub mod attributes;
pub mod builder;
pub mod cache;
pub mod connector;
pub mod dn;
pub mod escape;
pub mod filter;
pub mod formatter;
pub mod groups;
pub mod ldap;
pub mod memory;
pub mod paged;
pub mod transport;

pub use attributes::{RawAttributes, StringEncoding};
pub use connector::DirectoryConnector;
pub use ldap::LdapTransport;
pub use memory::MemoryDirectory;
pub use transport::DirectoryTransport;
