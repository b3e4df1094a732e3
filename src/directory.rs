//! Directory subsystem: who may start sessions and which images exist.
//!
//! Both lookups are collaborators of the session controller and sit behind traits:
//! - [`IdentityStore`]: caller identity to entitlement record
//! - [`ImageCatalog`]: image id to download filename
//!
//! Backends:
//! - `static_directory`: lists from the configuration file
//! - `database_directory`: SeaORM over SQLite, tables described in `db_entities`

use crate::error_handling::types::DirectoryError;
use async_trait::async_trait;

pub mod database_directory;
pub mod db_entities;
pub mod static_directory;

pub use database_directory::DatabaseDirectory;
pub use static_directory::StaticDirectory;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub caller_id: String,
    /// Inactive identities are known but not entitled
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRecord {
    pub image_id: String,
    pub filename: String,
}

#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn lookup(&self, caller_id: &str) -> Result<Option<Identity>, DirectoryError>;
}

#[async_trait]
pub trait ImageCatalog: Send + Sync {
    async fn lookup(&self, image_id: &str) -> Result<Option<ImageRecord>, DirectoryError>;
}
