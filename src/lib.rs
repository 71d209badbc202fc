//! Bulk migration engine for church records: export a store to a flat CSV
//! archive, and import such an archive into a store in dependency order.

pub mod archive;
pub mod config;
pub mod error;
pub mod export;
pub mod import;
pub mod ipc;
pub mod model;
pub mod progress;
pub mod registry;
pub mod store;
pub mod tables;

pub use error::{MigrateError, Result};
