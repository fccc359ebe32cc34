//! Two-way reconciliation between model records and their `.sql` files.
//!
//! Model queries live in two places: the persistent model store and one file
//! per model in the project directory. Either side may change first (an edit
//! through the interface, or an external editor touching the file), so a
//! periodic tick reconciles both directions with a strictly-newer timestamp
//! rule. Files that appear without a record become models; files whose record
//! was deleted through the interface are removed from disk.

#![warn(missing_docs)]

pub mod repo;
pub mod service;

pub use repo::{FileRepository, ModelFile, RepoError};
pub use service::{StateSyncService, SyncConfig};
